//! Turns a lifecycle record into what the caller sees.

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::{FaultReason, JobId, JobState, LifecycleRecord};
use crate::models::ArtifactRef;

/// Append-only, restartable view over a job's partial results.
///
/// Cloning is cheap. A view taken later is always an extension of one taken
/// earlier; read it from the start as often as needed, or hand it to a
/// [`PartialCursor`] to get only what is new.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialView {
    items: Arc<[ArtifactRef]>,
}

impl Default for PartialView {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
        }
    }
}

impl PartialView {
    pub(crate) fn new(items: &[ArtifactRef]) -> Self {
        Self { items: items.into() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactRef> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[ArtifactRef] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<ArtifactRef> {
        self.items.to_vec()
    }
}

impl<'a> IntoIterator for &'a PartialView {
    type Item = &'a ArtifactRef;
    type IntoIter = std::slice::Iter<'a, ArtifactRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Remembers how far into a job's partials a consumer has read.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialCursor {
    next: usize,
}

impl PartialCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items of `view` not yet returned by this cursor, in arrival order.
    pub fn advance<'a>(&mut self, view: &'a PartialView) -> &'a [ArtifactRef] {
        let start = self.next.min(view.len());
        self.next = view.len();
        &view.as_slice()[start..]
    }

    pub fn position(&self) -> usize {
        self.next
    }

    /// Start over from the first partial.
    pub fn rewind(&mut self) {
        self.next = 0;
    }
}

/// A partial that disagrees with the final artifact sharing its id.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyWarning {
    pub partial: ArtifactRef,
    pub final_artifact: ArtifactRef,
}

/// The authoritative result of a Done job.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub job_id: JobId,
    pub artifacts: Vec<ArtifactRef>,
    /// Partials seen along the way, superseded by `artifacts`.
    pub partials: PartialView,
    pub warnings: Vec<ConsistencyWarning>,
    pub attempt_count: u32,
    pub elapsed: Duration,
}

/// Why a result is incomplete.
#[derive(Debug, Clone, PartialEq)]
pub enum IncompleteReason {
    Faulted(FaultReason),
    Cancelled,
}

/// What is left of a job that faulted or was cancelled.
#[derive(Debug, Clone)]
pub struct IncompleteResult {
    pub job_id: JobId,
    pub reason: IncompleteReason,
    /// Salvaged partial outputs.
    pub partials: PartialView,
    pub attempt_count: u32,
    pub elapsed: Duration,
}

impl IncompleteResult {
    pub fn is_cancelled(&self) -> bool {
        self.reason == IncompleteReason::Cancelled
    }

    /// `"cancelled"` or the fault's reason code.
    pub fn code(&self) -> &'static str {
        match &self.reason {
            IncompleteReason::Cancelled => "cancelled",
            IncompleteReason::Faulted(reason) => reason.code(),
        }
    }
}

/// Caller-facing view of a job at one point in time.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Not terminal yet; partials so far.
    Pending { state: JobState, partials: PartialView },
    Complete(FinalResult),
    Incomplete(IncompleteResult),
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Pending { .. })
    }
}

/// Partials that share an id with a final artifact but disagree with it.
pub fn check_consistency(partials: &[ArtifactRef], finals: &[ArtifactRef]) -> Vec<ConsistencyWarning> {
    partials
        .iter()
        .filter_map(|partial| {
            finals
                .iter()
                .find(|f| partial.conflicts_with(f))
                .map(|f| ConsistencyWarning {
                    partial: partial.clone(),
                    final_artifact: f.clone(),
                })
        })
        .collect()
}

/// Build the caller-facing outcome from a record.
pub fn assemble(record: &LifecycleRecord) -> JobOutcome {
    let partials = PartialView::new(&record.partial_results);

    match record.state {
        JobState::Done => {
            let warnings = check_consistency(&record.partial_results, &record.final_artifacts);
            for w in &warnings {
                tracing::warn!(
                    job_id = %record.job_id,
                    artifact_id = %w.partial.id,
                    "Partial result disagrees with final artifact",
                );
            }
            JobOutcome::Complete(FinalResult {
                job_id: record.job_id.clone(),
                artifacts: record.final_artifacts.clone(),
                partials,
                warnings,
                attempt_count: record.attempt_count,
                elapsed: record.elapsed(),
            })
        }
        JobState::Faulted => JobOutcome::Incomplete(IncompleteResult {
            job_id: record.job_id.clone(),
            reason: IncompleteReason::Faulted(
                record
                    .fault_reason
                    .clone()
                    .unwrap_or_else(|| FaultReason::Remote("unknown".into())),
            ),
            partials,
            attempt_count: record.attempt_count,
            elapsed: record.elapsed(),
        }),
        JobState::Cancelled => JobOutcome::Incomplete(IncompleteResult {
            job_id: record.job_id.clone(),
            reason: IncompleteReason::Cancelled,
            partials,
            attempt_count: record.attempt_count,
            elapsed: record.elapsed(),
        }),
        state => JobOutcome::Pending { state, partials },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusSnapshot;

    fn frame(n: u32) -> ArtifactRef {
        ArtifactRef::url(format!("frame_{n}"), format!("https://r2/frame_{n}.webp"))
    }

    fn record() -> LifecycleRecord {
        LifecycleRecord::new(JobId::from("job-1"))
    }

    #[test]
    fn cursor_yields_only_new_items() {
        let mut cursor = PartialCursor::new();
        let first = PartialView::new(&[frame(1)]);
        assert_eq!(cursor.advance(&first), &[frame(1)]);
        assert!(cursor.advance(&first).is_empty());

        let later = PartialView::new(&[frame(1), frame(2), frame(3)]);
        assert_eq!(cursor.advance(&later), &[frame(2), frame(3)]);

        cursor.rewind();
        assert_eq!(cursor.advance(&later).len(), 3);
    }

    #[test]
    fn pending_exposes_partials() {
        let mut r = record();
        r.apply(&StatusSnapshot::partial(vec![frame(1)]));
        match assemble(&r) {
            JobOutcome::Pending { state, partials } => {
                assert_eq!(state, JobState::PartiallyComplete);
                assert_eq!(partials.to_vec(), vec![frame(1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_reports_conflicts_without_dropping() {
        let mut r = record();
        r.apply(&StatusSnapshot::partial(vec![frame(1), ArtifactRef::url("video", "https://tmp/video.mp4")]));
        r.apply(&StatusSnapshot::done(vec![ArtifactRef::url("video", "https://r2/video.mp4")]));

        let JobOutcome::Complete(result) = assemble(&r) else {
            panic!("expected complete");
        };
        assert_eq!(result.artifacts, vec![ArtifactRef::url("video", "https://r2/video.mp4")]);
        assert_eq!(result.partials.len(), 2);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].partial.id, "video");
    }

    #[test]
    fn faulted_keeps_salvage() {
        let mut r = record();
        r.apply(&StatusSnapshot::partial(vec![frame(1)]));
        r.fault(FaultReason::TimedOut);

        let JobOutcome::Incomplete(result) = assemble(&r) else {
            panic!("expected incomplete");
        };
        assert_eq!(result.code(), "timed_out");
        assert!(!result.is_cancelled());
        assert_eq!(result.partials.to_vec(), vec![frame(1)]);
    }

    #[test]
    fn cancelled_is_marked() {
        let mut r = record();
        r.cancel();
        let outcome = assemble(&r);
        assert!(outcome.is_terminal());
        let JobOutcome::Incomplete(result) = outcome else {
            panic!("expected incomplete");
        };
        assert!(result.is_cancelled());
        assert!(result.partials.is_empty());
    }
}
