//! Per-job lifecycle state machine.
//!
//! ```text
//!   submit ──→ Submitted ──→ Queued ──→ Processing ──→ PartiallyComplete ──┐
//!                              ▲            │    ▲              │   (more)  │
//!                              └─requeue────┴────┼──────────────┘◀─────────┘
//!                                                └──→ Done (from Processing / PartiallyComplete)
//!   any non-terminal ──→ Faulted | Cancelled
//! ```
//!
//! The record never talks to the network: every transition is driven by a
//! [`StatusSnapshot`] handed in by the poll scheduler, or by an explicit
//! fault/cancel call. Terminal states are permanent and later snapshots are
//! ignored, since they can race with cancellation delivery.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{ArtifactRef, RemoteState, StatusSnapshot};

/// Opaque job token returned by the network at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Submitted,
    Queued,
    Processing,
    PartiallyComplete,
    Done,
    Faulted,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Faulted | JobState::Cancelled)
    }

    /// Position along the forward path; terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Submitted => 0,
            JobState::Queued => 1,
            JobState::Processing => 2,
            JobState::PartiallyComplete => 3,
            JobState::Done | JobState::Faulted | JobState::Cancelled => 4,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::PartiallyComplete => "partially_complete",
            JobState::Done => "done",
            JobState::Faulted => "faulted",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a job ended up Faulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// Reported by the worker or backend, passed through verbatim.
    Remote(String),
    /// The wait ceiling elapsed.
    TimedOut,
    /// Too many consecutive transient transport failures.
    TransportExhausted { last_error: String },
    /// The network no longer knows the identifier.
    NotFound(String),
    /// A non-transient transport failure, e.g. an auth rejection.
    Rejected(String),
}

impl FaultReason {
    /// Stable code a caller can branch on when deciding to resubmit.
    pub fn code(&self) -> &'static str {
        match self {
            FaultReason::Remote(_) => "remote_fault",
            FaultReason::TimedOut => "timed_out",
            FaultReason::TransportExhausted { .. } => "transport_exhausted",
            FaultReason::NotFound(_) => "not_found",
            FaultReason::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultReason::Remote(msg) => write!(f, "remote fault: {msg}"),
            FaultReason::TimedOut => f.write_str("wait ceiling exceeded"),
            FaultReason::TransportExhausted { last_error } => {
                write!(f, "transport retries exhausted: {last_error}")
            }
            FaultReason::NotFound(msg) => write!(f, "job unknown to the network: {msg}"),
            FaultReason::Rejected(msg) => write!(f, "request rejected: {msg}"),
        }
    }
}

/// Outcome of feeding one snapshot to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record moved (or stayed in PartiallyComplete and gained partials).
    Applied {
        from: JobState,
        to: JobState,
        /// Every state entered, in order.
        path: Vec<JobState>,
        /// Partials appended by this snapshot, in arrival order.
        appended: Vec<ArtifactRef>,
    },
    /// Advisory fields only (queue position, wait estimate).
    Unchanged,
    /// The snapshot was stale or arrived after a terminal state.
    Ignored,
}

/// Single forward step from `from` towards what the remote reports.
///
/// Returns `None` when the record is already where the snapshot says, or when
/// the snapshot would move it backwards without an explicit requeue.
fn step(from: JobState, remote: RemoteState) -> Option<JobState> {
    use JobState::*;
    use RemoteState as R;

    if from.is_terminal() {
        return None;
    }
    match (from, remote) {
        (_, R::Faulted) => Some(Faulted),

        (Submitted, _) => Some(Queued),

        (Queued, R::Queued | R::Requeued) => None,
        (Queued, R::Processing | R::Partial | R::Done) => Some(Processing),

        (Processing | PartiallyComplete, R::Requeued) => Some(Queued),
        (Processing | PartiallyComplete, R::Done) => Some(Done),
        (Processing, R::Partial) => Some(PartiallyComplete),
        // Further partials are absorbed in place.
        (PartiallyComplete, R::Partial) => None,
        (Processing | PartiallyComplete, R::Queued | R::Processing) => None,

        (Done | Faulted | Cancelled, _) => None,
    }
}

/// Mutable state of one submitted job.
#[derive(Debug, Clone)]
pub struct LifecycleRecord {
    pub job_id: JobId,
    pub state: JobState,
    pub queue_position: Option<u32>,
    pub estimated_wait: Duration,
    pub partial_results: Vec<ArtifactRef>,
    pub final_artifacts: Vec<ArtifactRef>,
    pub fault_reason: Option<FaultReason>,
    /// Poll attempts plus submission retries.
    pub attempt_count: u32,
    pub consecutive_failures: u32,
    pub submitted_at: Instant,
    pub finished_at: Option<Instant>,
}

impl LifecycleRecord {
    /// A freshly accepted job, in Submitted.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Submitted,
            queue_position: None,
            estimated_wait: Duration::ZERO,
            partial_results: Vec::new(),
            final_artifacts: Vec::new(),
            fault_reason: None,
            attempt_count: 0,
            consecutive_failures: 0,
            submitted_at: Instant::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall time since submission, frozen once terminal.
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.submitted_at)
    }

    /// Apply a status snapshot, walking the transition table one step at a time.
    pub fn apply(&mut self, snapshot: &StatusSnapshot) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }

        let from = self.state;
        let mut path = Vec::new();
        let mut appended = Vec::new();

        while let Some(next) = step(self.state, snapshot.state) {
            self.state = next;
            path.push(next);
            if next == JobState::PartiallyComplete {
                self.absorb_partials(&snapshot.partials, &mut appended);
                break;
            }
            if next == JobState::Queued && snapshot.state == RemoteState::Requeued {
                break;
            }
            if next.is_terminal() {
                break;
            }
        }

        if path.is_empty()
            && self.state == JobState::PartiallyComplete
            && snapshot.state == RemoteState::Partial
        {
            self.absorb_partials(&snapshot.partials, &mut appended);
        }

        // A terminal report may carry partials emitted since the last poll.
        if path.last().is_some_and(|s| s.is_terminal()) {
            self.absorb_partials(&snapshot.partials, &mut appended);
        }

        if !self.is_terminal() {
            self.queue_position = match self.state {
                JobState::Submitted | JobState::Queued => snapshot.queue_position,
                _ => None,
            };
            self.estimated_wait = snapshot.estimated_wait;
        }

        match self.state {
            JobState::Done if path.last() == Some(&JobState::Done) => {
                self.final_artifacts = snapshot.finals.clone();
                self.finish();
            }
            JobState::Faulted if path.last() == Some(&JobState::Faulted) => {
                let reason = snapshot
                    .fault_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified worker fault".to_string());
                self.fault_reason = Some(FaultReason::Remote(reason));
                self.finish();
            }
            _ => {}
        }

        if path.is_empty() && appended.is_empty() {
            if snapshot.state == RemoteState::Queued && self.state.rank() > JobState::Queued.rank() {
                return Transition::Ignored;
            }
            return Transition::Unchanged;
        }

        Transition::Applied {
            from,
            to: self.state,
            path,
            appended,
        }
    }

    /// Move to Faulted for a client-side reason. No-op once terminal.
    pub fn fault(&mut self, reason: FaultReason) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::Faulted;
        self.fault_reason = Some(reason);
        self.finish();
        true
    }

    /// Move to Cancelled. No-op once terminal.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::Cancelled;
        self.finish();
        true
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Append partials not seen before, keyed by artifact id.
    fn absorb_partials(&mut self, incoming: &[ArtifactRef], appended: &mut Vec<ArtifactRef>) {
        for partial in incoming {
            if self.partial_results.iter().any(|p| p.id == partial.id) {
                continue;
            }
            self.partial_results.push(partial.clone());
            appended.push(partial.clone());
        }
    }

    fn finish(&mut self) {
        self.queue_position = None;
        self.estimated_wait = Duration::ZERO;
        self.finished_at = Some(Instant::now());
    }
}
