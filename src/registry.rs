//! In-memory table of tracked jobs.
//!
//! [`JobRegistry`] holds exactly one [`JobEntry`] per [`JobId`]. Each entry
//! owns its [`LifecycleRecord`] behind an async mutex, so concurrent updates
//! for the same job are applied one after the other, and publishes a
//! [`JobProgress`] snapshot on a `watch` channel after every update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::assembler::{assemble, JobOutcome, PartialView};
use crate::descriptor::JobDescriptor;
use crate::errors::{HordeVideoError, Result};
use crate::lifecycle::{JobId, JobState, LifecycleRecord};

/// How long a terminal job stays queryable when nobody collects its result.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Point-in-time view of a tracked job.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub job_id: JobId,
    pub state: JobState,
    pub queue_position: Option<u32>,
    pub estimated_wait: Duration,
    pub partials: PartialView,
    pub attempt_count: u32,
    pub submitted_at: Instant,
    pub finished_at: Option<Instant>,
}

impl JobProgress {
    fn of(record: &LifecycleRecord, partials: PartialView) -> Self {
        Self {
            job_id: record.job_id.clone(),
            state: record.state,
            queue_position: record.queue_position,
            estimated_wait: record.estimated_wait,
            partials,
            attempt_count: record.attempt_count,
            submitted_at: record.submitted_at,
            finished_at: record.finished_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.submitted_at)
    }
}

/// One tracked job: its record, progress channel and poll task.
#[derive(Debug)]
pub struct JobEntry {
    id: JobId,
    descriptor: Option<Arc<JobDescriptor>>,
    record: Mutex<LifecycleRecord>,
    progress: watch::Sender<JobProgress>,
    cancel: CancellationToken,
    poll_task: StdMutex<Option<JoinHandle<()>>>,
}

impl JobEntry {
    fn new(record: LifecycleRecord, descriptor: Option<Arc<JobDescriptor>>, cancel: CancellationToken) -> Self {
        let partials = PartialView::new(&record.partial_results);
        let (progress, _) = watch::channel(JobProgress::of(&record, partials));
        Self {
            id: record.job_id.clone(),
            descriptor,
            record: Mutex::new(record),
            progress,
            cancel,
            poll_task: StdMutex::new(None),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// The request this job was created from; `None` for re-attached jobs.
    pub fn descriptor(&self) -> Option<&JobDescriptor> {
        self.descriptor.as_deref()
    }

    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    pub async fn outcome(&self) -> JobOutcome {
        assemble(&*self.record.lock().await)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `f` against the record under the job's lock, then publish progress.
    ///
    /// This is the single point of mutation for a job.
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut LifecycleRecord) -> R) -> R {
        let mut record = self.record.lock().await;
        let out = f(&mut record);

        // The log is append-only: same length means same contents.
        let previous = self.progress.borrow().partials.clone();
        let partials = if previous.len() == record.partial_results.len() {
            previous
        } else {
            PartialView::new(&record.partial_results)
        };
        self.progress.send_replace(JobProgress::of(&record, partials));
        out
    }

    /// Mark the job Cancelled and stop its poll loop.
    ///
    /// Returns the state the job was cancelled from, or `None` when it was
    /// already terminal.
    pub(crate) async fn cancel(&self) -> Option<JobState> {
        let from = self
            .update(|r| {
                let from = r.state;
                r.cancel().then_some(from)
            })
            .await;
        self.cancel.cancel();
        from
    }

    pub(crate) fn set_poll_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.poll_task.lock() {
            *slot = Some(handle);
        }
    }

    fn take_poll_task(&self) -> Option<JoinHandle<()>> {
        self.poll_task.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Terminal and older than `retention`.
    fn expired(&self, retention: Duration) -> bool {
        self.progress
            .borrow()
            .finished_at
            .is_some_and(|at| at.elapsed() >= retention)
    }
}

/// Owned table of tracked jobs.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    retention: Duration,
    /// Parent of every entry's cancellation token.
    root: CancellationToken,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
            root: CancellationToken::new(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Whether [`VideoClient::shutdown`](crate::VideoClient::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Register a record, or attach to the entry already tracking its id.
    ///
    /// The boolean is `true` only for the caller that created the entry; that
    /// caller alone starts the poll loop. Fails once the registry is shut down.
    pub(crate) async fn insert_or_attach(
        &self,
        record: LifecycleRecord,
        descriptor: Option<Arc<JobDescriptor>>,
    ) -> Result<(Arc<JobEntry>, bool)> {
        self.prune().await;

        let mut jobs = self.jobs.write().await;
        // Checked under the write lock so shutdown's drain sees every insert.
        if self.is_shut_down() {
            return Err(HordeVideoError::ShutDown);
        }
        if let Some(existing) = jobs.get(&record.job_id) {
            tracing::debug!(job_id = %record.job_id, "Attaching to tracked job");
            return Ok((Arc::clone(existing), false));
        }

        let entry = Arc::new(JobEntry::new(record, descriptor, self.root.child_token()));
        jobs.insert(entry.id.clone(), Arc::clone(&entry));
        Ok((entry, true))
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Forget a job. Its poll loop, if still running, is stopped.
    pub(crate) async fn remove(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        let removed = self.jobs.write().await.remove(id);
        if let Some(entry) = &removed {
            entry.cancel.cancel();
        }
        removed
    }

    /// Drop terminal entries older than the retention window.
    pub async fn prune(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.expired(self.retention));
        let pruned = before - jobs.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired jobs from registry");
        }
        pruned
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Stop every poll loop and forget every job.
    ///
    /// Non-terminal records are marked Cancelled locally so that awaiting
    /// callers wake up; the remote jobs keep running.
    pub(crate) async fn shutdown(&self) {
        let entries: Vec<Arc<JobEntry>> = {
            let mut jobs = self.jobs.write().await;
            self.root.cancel();
            jobs.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            if entry.update(|r| r.cancel()).await {
                tracing::info!(job_id = %entry.id, "Stopped tracking unfinished job");
            }
            if let Some(handle) = entry.take_poll_task() {
                let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
            }
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
