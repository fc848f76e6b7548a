use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};

use crate::assembler::{FinalResult, JobOutcome, PartialCursor};
use crate::descriptor::{JobDescriptor, ServerLimits};
use crate::errors::{HordeVideoError, Result};
use crate::events::JobEvent;
use crate::lifecycle::{JobId, JobState, LifecycleRecord};
use crate::models::ArtifactRef;
use crate::registry::{JobEntry, JobProgress, JobRegistry, DEFAULT_RETENTION};
use crate::scheduler::{run_poll_loop, PollPolicy};
use crate::transport::{HttpTransport, Transport, ANONYMOUS_API_KEY, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

/// Broadcast channel capacity for lifecycle events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Builder for constructing a [`VideoClient`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use horde_video::{ClientBuilder, PollPolicy};
/// use std::time::Duration;
///
/// # fn example() -> horde_video::Result<()> {
/// let client = ClientBuilder::new()
///     .api_key("your-horde-key")
///     .poll_policy(PollPolicy {
///         wait_ceiling: Duration::from_secs(45 * 60),
///         ..PollPolicy::default()
///     })
///     .retention(Duration::from_secs(600))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Duration,
    policy: PollPolicy,
    retention: Duration,
    limits: ServerLimits,
    event_capacity: usize,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            policy: PollPolicy::default(),
            retention: DEFAULT_RETENTION,
            limits: ServerLimits::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            transport: None,
        }
    }

    /// Set the API key sent with every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the base URL (defaults to `https://aihorde.net/api`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request HTTP timeout (defaults to 60 seconds).
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Polling intervals, retry ceiling and wait ceiling.
    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for the retry ceiling of the poll policy.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.policy.retry_ceiling = n;
        self
    }

    /// How long finished jobs stay queryable if nobody collects them.
    pub fn retention(mut self, d: Duration) -> Self {
        self.retention = d;
        self
    }

    /// Seed the cached limits used for validation before any refresh.
    pub fn limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Capacity of the [`JobEvent`] broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Use a custom [`Transport`] instead of HTTP. API key, base URL and
    /// timeout are then ignored.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the [`VideoClient`].
    ///
    /// Without an explicit key the builder reads `HORDE_API_KEY`, falling back
    /// to the anonymous key. `HORDE_BASE_URL` overrides the default base URL.
    pub fn build(self) -> Result<VideoClient> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => {
                let api_key = self
                    .api_key
                    .or_else(|| std::env::var("HORDE_API_KEY").ok())
                    .filter(|k| !k.trim().is_empty())
                    .unwrap_or_else(|| ANONYMOUS_API_KEY.to_string());
                let base_url = self
                    .base_url
                    .or_else(|| std::env::var("HORDE_BASE_URL").ok())
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
                Arc::new(HttpTransport::new(base_url, api_key, self.timeout)?)
            }
        };

        if self.policy.retry_ceiling == 0 {
            return Err(HordeVideoError::invalid("retry ceiling must be at least 1"));
        }
        if self.policy.min_interval.is_zero() || self.policy.min_interval > self.policy.max_interval {
            return Err(HordeVideoError::invalid(
                "poll interval bounds must satisfy 0 < min_interval <= max_interval",
            ));
        }

        let (events, _) = broadcast::channel(self.event_capacity);

        Ok(VideoClient {
            transport,
            registry: Arc::new(JobRegistry::new(self.retention)),
            policy: self.policy,
            limits: RwLock::new(self.limits),
            events,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits video jobs and tracks them to completion.
///
/// Each submitted job gets one background poll task; the client owns the
/// registry of tracked jobs.
///
/// # Example
///
/// ```no_run
/// use horde_video::{JobDescriptor, VideoClient};
///
/// # async fn example() -> horde_video::Result<()> {
/// let client = VideoClient::new("your-horde-key")?;
///
/// let job = JobDescriptor::text_to_video("a paper boat drifting down a gutter").with_duration(4.0);
/// let id = client.submit(&job).await?;
/// let result = client
///     .await_result(&id, |frame| println!("partial: {}", frame.id))
///     .await?;
/// println!("{} artifact(s)", result.artifacts.len());
/// # Ok(())
/// # }
/// ```
pub struct VideoClient {
    transport: Arc<dyn Transport>,
    registry: Arc<JobRegistry>,
    policy: PollPolicy,
    limits: RwLock<ServerLimits>,
    events: broadcast::Sender<JobEvent>,
}

impl VideoClient {
    /// Create a client for the public network with the given API key.
    ///
    /// For customization, use [`ClientBuilder`] instead.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        ClientBuilder::new().api_key(api_key).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Validate and submit a job, then start tracking it.
    ///
    /// Returns as soon as the network has accepted the job. Submissions are
    /// retried only when the failure proves the network never accepted them,
    /// so a retry cannot create a duplicate job.
    ///
    /// # Errors
    ///
    /// - [`HordeVideoError::InvalidRequest`] if validation fails or the network rejects the body.
    /// - Transport errors once the retry ceiling is reached or when a retry is unsafe.
    /// - [`HordeVideoError::ShutDown`] after [`shutdown`](Self::shutdown); nothing is sent.
    pub async fn submit(&self, descriptor: &JobDescriptor) -> Result<JobId> {
        if self.registry.is_shut_down() {
            return Err(HordeVideoError::ShutDown);
        }
        descriptor.validate(&*self.limits.read().await)?;

        let descriptor = Arc::new(descriptor.clone());
        let mut retries = 0u32;
        let id = loop {
            match self.transport.submit(&descriptor).await {
                Ok(id) => break id,
                Err(err) if err.is_resubmit_safe() && retries + 1 < self.policy.retry_ceiling => {
                    retries += 1;
                    let delay = self.policy.retry_delay(retries);
                    tracing::warn!(
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Submission not accepted, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        let mut record = LifecycleRecord::new(id.clone());
        record.attempt_count = retries;
        if let Err(err) = self.start_tracking(record, Some(descriptor)).await {
            tracing::warn!(job_id = %id, "Client shut down during submission, job left untracked");
            return Err(err);
        }

        tracing::info!(job_id = %id, retries, "Video job submitted");
        let _ = self.events.send(JobEvent::Submitted { job_id: id.clone() });
        Ok(id)
    }

    /// Start tracking a job submitted elsewhere, e.g. before a restart.
    ///
    /// Attaches to the existing poll loop when the job is already tracked.
    pub async fn track(&self, id: &JobId) -> Result<JobProgress> {
        let entry = self.start_tracking(LifecycleRecord::new(id.clone()), None).await?;
        Ok(entry.progress())
    }

    /// Local progress of a tracked job.
    pub async fn status(&self, id: &JobId) -> Result<JobProgress> {
        Ok(self.entry(id).await?.progress())
    }

    /// Assembled view of a tracked job: pending partials or the final outcome.
    pub async fn outcome(&self, id: &JobId) -> Result<JobOutcome> {
        Ok(self.entry(id).await?.outcome().await)
    }

    /// Wait until a job is terminal, calling `on_partial` once per new partial.
    ///
    /// Partials are delivered in arrival order. The callback runs on the
    /// caller's task, so a slow callback never stalls polling. Untracked ids
    /// are attached first. Once the result has been handed out, the job is
    /// removed from the registry.
    ///
    /// # Errors
    ///
    /// - [`HordeVideoError::TimedOut`] if the wait ceiling was exceeded.
    /// - [`HordeVideoError::Faulted`] for any other fault, reason included.
    /// - [`HordeVideoError::Cancelled`] if the job was cancelled.
    pub async fn await_result<F>(&self, id: &JobId, mut on_partial: F) -> Result<FinalResult>
    where
        F: FnMut(&ArtifactRef),
    {
        let entry = match self.registry.get(id).await {
            Some(entry) => entry,
            None => self.start_tracking(LifecycleRecord::new(id.clone()), None).await?,
        };

        let mut rx = entry.subscribe();
        let mut cursor = PartialCursor::new();
        loop {
            let progress = rx.borrow_and_update().clone();
            for partial in cursor.advance(&progress.partials) {
                on_partial(partial);
            }
            if progress.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        let outcome = entry.outcome().await;
        if outcome.is_terminal() {
            self.registry.remove(id).await;
        }

        match outcome {
            JobOutcome::Complete(result) => Ok(result),
            JobOutcome::Incomplete(incomplete) => Err(incomplete.into()),
            JobOutcome::Pending { state, .. } => Err(HordeVideoError::Transport {
                message: format!("tracking of job {id} ended while {state}"),
            }),
        }
    }

    /// Submit and wait in one call.
    pub async fn generate<F>(&self, descriptor: &JobDescriptor, on_partial: F) -> Result<FinalResult>
    where
        F: FnMut(&ArtifactRef),
    {
        let id = self.submit(descriptor).await?;
        self.await_result(&id, on_partial).await
    }

    /// Cancel a tracked job.
    ///
    /// Polling stops before the next network call, the job becomes Cancelled
    /// whatever an in-flight poll returns, and the network is asked to release
    /// it. A failed remote release is logged, not returned.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let entry = self.entry(id).await?;
        let Some(from) = entry.cancel().await else {
            tracing::debug!(job_id = %id, "Cancel ignored, job already terminal");
            return Ok(());
        };

        tracing::info!(job_id = %id, "Job cancelled");
        let _ = self.events.send(JobEvent::StateChanged {
            job_id: id.clone(),
            from,
            to: JobState::Cancelled,
        });
        let _ = self.events.send(JobEvent::Finished {
            job_id: id.clone(),
            state: JobState::Cancelled,
        });

        if let Err(e) = self.transport.cancel(id).await {
            tracing::warn!(job_id = %id, error = %e, "Remote cancellation failed");
        }
        Ok(())
    }

    /// Fetch the models the network currently serves and cache them as limits.
    pub async fn refresh_limits(&self) -> Result<ServerLimits> {
        let models = self.transport.models().await?;
        let mut limits = self.limits.write().await;
        if models.is_empty() {
            tracing::warn!("Network advertised no video models, keeping cached list");
        } else {
            tracing::info!(count = models.len(), "Refreshed advertised video models");
            limits.models = models;
        }
        Ok(limits.clone())
    }

    /// The cached limits used by [`submit`](Self::submit).
    pub async fn limits(&self) -> ServerLimits {
        self.limits.read().await.clone()
    }

    /// Subscribe to lifecycle events of every job this client tracks.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// The registry of tracked jobs.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stop every poll loop without cancelling the remote jobs.
    ///
    /// Afterwards `submit`, `track` and `await_result` on untracked ids fail
    /// with [`HordeVideoError::ShutDown`].
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down video client");
        self.registry.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn entry(&self, id: &JobId) -> Result<Arc<JobEntry>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| HordeVideoError::NotFound {
                message: format!("job {id} is not tracked by this client"),
            })
    }

    /// Register a record and spawn its poll loop unless one already exists.
    async fn start_tracking(
        &self,
        record: LifecycleRecord,
        descriptor: Option<Arc<JobDescriptor>>,
    ) -> Result<Arc<JobEntry>> {
        let (entry, created) = self.registry.insert_or_attach(record, descriptor).await?;
        if created {
            let handle = tokio::spawn(run_poll_loop(
                Arc::clone(&entry),
                Arc::clone(&self.transport),
                self.policy.clone(),
                self.events.clone(),
            ));
            entry.set_poll_task(handle);
        }
        Ok(entry)
    }
}
