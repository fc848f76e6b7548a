//! Lifecycle events broadcast by the client.
//!
//! Every poll task publishes onto one process-wide
//! [`tokio::sync::broadcast`] channel; call
//! [`VideoClient::subscribe`](crate::VideoClient::subscribe) to receive them.
//! Slow subscribers lag and lose events rather than stalling polling, so use
//! [`VideoClient::await_result`](crate::VideoClient::await_result) when every
//! partial must be seen.

use crate::lifecycle::{JobId, JobState};
use crate::models::ArtifactRef;

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job was accepted by the network and is now tracked.
    Submitted { job_id: JobId },

    /// The job entered a new state.
    StateChanged {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    /// A new partial output was appended.
    PartialResult { job_id: JobId, artifact: ArtifactRef },

    /// A poll failed transiently and will be retried.
    PollRetry {
        job_id: JobId,
        attempt: u32,
        error: String,
    },

    /// The job reached a terminal state.
    Finished { job_id: JobId, state: JobState },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Submitted { job_id }
            | JobEvent::StateChanged { job_id, .. }
            | JobEvent::PartialResult { job_id, .. }
            | JobEvent::PollRetry { job_id, .. }
            | JobEvent::Finished { job_id, .. } => job_id,
        }
    }
}
