use std::time::Duration;

use thiserror::Error;

use crate::assembler::{IncompleteReason, IncompleteResult};
use crate::lifecycle::{FaultReason, JobId};
use crate::models::ArtifactRef;

/// All errors that can occur when using the horde-video SDK.
#[derive(Error, Debug)]
pub enum HordeVideoError {
    /// The descriptor failed local validation or the network rejected it (HTTP 400/422).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The API key was rejected (HTTP 401/403).
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The job identifier is unknown (HTTP 404, or not tracked locally).
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The request was rate-limited (HTTP 429).
    #[error("rate limited (retry after {retry_after:?}s): {message}")]
    RateLimit {
        message: String,
        retry_after: Option<f64>,
    },

    /// A non-specific API error with the HTTP status code and response body.
    #[error("API error {status_code}: {message}")]
    Api {
        status_code: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// The request never reached the remote network (connection refused, DNS).
    #[error("remote unreachable: {message}")]
    Unreachable { message: String },

    /// A transport-level failure after the request may have been delivered.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Building the HTTP client failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The job exceeded the configured wait ceiling.
    #[error("job {job_id} timed out after {elapsed:?} ({attempt_count} attempts)")]
    TimedOut {
        job_id: JobId,
        attempt_count: u32,
        elapsed: Duration,
        partials: Vec<ArtifactRef>,
    },

    /// The job reached the Faulted state for a reason other than the wait ceiling.
    #[error("job {job_id} faulted [{}]: {reason} ({attempt_count} attempts)", reason.code())]
    Faulted {
        job_id: JobId,
        reason: FaultReason,
        attempt_count: u32,
        elapsed: Duration,
        partials: Vec<ArtifactRef>,
    },

    /// The client was shut down; no new jobs are submitted or tracked.
    #[error("client has been shut down")]
    ShutDown,

    /// The job was cancelled by the caller.
    #[error("job {job_id} was cancelled after {elapsed:?}")]
    Cancelled {
        job_id: JobId,
        attempt_count: u32,
        elapsed: Duration,
        partials: Vec<ArtifactRef>,
    },
}

impl HordeVideoError {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Network errors, 5xx responses and rate limits are transient; everything
    /// else (bad request, auth rejection, not-found, terminal job outcomes) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Transport { .. } | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Whether a failed submission can be repeated without risking a duplicate job.
    ///
    /// Only failures where the remote provably did not accept the request qualify.
    pub fn is_resubmit_safe(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code == 503,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Stable machine-readable code for terminal outcomes and error classes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::RateLimit { .. } => "rate_limited",
            Self::Api { .. } => "api_error",
            Self::Unreachable { .. } | Self::Transport { .. } | Self::Http(_) => "transport",
            Self::TimedOut { .. } => "timed_out",
            Self::Faulted { reason, .. } => reason.code(),
            Self::Cancelled { .. } => "cancelled",
            Self::ShutDown => "shut_down",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<IncompleteResult> for HordeVideoError {
    fn from(r: IncompleteResult) -> Self {
        let partials = r.partials.to_vec();
        match r.reason {
            IncompleteReason::Cancelled => Self::Cancelled {
                job_id: r.job_id,
                attempt_count: r.attempt_count,
                elapsed: r.elapsed,
                partials,
            },
            IncompleteReason::Faulted(FaultReason::TimedOut) => Self::TimedOut {
                job_id: r.job_id,
                attempt_count: r.attempt_count,
                elapsed: r.elapsed,
                partials,
            },
            IncompleteReason::Faulted(reason) => Self::Faulted {
                job_id: r.job_id,
                reason,
                attempt_count: r.attempt_count,
                elapsed: r.elapsed,
                partials,
            },
        }
    }
}

/// A convenience alias for `Result<T, HordeVideoError>`.
pub type Result<T> = std::result::Result<T, HordeVideoError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status_code: u16) -> HordeVideoError {
        HordeVideoError::Api {
            status_code,
            message: "boom".into(),
            body: None,
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(api(500).is_transient());
        assert!(api(503).is_transient());
        assert!(!api(418).is_transient());
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        assert!(!HordeVideoError::invalid("bad fps").is_transient());
        assert!(!HordeVideoError::NotFound { message: "gone".into() }.is_transient());
        assert!(!HordeVideoError::Authentication { message: "nope".into() }.is_transient());
    }

    #[test]
    fn only_undelivered_submissions_are_resubmit_safe() {
        assert!(HordeVideoError::Unreachable { message: "refused".into() }.is_resubmit_safe());
        assert!(api(503).is_resubmit_safe());
        assert!(!api(502).is_resubmit_safe());
        assert!(!HordeVideoError::Transport { message: "reset".into() }.is_resubmit_safe());
    }

    #[test]
    fn faulted_code_comes_from_reason() {
        let err = HordeVideoError::Faulted {
            job_id: JobId::from("abc"),
            reason: FaultReason::TransportExhausted {
                last_error: "reset".into(),
            },
            attempt_count: 3,
            elapsed: Duration::from_secs(9),
            partials: Vec::new(),
        };
        assert_eq!(err.code(), "transport_exhausted");
        assert!(err.to_string().contains("transport_exhausted"));
    }
}
