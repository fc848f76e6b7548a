//! Poll scheduling for tracked jobs.
//!
//! Every non-terminal job gets its own tokio task running [`run_poll_loop`].
//! A task only ever suspends on the backoff sleep or on the transport call,
//! so one slow job never delays another job's poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::errors::HordeVideoError;
use crate::events::JobEvent;
use crate::lifecycle::{FaultReason, JobState, Transition};
use crate::registry::{JobEntry, JobProgress};
use crate::transport::Transport;

/// Tunable polling, retry and timeout parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Interval used while processing and near the head of the queue.
    pub min_interval: Duration,
    /// Upper bound for the interval while far back in the queue.
    pub max_interval: Duration,
    /// Growth factor per poll while far back in the queue.
    pub multiplier: f64,
    /// A queue position at or beyond this counts as far from starting.
    pub far_queue_position: u32,
    /// An estimated wait at or beyond this counts as far from starting.
    pub far_wait: Duration,
    /// Give up on a job this long after submission.
    pub wait_ceiling: Duration,
    /// Consecutive transient failures tolerated before faulting.
    pub retry_ceiling: u32,
    /// Delay after the first transient failure; doubles after each one.
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            far_queue_position: 10,
            far_wait: Duration::from_secs(120),
            wait_ceiling: Duration::from_secs(60 * 60),
            retry_ceiling: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// Interval to wait before polling again, given the latest progress.
    ///
    /// Grows while the job is far from starting and snaps back to the minimum
    /// once a worker has it or it nears the head of the queue.
    pub fn next_interval(&self, current: Duration, progress: &JobProgress) -> Duration {
        let waiting = matches!(progress.state, JobState::Submitted | JobState::Queued);
        let far = progress
            .queue_position
            .is_some_and(|p| p >= self.far_queue_position)
            || progress.estimated_wait >= self.far_wait;

        if waiting && far {
            let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
            Duration::from_millis(next_ms)
                .max(self.min_interval)
                .min(self.max_interval)
        } else {
            self.min_interval
        }
    }

    /// Backoff after `failures` consecutive transient failures (1-based).
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.retry_base_delay
            .saturating_mul(1u32 << exp)
            .min(self.retry_max_delay)
    }
}

/// Drive one job until it is terminal, cancelled, or the registry shuts down.
///
/// Never returns an error: every failure ends up in the job's record.
pub(crate) async fn run_poll_loop(
    entry: Arc<JobEntry>,
    transport: Arc<dyn Transport>,
    policy: PollPolicy,
    events: broadcast::Sender<JobEvent>,
) {
    let id = entry.id().clone();
    let cancel = entry.cancel_token().clone();
    let mut interval = policy.min_interval;

    tracing::info!(job_id = %id, "Poll loop started");

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(job_id = %id, "Cancellation observed, stopping poll loop");
            break;
        }

        if entry.progress().elapsed() >= policy.wait_ceiling {
            tracing::warn!(
                job_id = %id,
                ceiling_secs = policy.wait_ceiling.as_secs(),
                "Wait ceiling exceeded",
            );
            fault(&entry, FaultReason::TimedOut, &events).await;
            break;
        }

        let attempt = entry
            .update(|r| {
                r.record_attempt();
                r.attempt_count
            })
            .await;
        tracing::debug!(job_id = %id, attempt, "Polling job status");

        let result = transport.status(&id).await;

        // The record is already Cancelled; whatever came back is stale.
        if cancel.is_cancelled() {
            break;
        }

        let delay = match result {
            Ok(snapshot) => {
                let transition = entry
                    .update(|r| {
                        r.consecutive_failures = 0;
                        r.apply(&snapshot)
                    })
                    .await;
                let progress = entry.progress();
                publish(&entry, transition, &progress, &events);
                if progress.is_terminal() {
                    break;
                }
                interval = policy.next_interval(interval, &progress);
                interval
            }
            Err(err) if err.is_transient() => {
                let failures = entry
                    .update(|r| {
                        r.consecutive_failures += 1;
                        r.consecutive_failures
                    })
                    .await;
                if failures >= policy.retry_ceiling {
                    tracing::warn!(job_id = %id, failures, error = %err, "Transport retries exhausted");
                    let reason = FaultReason::TransportExhausted {
                        last_error: err.to_string(),
                    };
                    fault(&entry, reason, &events).await;
                    break;
                }

                let mut delay = policy.retry_delay(failures);
                if let HordeVideoError::RateLimit {
                    retry_after: Some(secs),
                    ..
                } = &err
                {
                    if secs.is_finite() && *secs > 0.0 {
                        delay = delay.max(Duration::from_secs_f64(secs.min(3600.0)));
                    }
                }
                tracing::warn!(
                    job_id = %id,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Status poll failed, retrying",
                );
                let _ = events.send(JobEvent::PollRetry {
                    job_id: id.clone(),
                    attempt: failures,
                    error: err.to_string(),
                });
                delay
            }
            Err(HordeVideoError::NotFound { message }) => {
                fault(&entry, FaultReason::NotFound(message), &events).await;
                break;
            }
            Err(err) => {
                tracing::error!(job_id = %id, error = %err, "Status poll rejected");
                fault(&entry, FaultReason::Rejected(err.to_string()), &events).await;
                break;
            }
        };

        let remaining = policy
            .wait_ceiling
            .saturating_sub(entry.progress().elapsed());

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %id, "Cancelled while waiting to poll");
                break;
            }
            _ = tokio::time::sleep(delay.min(remaining)) => {}
        }
    }

    // Nobody polls this job any more; waiters must not hang on it.
    if let Some(from) = entry
        .update(|r| {
            let from = r.state;
            r.cancel().then_some(from)
        })
        .await
    {
        tracing::info!(job_id = %id, state = %from, "Poll loop stopped before job finished");
        let _ = events.send(JobEvent::StateChanged {
            job_id: id.clone(),
            from,
            to: JobState::Cancelled,
        });
        let _ = events.send(JobEvent::Finished {
            job_id: id.clone(),
            state: JobState::Cancelled,
        });
    }

    tracing::info!(job_id = %id, state = %entry.progress().state, "Poll loop exited");
}

async fn fault(entry: &JobEntry, reason: FaultReason, events: &broadcast::Sender<JobEvent>) {
    let code = reason.code();
    let from = entry
        .update(|r| {
            let from = r.state;
            r.fault(reason).then_some(from)
        })
        .await;
    if let Some(from) = from {
        tracing::info!(job_id = %entry.id(), reason = code, "Job faulted");
        let _ = events.send(JobEvent::StateChanged {
            job_id: entry.id().clone(),
            from,
            to: JobState::Faulted,
        });
        let _ = events.send(JobEvent::Finished {
            job_id: entry.id().clone(),
            state: JobState::Faulted,
        });
    }
}

fn publish(entry: &JobEntry, transition: Transition, progress: &JobProgress, events: &broadcast::Sender<JobEvent>) {
    let Transition::Applied {
        from,
        path,
        appended,
        ..
    } = transition
    else {
        return;
    };

    let mut prev = from;
    for to in path {
        tracing::info!(job_id = %entry.id(), from = %prev, to = %to, "Job state changed");
        let _ = events.send(JobEvent::StateChanged {
            job_id: entry.id().clone(),
            from: prev,
            to,
        });
        prev = to;
    }
    for artifact in appended {
        tracing::debug!(job_id = %entry.id(), artifact_id = %artifact.id, "Partial result received");
        let _ = events.send(JobEvent::PartialResult {
            job_id: entry.id().clone(),
            artifact,
        });
    }
    if progress.is_terminal() {
        let _ = events.send(JobEvent::Finished {
            job_id: entry.id().clone(),
            state: progress.state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{JobId, LifecycleRecord};
    use crate::models::StatusSnapshot;

    fn progress(snapshot: StatusSnapshot) -> JobProgress {
        let mut record = LifecycleRecord::new(JobId::from("j"));
        record.apply(&snapshot);
        JobProgress {
            job_id: record.job_id.clone(),
            state: record.state,
            queue_position: record.queue_position,
            estimated_wait: record.estimated_wait,
            partials: Default::default(),
            attempt_count: 0,
            submitted_at: record.submitted_at,
            finished_at: None,
        }
    }

    #[test]
    fn interval_grows_while_far_back() {
        let policy = PollPolicy::default();
        let far = progress(StatusSnapshot::queued(40));
        let mut interval = policy.min_interval;
        let mut seen = Vec::new();
        for _ in 0..8 {
            interval = policy.next_interval(interval, &far);
            seen.push(interval.as_millis());
        }
        assert_eq!(seen[0], 7500);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 60_000);
    }

    #[test]
    fn interval_resets_when_processing_or_near() {
        let policy = PollPolicy::default();
        let big = Duration::from_secs(45);
        assert_eq!(policy.next_interval(big, &progress(StatusSnapshot::processing())), policy.min_interval);
        assert_eq!(policy.next_interval(big, &progress(StatusSnapshot::queued(2))), policy.min_interval);
        let long_wait = progress(StatusSnapshot::queued(2).with_wait(Duration::from_secs(600)));
        assert_eq!(policy.next_interval(big, &long_wait), Duration::from_millis(60_000));
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = PollPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.retry_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test]
    async fn fault_reports_the_state_it_replaced() {
        let registry = crate::registry::JobRegistry::default();
        let (entry, _) = registry
            .insert_or_attach(LifecycleRecord::new(JobId::from("j")), None)
            .await
            .unwrap();
        entry.update(|r| r.apply(&StatusSnapshot::processing())).await;
        let (events, mut rx) = broadcast::channel(8);

        fault(&entry, FaultReason::TimedOut, &events).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::StateChanged {
                job_id: JobId::from("j"),
                from: JobState::Processing,
                to: JobState::Faulted,
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), JobEvent::Finished { .. }));
    }

    #[tokio::test]
    async fn fault_after_cancel_emits_nothing() {
        let registry = crate::registry::JobRegistry::default();
        let (entry, _) = registry
            .insert_or_attach(LifecycleRecord::new(JobId::from("j")), None)
            .await
            .unwrap();
        entry.update(|r| r.apply(&StatusSnapshot::processing())).await;
        let (events, mut rx) = broadcast::channel(8);

        assert_eq!(entry.cancel().await, Some(JobState::Processing));
        fault(&entry, FaultReason::TimedOut, &events).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(entry.progress().state, JobState::Cancelled);
    }
}
