#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use horde_video::{
    ArtifactRef, ClientBuilder, HordeVideoError, JobDescriptor, JobId, PollPolicy, Result, Resolution,
    StatusSnapshot, Transport, VideoClient,
};
use tokio::time::Instant;

/// One scripted reply to a status call.
pub enum Step {
    Reply(StatusSnapshot),
    Fail(HordeVideoError),
    /// Reply only after the given latency.
    Slow(Duration, Box<Step>),
}

impl Step {
    pub fn slow(latency: Duration, step: Step) -> Step {
        Step::Slow(latency, Box::new(step))
    }
}

pub fn transient() -> HordeVideoError {
    HordeVideoError::Transport {
        message: "connection reset by peer".into(),
    }
}

pub fn frame(n: u32) -> ArtifactRef {
    ArtifactRef::url(format!("frame_ref_{n}"), format!("https://r2.example/frame_{n}.webp"))
}

pub fn video(id: &str) -> ArtifactRef {
    ArtifactRef::url(id, format!("https://r2.example/{id}.mp4"))
}

pub fn descriptor() -> JobDescriptor {
    JobDescriptor::text_to_video("a lighthouse in a storm")
        .with_duration(4.0)
        .with_fps(24)
        .with_resolution(Resolution::HD_1024_576)
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        min_interval: Duration::from_secs(5),
        max_interval: Duration::from_secs(30),
        retry_base_delay: Duration::from_secs(1),
        retry_max_delay: Duration::from_secs(16),
        ..PollPolicy::default()
    }
}

/// In-memory [`Transport`] that replays per-job scripts.
#[derive(Default)]
pub struct ScriptedTransport {
    ids: Mutex<VecDeque<String>>,
    submit_failures: Mutex<VecDeque<HordeVideoError>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    last: Mutex<HashMap<String, StatusSnapshot>>,
    status_calls: Mutex<Vec<(String, Instant)>>,
    submit_calls: Mutex<u32>,
    cancels: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
    fail_cancel: Mutex<bool>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Identifiers handed out by successive submissions.
    pub fn ids<I: IntoIterator<Item = S>, S: Into<String>>(&self, ids: I) {
        self.ids.lock().unwrap().extend(ids.into_iter().map(Into::into));
    }

    pub fn script(&self, id: &str, steps: Vec<Step>) {
        self.scripts.lock().unwrap().insert(id.to_string(), steps.into());
    }

    pub fn fail_submit(&self, err: HordeVideoError) {
        self.submit_failures.lock().unwrap().push_back(err);
    }

    pub fn set_models(&self, models: &[&str]) {
        *self.models.lock().unwrap() = models.iter().map(|m| m.to_string()).collect();
    }

    pub fn fail_cancel(&self) {
        *self.fail_cancel.lock().unwrap() = true;
    }

    pub fn status_calls(&self, id: &str) -> Vec<Instant> {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn submit_calls(&self) -> u32 {
        *self.submit_calls.lock().unwrap()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn client(self: &Arc<Self>, policy: PollPolicy) -> VideoClient {
        ClientBuilder::new()
            .transport(self.clone())
            .poll_policy(policy)
            .build()
            .expect("client builds")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(&self, _descriptor: &JobDescriptor) -> Result<JobId> {
        *self.submit_calls.lock().unwrap() += 1;
        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let id = self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "anonymous-job".to_string());
        Ok(JobId::new(id))
    }

    async fn status(&self, id: &JobId) -> Result<StatusSnapshot> {
        self.status_calls
            .lock()
            .unwrap()
            .push((id.to_string(), Instant::now()));

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(id.as_str())
            .and_then(|steps| steps.pop_front());

        let mut step = match step {
            Some(step) => step,
            None => {
                let last = self.last.lock().unwrap().get(id.as_str()).cloned();
                return Ok(last.unwrap_or_else(|| StatusSnapshot::queued(1)));
            }
        };

        loop {
            match step {
                Step::Slow(latency, inner) => {
                    tokio::time::sleep(latency).await;
                    step = *inner;
                }
                Step::Reply(snapshot) => {
                    self.last
                        .lock()
                        .unwrap()
                        .insert(id.to_string(), snapshot.clone());
                    return Ok(snapshot);
                }
                Step::Fail(err) => return Err(err),
            }
        }
    }

    async fn cancel(&self, id: &JobId) -> Result<()> {
        self.cancels.lock().unwrap().push(id.to_string());
        if *self.fail_cancel.lock().unwrap() {
            return Err(transient());
        }
        Ok(())
    }

    async fn models(&self) -> Result<Vec<String>> {
        Ok(self.models.lock().unwrap().clone())
    }
}
