use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descriptor::{GenerationMode, JobDescriptor, Resolution, VideoCodec, VideoFormat, VideoQuality};

/// Where an artifact's bytes live. Never the bytes themselves unless inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactLocation {
    Url(String),
    /// Base64-encoded payload returned inline by the network.
    Inline(String),
}

/// A reference to a finished or partial output.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    /// Stable per-artifact id; partials are deduplicated on it.
    pub id: String,
    pub location: ArtifactLocation,
    /// Declared size in bytes, when the network reports one.
    pub content_length: Option<u64>,
    pub checksum: Option<String>,
    pub worker_name: Option<String>,
    pub model: Option<String>,
    pub seed: Option<u64>,
    pub censored: bool,
}

impl ArtifactRef {
    pub fn url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_location(id, ArtifactLocation::Url(url.into()))
    }

    pub fn inline(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::with_location(id, ArtifactLocation::Inline(payload.into()))
    }

    fn with_location(id: impl Into<String>, location: ArtifactLocation) -> Self {
        Self {
            id: id.into(),
            location,
            content_length: None,
            checksum: None,
            worker_name: None,
            model: None,
            seed: None,
            censored: false,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Same id, but a different location or checksum.
    pub(crate) fn conflicts_with(&self, other: &ArtifactRef) -> bool {
        self.id == other.id
            && (self.location != other.location
                || matches!((&self.checksum, &other.checksum), (Some(a), Some(b)) if a != b))
    }
}

/// State tag reported by the remote queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Queued,
    /// Back in the queue after a worker dropped the job.
    Requeued,
    Processing,
    /// Processing and at least one partial output is available.
    Partial,
    Done,
    Faulted,
}

/// One status observation of a job, as produced by the Transport Port.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: RemoteState,
    pub queue_position: Option<u32>,
    pub estimated_wait: Duration,
    pub partials: Vec<ArtifactRef>,
    pub finals: Vec<ArtifactRef>,
    pub fault_reason: Option<String>,
}

impl StatusSnapshot {
    fn bare(state: RemoteState) -> Self {
        Self {
            state,
            queue_position: None,
            estimated_wait: Duration::ZERO,
            partials: Vec::new(),
            finals: Vec::new(),
            fault_reason: None,
        }
    }

    pub fn queued(position: u32) -> Self {
        Self {
            queue_position: Some(position),
            ..Self::bare(RemoteState::Queued)
        }
    }

    pub fn requeued() -> Self {
        Self::bare(RemoteState::Requeued)
    }

    pub fn processing() -> Self {
        Self::bare(RemoteState::Processing)
    }

    pub fn partial(partials: Vec<ArtifactRef>) -> Self {
        Self {
            partials,
            ..Self::bare(RemoteState::Partial)
        }
    }

    pub fn done(finals: Vec<ArtifactRef>) -> Self {
        Self {
            finals,
            ..Self::bare(RemoteState::Done)
        }
    }

    pub fn faulted(reason: impl Into<String>) -> Self {
        Self {
            fault_reason: Some(reason.into()),
            ..Self::bare(RemoteState::Faulted)
        }
    }

    /// Partial outputs reported alongside a non-partial state.
    pub fn with_partials(mut self, partials: Vec<ArtifactRef>) -> Self {
        self.partials = partials;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.estimated_wait = wait;
        self
    }
}

// ---------------------------------------------------------------------------
// Wire types for the AI-Horde video endpoints
// ---------------------------------------------------------------------------

/// POST /v2/generate/video/async body.
#[derive(Debug, Serialize)]
pub(crate) struct SubmitBody<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<&'a str>,
    pub model: &'a str,
    pub params: ParamsBody,
    pub nsfw: bool,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_video: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ParamsBody {
    pub duration: f64,
    pub fps: u32,
    pub resolution: Resolution,
    pub codec: VideoCodec,
    pub format: VideoFormat,
    pub quality: VideoQuality,
    pub motion_scale: f64,
    pub interpolation: bool,
    pub frame_count: u32,
}

impl<'a> From<&'a JobDescriptor> for SubmitBody<'a> {
    fn from(d: &'a JobDescriptor) -> Self {
        let (source_image, source_video, strength) = match &d.mode {
            GenerationMode::TextToVideo => (None, None, None),
            GenerationMode::ImageToVideo { source_image } => (Some(source_image.as_str()), None, None),
            GenerationMode::VideoToVideo {
                source_video,
                strength,
            } => (None, Some(source_video.as_str()), Some(*strength)),
        };

        SubmitBody {
            prompt: &d.prompt,
            negative_prompt: d.negative_prompt.as_deref(),
            model: &d.model,
            params: ParamsBody {
                duration: d.duration,
                fps: d.fps,
                resolution: d.resolution,
                codec: d.codec,
                format: d.format,
                quality: d.quality,
                motion_scale: d.temporal.motion_scale,
                interpolation: d.temporal.interpolation,
                frame_count: d.frame_count(),
            },
            nsfw: d.nsfw,
            shared: d.shared,
            seed: d.seed,
            workers: d.workers.as_deref(),
            source_image,
            source_video,
            strength,
        }
    }
}

/// POST /v2/generate/video/async response.
#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    pub id: String,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// A single generated video in a status response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VideoGeneration {
    pub id: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_base64: Option<String>,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub censored: bool,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl VideoGeneration {
    /// `None` when the generation carries neither a URL nor a payload.
    fn into_artifact(self) -> Option<ArtifactRef> {
        let location = match (self.video_url, self.video_base64) {
            (Some(url), _) if !url.is_empty() => ArtifactLocation::Url(url),
            (_, Some(b64)) if !b64.is_empty() => ArtifactLocation::Inline(b64),
            _ => return None,
        };
        Some(ArtifactRef {
            id: self.id,
            location,
            content_length: self.content_length,
            checksum: self.checksum,
            worker_name: self.worker_name,
            model: self.model,
            seed: self.seed,
            censored: self.censored,
        })
    }
}

/// GET /v2/generate/video/status/{id} response.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub restarted: u32,
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub queue_position: u32,
    #[serde(default)]
    pub wait_time: u64,
    #[serde(default = "default_true")]
    pub is_possible: bool,
    #[serde(default)]
    pub generations: Vec<VideoGeneration>,
    #[serde(default)]
    pub partial_generations: Vec<VideoGeneration>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<StatusResponse> for StatusSnapshot {
    fn from(resp: StatusResponse) -> Self {
        let partials: Vec<ArtifactRef> = resp
            .partial_generations
            .into_iter()
            .filter_map(VideoGeneration::into_artifact)
            .collect();

        let state = if resp.faulted {
            RemoteState::Faulted
        } else if resp.done {
            RemoteState::Done
        } else if resp.processing > 0 && !partials.is_empty() {
            RemoteState::Partial
        } else if resp.processing > 0 {
            RemoteState::Processing
        } else if resp.restarted > 0 && resp.waiting > 0 {
            RemoteState::Requeued
        } else {
            RemoteState::Queued
        };

        let fault_reason = (state == RemoteState::Faulted).then(|| {
            resp.message
                .unwrap_or_else(|| "generation faulted on the worker".to_string())
        });

        let finals = if state == RemoteState::Done {
            resp.generations
                .into_iter()
                .filter_map(VideoGeneration::into_artifact)
                .collect()
        } else {
            Vec::new()
        };

        StatusSnapshot {
            state,
            queue_position: matches!(state, RemoteState::Queued | RemoteState::Requeued)
                .then_some(resp.queue_position),
            estimated_wait: Duration::from_secs(resp.wait_time),
            partials,
            finals,
            fault_reason,
        }
    }
}

/// GET /v2/status/video/models response.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    pub models: Vec<String>,
}

/// Error body returned by the network on 4xx/5xx.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
