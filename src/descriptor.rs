//! Job descriptors and their static validation.
//!
//! A [`JobDescriptor`] is built once by the caller and never mutated after
//! submission. [`JobDescriptor::validate`] checks it against a cached
//! [`ServerLimits`] snapshot without touching the network.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{HordeVideoError, Result};

pub const MIN_DURATION_SECS: f64 = 0.5;
pub const MAX_DURATION_SECS: f64 = 10.0;
pub const MIN_FPS: u32 = 8;
pub const MAX_FPS: u32 = 60;
pub const MIN_FRAME_COUNT: u32 = 8;
pub const MAX_FRAME_COUNT: u32 = 300;
pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MAX_NEGATIVE_PROMPT_CHARS: usize = 500;

/// Models the network ships with before a limits refresh.
pub const DEFAULT_MODELS: &[&str] = &[
    "stable-video-diffusion-1.1",
    "animatediff-v3",
    "cogvideox-5b",
    "zeroscope-v2-xl",
    "modelscope-text2video",
];

/// Output frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const SD_512: Resolution = Resolution::new(512, 512);
    pub const SD_WIDE: Resolution = Resolution::new(512, 288);
    pub const HD_720: Resolution = Resolution::new(1280, 720);
    pub const HD_1024_576: Resolution = Resolution::new(1024, 576);
    pub const HD_1024_1024: Resolution = Resolution::new(1024, 1024);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = HordeVideoError;

    /// Parse `"1024x576"`.
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| HordeVideoError::invalid(format!("malformed resolution {s:?}")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| HordeVideoError::invalid(format!("malformed resolution {s:?}")))
        };
        Ok(Self::new(parse(w)?, parse(h)?))
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Webm,
    Gif,
    Mov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    #[default]
    High,
    Lossless,
}

/// What the generation starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    TextToVideo,
    /// Source image as a URL or base64 payload.
    ImageToVideo { source_image: String },
    /// Source video as a URL or base64 payload; `strength` in 0.1..=1.0.
    VideoToVideo { source_video: String, strength: f64 },
}

/// Knobs that trade motion against frame-to-frame stability.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalParams {
    /// 0.0..=2.0
    pub motion_scale: f64,
    pub interpolation: bool,
    /// Explicit frame count; derived from `duration * fps` when unset.
    pub frame_count: Option<u32>,
}

impl Default for TemporalParams {
    fn default() -> Self {
        Self {
            motion_scale: 1.0,
            interpolation: true,
            frame_count: None,
        }
    }
}

/// Bounds advertised by the network, cached by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerLimits {
    pub min_duration: f64,
    pub max_duration: f64,
    pub min_fps: u32,
    pub max_fps: u32,
    pub resolutions: Vec<Resolution>,
    pub models: Vec<String>,
    pub motion_scale: (f64, f64),
    pub strength: (f64, f64),
    pub frame_count: (u32, u32),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            min_duration: MIN_DURATION_SECS,
            max_duration: MAX_DURATION_SECS,
            min_fps: MIN_FPS,
            max_fps: MAX_FPS,
            resolutions: vec![
                Resolution::SD_512,
                Resolution::SD_WIDE,
                Resolution::HD_720,
                Resolution::HD_1024_576,
                Resolution::HD_1024_1024,
            ],
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            motion_scale: (0.0, 2.0),
            strength: (0.1, 1.0),
            frame_count: (MIN_FRAME_COUNT, MAX_FRAME_COUNT),
        }
    }
}

/// An immutable video generation request.
///
/// # Example
///
/// ```
/// use horde_video::{JobDescriptor, Resolution, ServerLimits};
///
/// let job = JobDescriptor::text_to_video("a lighthouse in a storm")
///     .with_duration(4.0)
///     .with_fps(24)
///     .with_resolution(Resolution::HD_1024_576);
/// assert!(job.validate(&ServerLimits::default()).is_ok());
/// assert_eq!(job.frame_count(), 96);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub duration: f64,
    pub fps: u32,
    pub resolution: Resolution,
    pub model: String,
    pub temporal: TemporalParams,
    pub mode: GenerationMode,
    pub codec: VideoCodec,
    pub format: VideoFormat,
    pub quality: VideoQuality,
    pub seed: Option<u64>,
    pub nsfw: bool,
    pub shared: bool,
    pub workers: Option<Vec<String>>,
}

impl JobDescriptor {
    fn base(prompt: String, mode: GenerationMode) -> Self {
        Self {
            prompt,
            negative_prompt: None,
            duration: 3.0,
            fps: 24,
            resolution: Resolution::HD_1024_576,
            model: DEFAULT_MODELS[0].to_string(),
            temporal: TemporalParams::default(),
            mode,
            codec: VideoCodec::default(),
            format: VideoFormat::default(),
            quality: VideoQuality::default(),
            seed: None,
            nsfw: false,
            shared: false,
            workers: None,
        }
    }

    pub fn text_to_video(prompt: impl Into<String>) -> Self {
        Self::base(prompt.into(), GenerationMode::TextToVideo)
    }

    /// Animate a still image; the prompt may be empty.
    pub fn image_to_video(source_image: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::base(
            prompt.into(),
            GenerationMode::ImageToVideo {
                source_image: source_image.into(),
            },
        )
    }

    pub fn video_to_video(source_video: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::base(
            prompt.into(),
            GenerationMode::VideoToVideo {
                source_video: source_video.into(),
                strength: 0.8,
            },
        )
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = secs;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalParams) -> Self {
        self.temporal = temporal;
        self
    }

    pub fn with_motion_scale(mut self, scale: f64) -> Self {
        self.temporal.motion_scale = scale;
        self
    }

    /// Only meaningful for video-to-video; ignored otherwise.
    pub fn with_strength(mut self, value: f64) -> Self {
        if let GenerationMode::VideoToVideo { strength, .. } = &mut self.mode {
            *strength = value;
        }
        self
    }

    pub fn with_output(mut self, codec: VideoCodec, format: VideoFormat, quality: VideoQuality) -> Self {
        self.codec = codec;
        self.format = format;
        self.quality = quality;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = nsfw;
        self
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_workers(mut self, workers: Vec<String>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Explicit frame count, or `duration * fps` rounded down.
    pub fn frame_count(&self) -> u32 {
        self.temporal
            .frame_count
            .unwrap_or_else(|| (self.duration * self.fps as f64) as u32)
    }

    /// Check the descriptor against the last advertised limits.
    ///
    /// Pure: reads only `limits`, never the network.
    pub fn validate(&self, limits: &ServerLimits) -> Result<()> {
        let prompt_chars = self.prompt.chars().count();
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(HordeVideoError::invalid(format!(
                "prompt is {prompt_chars} characters, at most {MAX_PROMPT_CHARS} allowed"
            )));
        }
        if let Some(negative) = &self.negative_prompt {
            if negative.chars().count() > MAX_NEGATIVE_PROMPT_CHARS {
                return Err(HordeVideoError::invalid(format!(
                    "negative prompt exceeds {MAX_NEGATIVE_PROMPT_CHARS} characters"
                )));
            }
        }

        let has_prompt = !self.prompt.trim().is_empty();
        match &self.mode {
            GenerationMode::TextToVideo if !has_prompt => {
                return Err(HordeVideoError::invalid(
                    "text-to-video requires a prompt (or supply a source image or video)",
                ));
            }
            GenerationMode::ImageToVideo { source_image } if source_image.trim().is_empty() => {
                return Err(HordeVideoError::invalid("image-to-video requires a source image"));
            }
            GenerationMode::VideoToVideo {
                source_video,
                strength,
            } => {
                if source_video.trim().is_empty() {
                    return Err(HordeVideoError::invalid("video-to-video requires a source video"));
                }
                if !has_prompt {
                    return Err(HordeVideoError::invalid("video-to-video requires a prompt"));
                }
                check_range("strength", *strength, limits.strength)?;
            }
            _ => {}
        }

        if !self.duration.is_finite()
            || self.duration <= 0.0
            || self.duration < limits.min_duration
            || self.duration > limits.max_duration
        {
            return Err(HordeVideoError::invalid(format!(
                "duration {}s outside {}..={}s",
                self.duration, limits.min_duration, limits.max_duration
            )));
        }
        if self.fps == 0 || self.fps < limits.min_fps || self.fps > limits.max_fps {
            return Err(HordeVideoError::invalid(format!(
                "fps {} outside {}..={}",
                self.fps, limits.min_fps, limits.max_fps
            )));
        }
        if !limits.resolutions.contains(&self.resolution) {
            return Err(HordeVideoError::invalid(format!(
                "resolution {} is not offered by the network",
                self.resolution
            )));
        }
        if !limits.models.iter().any(|m| m == &self.model) {
            return Err(HordeVideoError::invalid(format!(
                "model {:?} not available; known models: {}",
                self.model,
                limits.models.join(", ")
            )));
        }

        check_range("motion_scale", self.temporal.motion_scale, limits.motion_scale)?;

        let (min_frames, max_frames) = limits.frame_count;
        let frames = self.frame_count();
        if frames < min_frames || frames > max_frames {
            return Err(HordeVideoError::invalid(format!(
                "frame count {frames} outside {min_frames}..={max_frames}"
            )));
        }

        Ok(())
    }
}

fn check_range(name: &str, value: f64, (min, max): (f64, f64)) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(HordeVideoError::invalid(format!(
            "{name} {value} outside {min}..={max}"
        )));
    }
    Ok(())
}
