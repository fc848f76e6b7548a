//! # horde-video
//!
//! Rust client for AI-Horde video generation. Jobs on a volunteer network take
//! minutes to tens of minutes, can be requeued when a worker disconnects, and
//! may emit partial frames before they finish. This crate tracks each job
//! through that lifecycle: submit, poll with adaptive backoff, collect
//! partials, and hand back the final artifact references. Video bytes are
//! never downloaded or decoded.
//!
//! ## Quick start
//!
//! ```no_run
//! use horde_video::{JobDescriptor, Resolution, VideoClient};
//!
//! #[tokio::main]
//! async fn main() -> horde_video::Result<()> {
//!     let client = VideoClient::new("your-horde-key")?;
//!
//!     let job = JobDescriptor::text_to_video("waves crashing on basalt columns")
//!         .with_duration(4.0)
//!         .with_fps(24)
//!         .with_resolution(Resolution::HD_1024_576);
//!
//!     let result = client
//!         .generate(&job, |partial| println!("partial {}", partial.id))
//!         .await?;
//!
//!     for artifact in &result.artifacts {
//!         println!("{} -> {:?}", artifact.id, artifact.location);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Tracking without blocking
//!
//! ```no_run
//! use horde_video::{JobDescriptor, VideoClient};
//!
//! # async fn example(client: VideoClient) -> horde_video::Result<()> {
//! let id = client.submit(&JobDescriptor::text_to_video("a fox in snow")).await?;
//!
//! let progress = client.status(&id).await?;
//! println!("{} is {} (queue position {:?})", id, progress.state, progress.queue_position);
//!
//! client.cancel(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
mod client;
pub mod descriptor;
mod errors;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use assembler::{
    ConsistencyWarning, FinalResult, IncompleteReason, IncompleteResult, JobOutcome, PartialCursor,
    PartialView,
};
pub use client::{ClientBuilder, VideoClient};
pub use descriptor::{
    GenerationMode, JobDescriptor, Resolution, ServerLimits, TemporalParams, VideoCodec, VideoFormat,
    VideoQuality,
};
pub use errors::{HordeVideoError, Result};
pub use events::JobEvent;
pub use lifecycle::{FaultReason, JobId, JobState, LifecycleRecord, Transition};
pub use models::{ArtifactLocation, ArtifactRef, RemoteState, StatusSnapshot};
pub use registry::{JobProgress, JobRegistry};
pub use scheduler::PollPolicy;
pub use transport::{HttpTransport, Transport};
