//! Encoding pipelines
//!
//! Raw frames and samples are piped through an external ffmpeg process,
//! one process per recorded track.

pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use ffmpeg::{EncoderLauncher, EncoderProcess, FfmpegLauncher};
pub use pipeline::{PipelineState, PipelineStats, PipelineWriter};
pub use types::{EncoderJob, EncoderSettings, SessionIdGenerator};
