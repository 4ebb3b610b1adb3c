//! LiveKit Recorder - records every participant of a room to disk.
//!
//! The recorder joins a room as a hidden participant and pipes each remote
//! participant's raw video and audio through its own ffmpeg process.

pub mod config;
pub mod encoder;
pub mod media;
pub mod recorder;
pub mod room;
pub mod server;
pub mod utils;

pub use config::BotConfig;
pub use recorder::{RecordingBot, RecordingCoordinator, SessionTable};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livekit_recorder=debug,livekit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
