//! Recording system module
//!
//! - SessionTable: per-participant sink and pipeline state for one room
//! - RecordingCoordinator: applies room events to the table
//! - RecordingBot: joins rooms and runs one coordinator per room

pub mod bot;
pub mod coordinator;
pub mod state;

pub use bot::{RecordingBot, RoomStatus, StartOutcome};
pub use coordinator::{RecordingCoordinator, RecordingEvent};
pub use state::{SessionEntry, SessionSummary, SessionTable, TrackPhase, TrackRecording};
