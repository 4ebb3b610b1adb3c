//! Room event source
//!
//! The conferencing transport is reached through [`RoomConnector`]. Joining
//! yields the participants already present plus a stream of lifecycle events
//! that drive the recorder.

pub mod token;

#[cfg(feature = "livekit")]
pub mod livekit;

use crate::media::{MediaKind, ParticipantId, RemoteMediaTrack};
use crate::utils::error::RecorderResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use token::{AccessToken, TokenClaims, VideoGrant};

/// A participant and the tracks the recorder is already subscribed to
#[derive(Debug, Clone)]
pub struct ParticipantSnapshot {
    pub participant: ParticipantId,
    pub tracks: Vec<Arc<dyn RemoteMediaTrack>>,
}

/// Lifecycle events emitted by the room
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected(ParticipantSnapshot),
    ParticipantDisconnected {
        participant: ParticipantId,
    },
    TrackSubscribed {
        participant: ParticipantId,
        track: Arc<dyn RemoteMediaTrack>,
    },
    TrackUnsubscribed {
        participant: ParticipantId,
        kind: MediaKind,
        track_sid: String,
    },
    /// The room connection is gone; no further events follow
    Disconnected {
        reason: String,
    },
}

/// A joined room
pub struct RoomConnection {
    pub participants: Vec<ParticipantSnapshot>,
    pub events: mpsc::Receiver<RoomEvent>,
}

/// Joins rooms on the conferencing service
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> RecorderResult<RoomConnection>;
}
