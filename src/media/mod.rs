//! Media vocabulary shared by the room adapter and the recorder
//!
//! Participants, media kinds, raw payloads and the sinks that deliver them.

pub mod track;
pub mod types;

pub use track::{MediaFeed, RemoteMediaTrack, SinkAttachment, SinkId, TrackSink};
pub use types::{AudioSamples, MediaKind, MediaPayload, ParticipantId, Resolution, VideoFrame};
