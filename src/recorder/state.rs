//! Recording session table
//!
//! Single source of truth for what is being recorded in one room. Every
//! operation takes the table lock for one synchronous step, so no caller can
//! observe a half-applied transition.

use crate::encoder::{PipelineState, PipelineStats};
use crate::media::{MediaKind, ParticipantId, SinkId, TrackSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle phase of one (participant, kind) slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPhase {
    /// Sink attached, waiting for the first payload
    Subscribed,
    /// Encoder running
    Recording,
    /// Encoder failed to start; payloads are ignored until unsubscribe
    Abandoned,
}

/// State of one subscribed track
#[derive(Debug, Clone)]
pub enum TrackRecording {
    Subscribed {
        sink: TrackSink,
    },
    Recording {
        sink: TrackSink,
        pipeline: Arc<PipelineState>,
    },
    Abandoned {
        sink: TrackSink,
    },
}

impl TrackRecording {
    pub fn sink(&self) -> &TrackSink {
        match self {
            TrackRecording::Subscribed { sink }
            | TrackRecording::Recording { sink, .. }
            | TrackRecording::Abandoned { sink } => sink,
        }
    }

    pub fn pipeline(&self) -> Option<&Arc<PipelineState>> {
        match self {
            TrackRecording::Recording { pipeline, .. } => Some(pipeline),
            _ => None,
        }
    }

    pub fn phase(&self) -> TrackPhase {
        match self {
            TrackRecording::Subscribed { .. } => TrackPhase::Subscribed,
            TrackRecording::Recording { .. } => TrackPhase::Recording,
            TrackRecording::Abandoned { .. } => TrackPhase::Abandoned,
        }
    }
}

/// Per-participant record; both kinds always present, possibly empty
#[derive(Debug, Clone, Default)]
pub struct SessionEntry {
    pub video: Option<TrackRecording>,
    pub audio: Option<TrackRecording>,
}

impl SessionEntry {
    pub fn slot(&self, kind: MediaKind) -> Option<&TrackRecording> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<TrackRecording> {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Sink and pipeline removed by [`SessionTable::end_sink`]
#[derive(Debug)]
pub struct EndedTrack {
    pub sink: TrackSink,
    pub pipeline: Option<Arc<PipelineState>>,
}

/// Where an incoming payload should go
#[derive(Debug)]
pub enum PayloadRoute {
    /// No live sink with this id; the payload is late
    Gone,
    /// First payload for the sink; an encoder must be started
    NeedsPipeline,
    /// Encoder running
    Push(Arc<PipelineState>),
    /// Encoder failed for this subscription
    Abandoned,
}

/// Serializable summary of one track
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub phase: TrackPhase,
    pub track_sid: String,
    pub pipeline: Option<PipelineStats>,
}

/// Serializable summary of one participant's session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub participant: ParticipantId,
    pub video: Option<TrackSummary>,
    pub audio: Option<TrackSummary>,
}

fn summarize(slot: Option<&TrackRecording>) -> Option<TrackSummary> {
    slot.map(|recording| TrackSummary {
        phase: recording.phase(),
        track_sid: recording.sink().track_sid().to_string(),
        pipeline: recording.pipeline().map(|p| p.stats()),
    })
}

/// Mapping from participant to that participant's recording state
#[derive(Debug, Default)]
pub struct SessionTable {
    entries: Mutex<HashMap<ParticipantId, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<SessionEntry> {
        self.entries.lock().get(participant).cloned()
    }

    /// Fetch-or-create the entry, apply `mutate`, and write it back.
    ///
    /// Entries left empty by the mutation are removed.
    pub fn upsert<R>(
        &self,
        participant: &ParticipantId,
        mutate: impl FnOnce(&mut SessionEntry) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        let entry = entries.entry(participant.clone()).or_default();
        let result = mutate(entry);
        if entry.is_empty() {
            entries.remove(participant);
        }
        result
    }

    /// Whether a sink is installed for this kind
    pub fn has_sink(&self, participant: &ParticipantId, kind: MediaKind) -> bool {
        self.entries
            .lock()
            .get(participant)
            .is_some_and(|entry| entry.slot(kind).is_some())
    }

    /// Install a sink; hands it back if one already exists for the kind
    pub fn begin_sink(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        sink: TrackSink,
    ) -> Result<(), TrackSink> {
        self.upsert(participant, |entry| {
            let slot = entry.slot_mut(kind);
            if slot.is_some() {
                return Err(sink);
            }
            *slot = Some(TrackRecording::Subscribed { sink });
            Ok(())
        })
    }

    /// Install the pipeline for a sink that has none yet.
    ///
    /// Hands the pipeline back if the sink is gone, was replaced, or already
    /// has a pipeline; the caller owns closing it.
    pub fn attach_pipeline(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        sink_id: SinkId,
        pipeline: Arc<PipelineState>,
    ) -> Result<(), Arc<PipelineState>> {
        self.upsert(participant, |entry| {
            let slot = entry.slot_mut(kind);
            match slot.take() {
                Some(TrackRecording::Subscribed { sink }) if sink.id() == sink_id => {
                    *slot = Some(TrackRecording::Recording { sink, pipeline });
                    Ok(())
                }
                other => {
                    *slot = other;
                    Err(pipeline)
                }
            }
        })
    }

    /// Mark a subscription whose encoder could not be started
    pub fn abandon_pipeline(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        sink_id: SinkId,
    ) -> bool {
        self.upsert(participant, |entry| {
            let slot = entry.slot_mut(kind);
            match slot.take() {
                Some(TrackRecording::Subscribed { sink }) if sink.id() == sink_id => {
                    *slot = Some(TrackRecording::Abandoned { sink });
                    true
                }
                other => {
                    *slot = other;
                    false
                }
            }
        })
    }

    /// Mark a running subscription whose encoder exited before end of stream.
    ///
    /// Returns the dead pipeline, or `None` if the sink was replaced or is not
    /// recording.
    pub fn abandon_recording(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        sink_id: SinkId,
    ) -> Option<Arc<PipelineState>> {
        self.upsert(participant, |entry| {
            let slot = entry.slot_mut(kind);
            match slot.take() {
                Some(TrackRecording::Recording { sink, pipeline }) if sink.id() == sink_id => {
                    *slot = Some(TrackRecording::Abandoned { sink });
                    Some(pipeline)
                }
                other => {
                    *slot = other;
                    None
                }
            }
        })
    }

    /// Remove and return the sink and pipeline for a kind
    pub fn end_sink(&self, participant: &ParticipantId, kind: MediaKind) -> Option<EndedTrack> {
        self.end_sink_if(participant, kind, |_| true)
    }

    /// Like [`end_sink`](Self::end_sink), but only when the installed sink
    /// belongs to the given track
    pub fn end_track(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        track_sid: &str,
    ) -> Option<EndedTrack> {
        self.end_sink_if(participant, kind, |sink| sink.track_sid() == track_sid)
    }

    fn end_sink_if(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        matches: impl FnOnce(&TrackSink) -> bool,
    ) -> Option<EndedTrack> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(participant)?;
        let slot = entry.slot_mut(kind);
        if !slot.as_ref().is_some_and(|recording| matches(recording.sink())) {
            return None;
        }

        let recording = slot.take()?;
        if entry.is_empty() {
            entries.remove(participant);
        }

        let pipeline = recording.pipeline().cloned();
        let sink = match recording {
            TrackRecording::Subscribed { sink }
            | TrackRecording::Recording { sink, .. }
            | TrackRecording::Abandoned { sink } => sink,
        };
        Some(EndedTrack { sink, pipeline })
    }

    /// Decide what to do with a payload delivered by `sink_id`
    pub fn route(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        sink_id: SinkId,
    ) -> PayloadRoute {
        let entries = self.entries.lock();
        let Some(recording) = entries.get(participant).and_then(|entry| entry.slot(kind)) else {
            return PayloadRoute::Gone;
        };
        if recording.sink().id() != sink_id {
            return PayloadRoute::Gone;
        }

        match recording {
            TrackRecording::Subscribed { .. } => PayloadRoute::NeedsPipeline,
            TrackRecording::Recording { pipeline, .. } => PayloadRoute::Push(pipeline.clone()),
            TrackRecording::Abandoned { .. } => PayloadRoute::Abandoned,
        }
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut participants: Vec<ParticipantId> = self.entries.lock().keys().cloned().collect();
        participants.sort();
        participants
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let entries = self.entries.lock();
        let mut summaries: Vec<SessionSummary> = entries
            .iter()
            .map(|(participant, entry)| SessionSummary {
                participant: participant.clone(),
                video: summarize(entry.video.as_ref()),
                audio: summarize(entry.audio.as_ref()),
            })
            .collect();
        summaries.sort_by(|a, b| a.participant.cmp(&b.participant));
        summaries
    }

    /// Remove every entry, for room-leave teardown
    pub fn drain(&self) -> Vec<(ParticipantId, SessionEntry)> {
        self.entries.lock().drain().collect()
    }
}
