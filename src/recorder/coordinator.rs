//! Recording coordinator
//!
//! Reacts to room lifecycle events and drives the session table. Per
//! (participant, kind) a track moves through
//! `Unsubscribed -> Subscribed -> Recording -> Unsubscribed`; the encoder is
//! started on the first payload because video geometry is only known once a
//! frame has been decoded.

use super::state::{PayloadRoute, SessionSummary, SessionTable};
use crate::encoder::{PipelineState, PipelineWriter};
use crate::media::{MediaKind, MediaPayload, ParticipantId, RemoteMediaTrack, SinkId, TrackSink};
use crate::room::{ParticipantSnapshot, RoomEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Events emitted while recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// An encoder was started for a track
    Started {
        participant: ParticipantId,
        kind: MediaKind,
        path: PathBuf,
    },
    /// A track's encoder input was closed
    Stopped {
        participant: ParticipantId,
        kind: MediaKind,
        path: PathBuf,
    },
    /// The encoder could not be started; the track stays unrecorded
    Abandoned {
        participant: ParticipantId,
        kind: MediaKind,
        reason: String,
    },
}

/// Drives the session table of one room
#[derive(Clone)]
pub struct RecordingCoordinator {
    table: Arc<SessionTable>,
    writer: PipelineWriter,
    event_tx: broadcast::Sender<RecordingEvent>,
    stopped: Arc<watch::Sender<bool>>,
}

impl RecordingCoordinator {
    /// Create a coordinator with an empty session table
    pub fn new(writer: PipelineWriter) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            table: Arc::new(SessionTable::new()),
            writer,
            event_tx,
            stopped: Arc::new(watch::channel(false).0),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run; later events are ignored
    pub fn is_shut_down(&self) -> bool {
        *self.stopped.borrow()
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        self.table.snapshot()
    }

    /// Apply one room event.
    ///
    /// Returns `false` once the room reports it is disconnected or the
    /// coordinator has been shut down.
    pub fn handle_event(&self, event: RoomEvent) -> bool {
        if self.is_shut_down() {
            tracing::debug!("Ignoring room event after shutdown: {:?}", event);
            return false;
        }
        match event {
            RoomEvent::ParticipantConnected(snapshot) => self.participant_connected(snapshot),
            RoomEvent::ParticipantDisconnected { participant } => {
                self.participant_disconnected(&participant)
            }
            RoomEvent::TrackSubscribed { participant, track } => {
                self.track_subscribed(&participant, track);
            }
            RoomEvent::TrackUnsubscribed {
                participant,
                kind,
                track_sid,
            } => {
                tracing::info!("Track {} unsubscribed for {}", track_sid, participant);
                self.track_unsubscribed(&participant, kind, Some(&track_sid));
            }
            RoomEvent::Disconnected { reason } => {
                tracing::info!("Room disconnected: {}", reason);
                return false;
            }
        }
        true
    }

    /// Process events until the room disconnects, the stream ends or the
    /// coordinator is shut down, then tear down every recording
    pub async fn run(&self, mut events: mpsc::Receiver<RoomEvent>) {
        let mut stopped = self.stopped.subscribe();
        if !*stopped.borrow_and_update() {
            loop {
                let event = tokio::select! {
                    _ = stopped.changed() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                if !self.handle_event(event) {
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    pub fn participant_connected(&self, snapshot: ParticipantSnapshot) {
        tracing::info!(
            "Participant {} connected with {} subscribed tracks",
            snapshot.participant,
            snapshot.tracks.len()
        );
        for track in snapshot.tracks {
            self.track_subscribed(&snapshot.participant, track);
        }
    }

    /// Both kinds are torn down independently; kinds never subscribed are no-ops
    pub fn participant_disconnected(&self, participant: &ParticipantId) {
        tracing::info!("Participant {} disconnected", participant);
        for kind in MediaKind::ALL {
            self.track_unsubscribed(participant, kind, None);
        }
    }

    /// Attach a sink to a newly subscribed track.
    ///
    /// Returns `false` for a duplicate subscription of an already recorded kind.
    pub fn track_subscribed(
        &self,
        participant: &ParticipantId,
        track: Arc<dyn RemoteMediaTrack>,
    ) -> bool {
        let kind = track.kind();
        if self.is_shut_down() {
            return false;
        }
        if self.table.has_sink(participant, kind) {
            tracing::debug!(
                "Ignoring {} track {} for {}: already subscribed",
                kind,
                track.sid(),
                participant
            );
            return false;
        }

        let feed = track.attach();
        let sink = TrackSink::new(kind, participant.clone(), track.sid(), feed.attachment);
        let sink_id = sink.id();

        if let Err(rejected) = self.table.begin_sink(participant, kind, sink) {
            tracing::debug!("Lost subscribe race for {} {}", participant, kind);
            rejected.stop();
            return false;
        }

        tracing::info!("Subscribed {} track {} for {}", kind, track.sid(), participant);

        let coordinator = self.clone();
        let participant = participant.clone();
        let mut payloads = feed.payloads;
        tokio::spawn(async move {
            while let Some(payload) = payloads.recv().await {
                coordinator.on_payload(&participant, sink_id, payload);
            }
            tracing::debug!("Feed for {} {} sink {} closed", participant, kind, sink_id);
        });

        true
    }

    /// Tear down a kind: stop the sink and close the encoder input.
    ///
    /// With `track_sid`, only the sink of that track is torn down. Returns
    /// whether any teardown work was done.
    pub fn track_unsubscribed(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        track_sid: Option<&str>,
    ) -> bool {
        let ended = match track_sid {
            Some(sid) => self.table.end_track(participant, kind, sid),
            None => self.table.end_sink(participant, kind),
        };
        let Some(ended) = ended else {
            tracing::debug!("No {} sink to end for {}", kind, participant);
            return false;
        };

        ended.sink.stop();
        if let Some(pipeline) = ended.pipeline {
            self.close_pipeline(participant, &pipeline);
        }
        true
    }

    /// Deliver one frame or sample batch from sink `sink_id`.
    ///
    /// Returns whether the payload was queued for an encoder. Late payloads
    /// for a torn down sink are dropped with a warning.
    pub fn on_payload(
        &self,
        participant: &ParticipantId,
        sink_id: SinkId,
        payload: MediaPayload,
    ) -> bool {
        let kind = payload.kind();
        match self.table.route(participant, kind, sink_id) {
            PayloadRoute::Gone => {
                tracing::warn!(
                    "Dropping {} payload for {}: sink {} is no longer active",
                    kind,
                    participant,
                    sink_id
                );
                false
            }
            PayloadRoute::Abandoned => false,
            PayloadRoute::Push(pipeline) => {
                if pipeline.is_ended() && !pipeline.is_closed() {
                    self.abandon_dead_pipeline(participant, sink_id, &pipeline);
                    return false;
                }
                if let Some(resolution) = payload.resolution() {
                    if pipeline.note_resolution(resolution) {
                        tracing::warn!(
                            "Resolution of {} video changed to {}; writing through to {}",
                            participant,
                            resolution,
                            pipeline.output_path().display()
                        );
                    }
                }
                pipeline.push(payload.into_bytes())
            }
            PayloadRoute::NeedsPipeline => self.start_pipeline(participant, sink_id, payload),
        }
    }

    fn start_pipeline(
        &self,
        participant: &ParticipantId,
        sink_id: SinkId,
        payload: MediaPayload,
    ) -> bool {
        let kind = payload.kind();
        // The sink may have been torn down since the payload was routed. A
        // teardown racing the launch itself is handled by attach_pipeline
        // handing the encoder back.
        if !matches!(
            self.table.route(participant, kind, sink_id),
            PayloadRoute::NeedsPipeline
        ) {
            tracing::debug!(
                "{} sink {} for {} no longer needs an encoder",
                kind,
                sink_id,
                participant
            );
            return false;
        }
        let job = self.writer.job_for(kind, participant, payload.resolution());

        let pipeline = match self.writer.start(job) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!("Failed to start {} recording for {}: {}", kind, participant, e);
                if self.table.abandon_pipeline(participant, kind, sink_id) {
                    let _ = self.event_tx.send(RecordingEvent::Abandoned {
                        participant: participant.clone(),
                        kind,
                        reason: e.to_string(),
                    });
                }
                return false;
            }
        };

        if let Err(orphan) = self
            .table
            .attach_pipeline(participant, kind, sink_id, pipeline.clone())
        {
            tracing::warn!(
                "{} sink for {} ended while its encoder started; closing {}",
                kind,
                participant,
                orphan.output_path().display()
            );
            orphan.close();
            return false;
        }

        let _ = self.event_tx.send(RecordingEvent::Started {
            participant: participant.clone(),
            kind,
            path: pipeline.output_path().to_path_buf(),
        });
        pipeline.push(payload.into_bytes())
    }

    /// The encoder exited before end of stream; stop feeding it for the rest
    /// of the subscription
    fn abandon_dead_pipeline(
        &self,
        participant: &ParticipantId,
        sink_id: SinkId,
        pipeline: &PipelineState,
    ) {
        let kind = pipeline.kind();
        let Some(dead) = self.table.abandon_recording(participant, kind, sink_id) else {
            return;
        };
        dead.close();
        tracing::error!(
            "Encoder for {} {} exited before end of stream; abandoning {}",
            participant,
            kind,
            dead.output_path().display()
        );
        let _ = self.event_tx.send(RecordingEvent::Abandoned {
            participant: participant.clone(),
            kind,
            reason: "encoder exited before end of stream".to_string(),
        });
    }

    fn close_pipeline(&self, participant: &ParticipantId, pipeline: &PipelineState) {
        if pipeline.close() {
            let _ = self.event_tx.send(RecordingEvent::Stopped {
                participant: participant.clone(),
                kind: pipeline.kind(),
                path: pipeline.output_path().to_path_buf(),
            });
        }
    }

    /// Room-leave teardown: stop every sink, close every encoder input and
    /// wait for the encoders to finish writing.
    ///
    /// Only the first call tears down; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopped.send_replace(true) {
            return;
        }
        let entries = self.table.drain();
        let mut pipelines = Vec::new();

        for (participant, entry) in entries {
            for recording in [entry.video, entry.audio].into_iter().flatten() {
                recording.sink().stop();
                if let Some(pipeline) = recording.pipeline() {
                    self.close_pipeline(&participant, pipeline);
                    pipelines.push(pipeline.clone());
                }
            }
        }

        tracing::info!("Waiting for {} encoders to finish", pipelines.len());
        for pipeline in pipelines {
            pipeline.wait_ended().await;
        }
    }
}
