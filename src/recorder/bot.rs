//! Recording bot
//!
//! Joins a room as a hidden participant and records it until the room
//! connection ends. Each room gets its own coordinator and session table.

use super::coordinator::RecordingCoordinator;
use super::state::SessionSummary;
use crate::config::BotConfig;
use crate::encoder::{EncoderLauncher, PipelineWriter};
use crate::room::{AccessToken, RoomConnector};
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRecording,
}

/// Recording status of one room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room: String,
    pub joined: bool,
    pub sessions: Vec<SessionSummary>,
}

enum RoomSlot {
    Joining,
    Recording(RecordingCoordinator),
}

impl RoomSlot {
    fn status(&self, room: &str) -> RoomStatus {
        match self {
            RoomSlot::Joining => RoomStatus {
                room: room.to_string(),
                joined: false,
                sessions: Vec::new(),
            },
            RoomSlot::Recording(coordinator) => RoomStatus {
                room: room.to_string(),
                joined: true,
                sessions: coordinator.snapshot(),
            },
        }
    }
}

/// Joins rooms and records every remote track
pub struct RecordingBot {
    config: BotConfig,
    connector: Arc<dyn RoomConnector>,
    launcher: Arc<dyn EncoderLauncher>,
    tokens: AccessToken,
    rooms: Mutex<HashMap<String, RoomSlot>>,
}

impl RecordingBot {
    pub fn new(
        config: BotConfig,
        connector: Arc<dyn RoomConnector>,
        launcher: Arc<dyn EncoderLauncher>,
    ) -> Self {
        let tokens = AccessToken::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.identity.clone(),
            config.token_ttl_secs,
        );
        Self {
            config,
            connector,
            launcher,
            tokens,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_recording(&self, room: &str) -> bool {
        self.rooms.lock().contains_key(room)
    }

    pub fn rooms(&self) -> Vec<RoomStatus> {
        let rooms = self.rooms.lock();
        let mut statuses: Vec<RoomStatus> = rooms
            .iter()
            .map(|(room, slot)| slot.status(room))
            .collect();
        statuses.sort_by(|a, b| a.room.cmp(&b.room));
        statuses
    }

    pub fn room_status(&self, room: &str) -> Option<RoomStatus> {
        self.rooms.lock().get(room).map(|slot| slot.status(room))
    }

    /// Start recording `room` in the background
    pub fn start(self: &Arc<Self>, room: &str) -> StartOutcome {
        if !self.claim(room) {
            tracing::info!("Room {} is already being recorded", room);
            return StartOutcome::AlreadyRecording;
        }

        let bot = self.clone();
        let room = room.to_string();
        let span = tracing::info_span!("recording", room = %room, id = %Uuid::new_v4());
        tokio::spawn(
            async move {
                if let Err(e) = bot.run_claimed(&room).await {
                    tracing::error!("Recording of room {} failed: {}", room, e);
                }
            }
            .instrument(span),
        );

        StartOutcome::Started
    }

    /// Join `room` and record it until the room connection ends
    pub async fn record_room(&self, room: &str) -> RecorderResult<StartOutcome> {
        if !self.claim(room) {
            return Ok(StartOutcome::AlreadyRecording);
        }
        self.run_claimed(room).await?;
        Ok(StartOutcome::Started)
    }

    /// Close every encoder of every room and wait for the files to be
    /// finalized. Each room stops handling events and is left.
    pub async fn stop_all(&self) {
        let coordinators: Vec<RecordingCoordinator> = self
            .rooms
            .lock()
            .values()
            .filter_map(|slot| match slot {
                RoomSlot::Recording(coordinator) => Some(coordinator.clone()),
                RoomSlot::Joining => None,
            })
            .collect();
        for coordinator in coordinators {
            coordinator.shutdown().await;
        }
    }

    fn claim(&self, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        if rooms.contains_key(room) {
            return false;
        }
        rooms.insert(room.to_string(), RoomSlot::Joining);
        true
    }

    async fn run_claimed(&self, room: &str) -> RecorderResult<()> {
        let result = self.join_and_record(room).await;
        self.rooms.lock().remove(room);
        result
    }

    async fn join_and_record(&self, room: &str) -> RecorderResult<()> {
        let token = self.tokens.to_jwt(room)?;

        tracing::info!("Joining room {} at {}", room, self.config.livekit_url);
        let connection = match self.connector.connect(&self.config.livekit_url, &token).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to join room {}: {}", room, e);
                return Err(e);
            }
        };

        let writer = PipelineWriter::new(self.launcher.clone(), &self.config.recordings_dir);
        let coordinator = RecordingCoordinator::new(writer);
        self.rooms
            .lock()
            .insert(room.to_string(), RoomSlot::Recording(coordinator.clone()));

        tracing::info!(
            "Joined room {} with {} participants present",
            room,
            connection.participants.len()
        );
        for snapshot in connection.participants {
            coordinator.participant_connected(snapshot);
        }

        coordinator.run(connection.events).await;
        tracing::info!("Finished recording room {}", room);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Connector that hands out prepared connections

    use super::*;
    use crate::room::{ParticipantSnapshot, RoomConnection, RoomEvent};
    use crate::utils::error::RecorderError;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    #[derive(Default)]
    pub struct FakeConnector {
        pub tokens: Mutex<Vec<String>>,
        connections: Mutex<Vec<RoomConnection>>,
    }

    impl FakeConnector {
        /// Queue a connection; returns the sender driving its events
        pub fn prepare(&self, participants: Vec<ParticipantSnapshot>) -> mpsc::Sender<RoomEvent> {
            let (tx, rx) = mpsc::channel(16);
            self.connections.lock().push(RoomConnection {
                participants,
                events: rx,
            });
            tx
        }
    }

    #[async_trait]
    impl RoomConnector for FakeConnector {
        async fn connect(&self, _url: &str, token: &str) -> RecorderResult<RoomConnection> {
            self.tokens.lock().push(token.to_string());
            let mut connections = self.connections.lock();
            if connections.is_empty() {
                return Err(RecorderError::Room("connection refused".to_string()));
            }
            Ok(connections.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;
    use crate::encoder::pipeline::testing::FakeLauncher;
    use crate::media::track::testing::FakeTrack;
    use crate::media::{MediaKind, ParticipantId, RemoteMediaTrack};
    use crate::recorder::state::TrackPhase;
    use crate::room::{ParticipantSnapshot, RoomEvent};
    use crate::utils::error::RecorderError;
    use std::time::Duration;
    use tempfile::tempdir;

    fn bot(connector: Arc<FakeConnector>, dir: &std::path::Path) -> Arc<RecordingBot> {
        let config = BotConfig {
            api_key: "api-key".to_string(),
            api_secret: "secret-key".to_string(),
            recordings_dir: dir.to_path_buf(),
            ..BotConfig::default()
        };
        Arc::new(RecordingBot::new(config, connector, FakeLauncher::new()))
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let wait = async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_join_failure_creates_no_session() {
        let dir = tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let bot = bot(connector.clone(), dir.path());

        let result = bot.record_room("standup").await;
        assert!(matches!(result, Err(RecorderError::Room(_))));
        assert!(!bot.is_recording("standup"));
        assert!(bot.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_records_present_participants_until_disconnect() {
        let dir = tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let audio = FakeTrack::new("TR_A", MediaKind::Audio);
        let events = connector.prepare(vec![ParticipantSnapshot {
            participant: ParticipantId::new("PA_1"),
            tracks: vec![audio.clone() as Arc<dyn RemoteMediaTrack>],
        }]);
        let bot = bot(connector.clone(), dir.path());

        assert_eq!(bot.start("standup"), StartOutcome::Started);
        assert_eq!(bot.start("standup"), StartOutcome::AlreadyRecording);

        eventually(|| {
            bot.rooms()
                .first()
                .is_some_and(|status| status.joined && !status.sessions.is_empty())
        })
        .await;
        let status = bot.rooms();
        assert_eq!(status[0].room, "standup");
        let session = &status[0].sessions[0];
        assert_eq!(session.participant, ParticipantId::new("PA_1"));
        assert_eq!(session.audio.as_ref().unwrap().phase, TrackPhase::Subscribed);

        let token = connector.tokens.lock()[0].clone();
        let claims = AccessToken::new("api-key", "secret-key", "recorder", 60)
            .verify(&token)
            .unwrap();
        assert_eq!(claims.video.room, "standup");
        assert!(claims.video.hidden);

        events
            .send(RoomEvent::Disconnected {
                reason: "room closed".to_string(),
            })
            .await
            .unwrap();
        eventually(|| !bot.is_recording("standup")).await;
        assert_eq!(audio.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_all_finalizes_encoders() {
        let dir = tempdir().unwrap();
        let connector = Arc::new(FakeConnector::default());
        let video = FakeTrack::new("TR_V", MediaKind::Video);
        let events = connector.prepare(vec![ParticipantSnapshot {
            participant: ParticipantId::new("PA_1"),
            tracks: vec![video.clone() as Arc<dyn RemoteMediaTrack>],
        }]);
        let launcher = FakeLauncher::new();
        let config = BotConfig {
            recordings_dir: dir.path().to_path_buf(),
            ..BotConfig::default()
        };
        let bot = Arc::new(RecordingBot::new(config, connector, launcher.clone()));

        bot.start("standup");
        eventually(|| bot.rooms().first().is_some_and(|status| !status.sessions.is_empty())).await;
        assert!(video.frame(8, 8).await);
        eventually(|| launcher.runs().len() == 1).await;
        eventually(|| {
            bot.rooms()[0].sessions[0]
                .video
                .as_ref()
                .is_some_and(|track| track.phase == TrackPhase::Recording)
        })
        .await;

        bot.stop_all().await;
        assert_eq!(video.stop_count(), 1);
        assert!(launcher.runs()[0].saw_eof.load(std::sync::atomic::Ordering::SeqCst));

        // The room loop ends even though the room never disconnected
        eventually(|| !bot.is_recording("standup")).await;
        let late = FakeTrack::new("TR_LATE", MediaKind::Video);
        let sent = events
            .send(RoomEvent::TrackSubscribed {
                participant: ParticipantId::new("PA_2"),
                track: late,
            })
            .await;
        assert!(sent.is_err());
        assert_eq!(launcher.runs().len(), 1);
    }
}
