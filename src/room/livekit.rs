//! LiveKit room transport
//!
//! Maps SDK room events onto [`RoomEvent`] and decodes subscribed tracks into
//! raw I420 frames and 48 kHz mono PCM.

use super::{ParticipantSnapshot, RoomConnection, RoomConnector, RoomEvent};
use crate::media::{
    AudioSamples, MediaFeed, MediaKind, MediaPayload, ParticipantId, RemoteMediaTrack,
    SinkAttachment, VideoFrame,
};
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use livekit::prelude::{
    RemoteAudioTrack, RemoteParticipant, RemoteTrack, RemoteVideoTrack, Room,
    RoomEvent as SdkEvent, RoomOptions,
};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::webrtc::prelude::VideoBuffer;
use livekit::webrtc::video_stream::native::NativeVideoStream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const AUDIO_SAMPLE_RATE: i32 = 48_000;
const AUDIO_CHANNELS: i32 = 1;
const FEED_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Joins rooms on a LiveKit server
#[derive(Debug, Default, Clone)]
pub struct LiveKitConnector;

#[async_trait]
impl RoomConnector for LiveKitConnector {
    async fn connect(&self, url: &str, token: &str) -> RecorderResult<RoomConnection> {
        let mut options = RoomOptions::default();
        options.auto_subscribe = true;

        let (room, mut sdk_events) = Room::connect(url, token, options)
            .await
            .map_err(|e| RecorderError::Room(e.to_string()))?;
        tracing::info!("Connected to room {}", room.name());

        let participants = room
            .remote_participants()
            .values()
            .map(snapshot)
            .collect();

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = sdk_events.recv() => event,
                };
                let Some(event) = event else {
                    let _ = tx
                        .send(RoomEvent::Disconnected {
                            reason: "event stream closed".to_string(),
                        })
                        .await;
                    break;
                };
                let Some(event) = map_event(event) else {
                    continue;
                };
                let last = matches!(event, RoomEvent::Disconnected { .. });
                if tx.send(event).await.is_err() || last {
                    break;
                }
            }
            if let Err(e) = room.close().await {
                tracing::warn!("Failed to leave room cleanly: {}", e);
            }
        });

        Ok(RoomConnection {
            participants,
            events: rx,
        })
    }
}

fn participant_id(participant: &RemoteParticipant) -> ParticipantId {
    ParticipantId::new(participant.sid().to_string())
}

fn snapshot(participant: &RemoteParticipant) -> ParticipantSnapshot {
    let tracks = participant
        .track_publications()
        .values()
        .filter(|publication| publication.is_subscribed())
        .filter_map(|publication| publication.track())
        .map(media_track)
        .collect();
    ParticipantSnapshot {
        participant: participant_id(participant),
        tracks,
    }
}

fn media_track(track: RemoteTrack) -> Arc<dyn RemoteMediaTrack> {
    match track {
        RemoteTrack::Audio(track) => Arc::new(LiveKitAudioTrack {
            sid: track.sid().to_string(),
            track,
        }),
        RemoteTrack::Video(track) => Arc::new(LiveKitVideoTrack {
            sid: track.sid().to_string(),
            track,
        }),
    }
}

fn map_event(event: SdkEvent) -> Option<RoomEvent> {
    match event {
        SdkEvent::ParticipantConnected(participant) => {
            Some(RoomEvent::ParticipantConnected(snapshot(&participant)))
        }
        SdkEvent::ParticipantDisconnected(participant) => {
            Some(RoomEvent::ParticipantDisconnected {
                participant: participant_id(&participant),
            })
        }
        SdkEvent::TrackSubscribed {
            track, participant, ..
        } => Some(RoomEvent::TrackSubscribed {
            participant: participant_id(&participant),
            track: media_track(track),
        }),
        SdkEvent::TrackUnsubscribed {
            track, participant, ..
        } => {
            let (kind, track_sid) = match &track {
                RemoteTrack::Audio(track) => (MediaKind::Audio, track.sid().to_string()),
                RemoteTrack::Video(track) => (MediaKind::Video, track.sid().to_string()),
            };
            Some(RoomEvent::TrackUnsubscribed {
                participant: participant_id(&participant),
                kind,
                track_sid,
            })
        }
        SdkEvent::Disconnected { reason } => Some(RoomEvent::Disconnected {
            reason: format!("{:?}", reason),
        }),
        _ => None,
    }
}

/// Stops a decode task
struct StreamAttachment {
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl SinkAttachment for StreamAttachment {
    fn stop(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

fn feed(
    spawn: impl FnOnce(mpsc::Sender<MediaPayload>, oneshot::Receiver<()>),
) -> MediaFeed {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let (stop_tx, stop_rx) = oneshot::channel();
    spawn(tx, stop_rx);
    MediaFeed {
        payloads: rx,
        attachment: Box::new(StreamAttachment {
            stop: Mutex::new(Some(stop_tx)),
        }),
    }
}

struct LiveKitVideoTrack {
    sid: String,
    track: RemoteVideoTrack,
}

impl RemoteMediaTrack for LiveKitVideoTrack {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn attach(&self) -> MediaFeed {
        let stream = NativeVideoStream::new(self.track.rtc_track());
        feed(|tx, stop| {
            tokio::spawn(forward_video(stream, tx, stop));
        })
    }
}

async fn forward_video(
    mut stream: NativeVideoStream,
    tx: mpsc::Sender<MediaPayload>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            _ = &mut stop => break,
            frame = stream.next() => frame,
        };
        let Some(frame) = frame else { break };

        let i420 = frame.buffer.to_i420();
        let (y, u, v) = i420.data();
        let (stride_y, stride_u, stride_v) = i420.strides();
        let payload = MediaPayload::Video(VideoFrame::from_planes(
            i420.width(),
            i420.height(),
            [(y, stride_y), (u, stride_u), (v, stride_v)],
        ));
        if tx.send(payload).await.is_err() {
            break;
        }
    }
    stream.close();
}

struct LiveKitAudioTrack {
    sid: String,
    track: RemoteAudioTrack,
}

impl RemoteMediaTrack for LiveKitAudioTrack {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn attach(&self) -> MediaFeed {
        let stream =
            NativeAudioStream::new(self.track.rtc_track(), AUDIO_SAMPLE_RATE, AUDIO_CHANNELS);
        feed(|tx, stop| {
            tokio::spawn(forward_audio(stream, tx, stop));
        })
    }
}

async fn forward_audio(
    mut stream: NativeAudioStream,
    tx: mpsc::Sender<MediaPayload>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            _ = &mut stop => break,
            frame = stream.next() => frame,
        };
        let Some(frame) = frame else { break };

        let payload = MediaPayload::Audio(AudioSamples::from_i16(&frame.data));
        if tx.send(payload).await.is_err() {
            break;
        }
    }
    stream.close();
}
