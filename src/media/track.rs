//! Track sinks
//!
//! A [`RemoteMediaTrack`] is the frame source boundary: attaching to it starts
//! raw decoding and yields a [`MediaFeed`]. The attachment handle is wrapped
//! in a [`TrackSink`] that the session table owns.

use super::types::{MediaKind, MediaPayload, ParticipantId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle to a live decode attachment
pub trait SinkAttachment: Send + Sync {
    /// Release the attachment. Called at most once per sink.
    fn stop(&self);
}

/// Raw payload stream plus the attachment producing it
pub struct MediaFeed {
    pub payloads: mpsc::Receiver<MediaPayload>,
    pub attachment: Box<dyn SinkAttachment>,
}

/// A subscribed remote track that can deliver raw frames or samples
pub trait RemoteMediaTrack: Send + Sync {
    /// Transport-assigned track identifier
    fn sid(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Start decoding and return the payload feed
    fn attach(&self) -> MediaFeed;
}

impl fmt::Debug for dyn RemoteMediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMediaTrack")
            .field("sid", &self.sid())
            .field("kind", &self.kind())
            .finish()
    }
}

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a sink
pub type SinkId = u64;

struct SinkInner {
    attachment: Box<dyn SinkAttachment>,
    stopped: AtomicBool,
}

/// Attached raw-media consumer bound to one track of one participant
#[derive(Clone)]
pub struct TrackSink {
    id: SinkId,
    kind: MediaKind,
    participant: ParticipantId,
    track_sid: String,
    inner: Arc<SinkInner>,
}

impl TrackSink {
    pub fn new(
        kind: MediaKind,
        participant: ParticipantId,
        track_sid: impl Into<String>,
        attachment: Box<dyn SinkAttachment>,
    ) -> Self {
        Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            participant,
            track_sid: track_sid.into(),
            inner: Arc::new(SinkInner {
                attachment,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn track_sid(&self) -> &str {
        &self.track_sid
    }

    /// Release the decode attachment; later calls are no-ops
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            "Stopping {} sink {} for participant {}",
            self.kind,
            self.id,
            self.participant
        );
        self.inner.attachment.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same sink instance
    pub fn same_instance(&self, other: &TrackSink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TrackSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSink")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("participant", &self.participant)
            .field("track_sid", &self.track_sid)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory tracks for exercising the recorder without a room

    use super::*;
    use crate::media::types::{AudioSamples, VideoFrame};
    use parking_lot::Mutex;

    /// Attachment that counts how often it was stopped
    pub struct CountingAttachment {
        pub stops: Arc<AtomicU64>,
        sender: Arc<Mutex<Option<mpsc::Sender<MediaPayload>>>>,
    }

    impl SinkAttachment for CountingAttachment {
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            // Closing the feed ends the listener
            self.sender.lock().take();
        }
    }

    /// Track whose payloads are pushed by the test
    pub struct FakeTrack {
        sid: String,
        kind: MediaKind,
        pub stops: Arc<AtomicU64>,
        sender: Arc<Mutex<Option<mpsc::Sender<MediaPayload>>>>,
        pending: Mutex<Option<mpsc::Receiver<MediaPayload>>>,
    }

    impl FakeTrack {
        pub fn new(sid: &str, kind: MediaKind) -> Arc<Self> {
            let (tx, rx) = mpsc::channel(64);
            Arc::new(Self {
                sid: sid.to_string(),
                kind,
                stops: Arc::new(AtomicU64::new(0)),
                sender: Arc::new(Mutex::new(Some(tx))),
                pending: Mutex::new(Some(rx)),
            })
        }

        /// Deliver a payload; returns false once the sink was stopped
        pub async fn deliver(&self, payload: MediaPayload) -> bool {
            let sender = self.sender.lock().clone();
            match sender {
                Some(tx) => tx.send(payload).await.is_ok(),
                None => false,
            }
        }

        pub async fn frame(&self, width: u32, height: u32) -> bool {
            let data = vec![0x10; VideoFrame::i420_len(width, height)];
            self.deliver(MediaPayload::Video(VideoFrame {
                width,
                height,
                data,
            }))
            .await
        }

        pub async fn samples(&self, count: usize) -> bool {
            self.deliver(MediaPayload::Audio(AudioSamples::from_i16(&vec![7; count])))
                .await
        }

        pub fn stop_count(&self) -> u64 {
            self.stops.load(Ordering::SeqCst)
        }
    }

    impl RemoteMediaTrack for FakeTrack {
        fn sid(&self) -> &str {
            &self.sid
        }

        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn attach(&self) -> MediaFeed {
            let payloads = self.pending.lock().take().unwrap_or_else(|| {
                // Re-attaching a fake track yields a fresh, already closed feed
                let (_tx, rx) = mpsc::channel(1);
                rx
            });
            MediaFeed {
                payloads,
                attachment: Box::new(CountingAttachment {
                    stops: self.stops.clone(),
                    sender: self.sender.clone(),
                }),
            }
        }
    }
}
