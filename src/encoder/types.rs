//! Encoder types and configuration
//!
//! Fixed raw-input parameters, output naming and the per-process id source
//! used to keep recordings of the same participant from colliding.

use crate::media::{MediaKind, ParticipantId, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

/// Encoder parameters that are fixed for the whole process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderSettings {
    /// Path or name of the ffmpeg binary
    pub ffmpeg_path: String,
    /// Frame rate assumed for raw video input
    pub video_frame_rate: u32,
    /// Every video recording is normalized to this size
    pub video_output_size: Resolution,
    /// Video codec for the mp4 container
    pub video_codec: String,
    /// Sample rate of raw PCM input
    pub audio_sample_rate: u32,
    /// Channel count of raw PCM input
    pub audio_channels: u16,
    /// Audio codec for the ogg container
    pub audio_codec: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            video_frame_rate: 30,
            video_output_size: Resolution::new(320, 240),
            video_codec: "libx264".to_string(),
            audio_sample_rate: 48_000,
            audio_channels: 1,
            audio_codec: "libopus".to_string(),
        }
    }
}

/// One encoding job: where to write and what the raw input looks like
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderJob {
    pub kind: MediaKind,
    pub output_path: PathBuf,
    /// Negotiated input geometry; video only
    pub input_resolution: Option<Resolution>,
}

impl EncoderJob {
    /// Build the job for a participant's track under the recordings root
    pub fn for_track(
        root: &Path,
        kind: MediaKind,
        participant: &ParticipantId,
        input_resolution: Option<Resolution>,
        session_id: i64,
    ) -> Self {
        let participant = file_safe(participant.as_str());
        let file_name = match input_resolution {
            Some(resolution) => format!(
                "{}-{}-{}-{}.{}",
                kind,
                participant,
                resolution,
                session_id,
                kind.extension()
            ),
            None => format!("{}-{}-{}.{}", kind, participant, session_id, kind.extension()),
        };

        Self {
            kind,
            output_path: root.join(kind.directory()).join(file_name),
            input_resolution,
        }
    }
}

/// Participant ids come from the room service; keep them to one path segment
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Source of recording ids: millisecond timestamps, strictly increasing
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    last: AtomicI64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}
