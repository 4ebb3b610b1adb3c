//! Media type definitions
//!
//! Transport-agnostic types describing participants, tracks and raw payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a room participant for the duration of their membership
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Both kinds, in teardown order
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// File extension of the recorded container
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "ogg",
            MediaKind::Video => "mp4",
        }
    }

    /// Subdirectory of the recordings root holding this kind
    pub fn directory(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audios",
            MediaKind::Video => "videos",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded video frame in packed planar I420 (yuv420p) layout
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Byte length of a tightly packed I420 frame of the given size
    pub fn i420_len(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
        luma + 2 * chroma
    }

    /// Pack strided Y, U and V planes into a tight I420 frame
    pub fn from_planes(width: u32, height: u32, planes: [(&[u8], u32); 3]) -> Self {
        let mut data = Vec::with_capacity(Self::i420_len(width, height));
        for (index, (plane, stride)) in planes.into_iter().enumerate() {
            let (row_len, rows) = if index == 0 {
                (width as usize, height as usize)
            } else {
                (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
            };
            for row in plane.chunks(stride.max(1) as usize).take(rows) {
                data.extend_from_slice(&row[..row_len.min(row.len())]);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }
}

/// A batch of signed 16-bit little-endian mono PCM samples
#[derive(Debug, Clone)]
pub struct AudioSamples {
    pub data: Vec<u8>,
}

impl AudioSamples {
    /// Build a batch from native samples
    pub fn from_i16(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data }
    }
}

/// Raw media delivered by a track sink
#[derive(Debug, Clone)]
pub enum MediaPayload {
    Video(VideoFrame),
    Audio(AudioSamples),
}

impl MediaPayload {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaPayload::Video(_) => MediaKind::Video,
            MediaPayload::Audio(_) => MediaKind::Audio,
        }
    }

    /// Negotiated geometry, known only for video
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            MediaPayload::Video(frame) => Some(frame.resolution()),
            MediaPayload::Audio(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            MediaPayload::Video(frame) => frame.data,
            MediaPayload::Audio(samples) => samples.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::new(320, 240).to_string(), "320x240");
    }

    #[test]
    fn test_i420_len_odd_dimensions() {
        assert_eq!(VideoFrame::i420_len(4, 2), 8 + 2 * 2);
        // 3x3 rounds chroma up to 2x2
        assert_eq!(VideoFrame::i420_len(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_from_planes_drops_stride_padding() {
        // 4x2 luma with stride 6, 2x1 chroma with stride 4
        let y = [1, 1, 1, 1, 0, 0, 2, 2, 2, 2, 0, 0];
        let u = [3, 3, 0, 0];
        let v = [4, 4, 0, 0];
        let frame = VideoFrame::from_planes(4, 2, [(&y, 6), (&u, 4), (&v, 4)]);
        assert_eq!(frame.data, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 4, 4]);
        assert_eq!(frame.data.len(), VideoFrame::i420_len(4, 2));
    }

    #[test]
    fn test_audio_samples_little_endian() {
        let samples = AudioSamples::from_i16(&[1, -2]);
        assert_eq!(samples.data, vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_kind_naming() {
        assert_eq!(MediaKind::Video.extension(), "mp4");
        assert_eq!(MediaKind::Audio.directory(), "audios");
        assert_eq!(serde_json::to_string(&MediaKind::Audio).unwrap(), "\"audio\"");
    }
}
