//! Demuxed tracks and encoded samples.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Kind of media carried by a container track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// Track metadata as reported by the container demuxer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: u32,
    pub kind: TrackKind,

    /// Codec string, e.g. `avc1.64001f`.
    pub codec: String,

    /// Ticks per second for timestamps on this track.
    pub timescale: u32,

    /// Total number of samples in the track.
    pub sample_count: u64,

    /// Coded dimensions (zero for non-visual tracks).
    pub width: u32,
    pub height: u32,
}

impl MediaTrack {
    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }

    /// Whether the codec family needs an out-of-band configuration record.
    pub fn requires_description(&self) -> bool {
        self.codec.starts_with("avc1") || self.codec.starts_with("avc3")
    }
}

/// Parameter sets carried in the sample description of an AVC track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvcParameterSets {
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

/// Codec-specific description attached to samples by the demuxer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleDescription {
    /// Present for AVC tracks whose parameter sets live in the container.
    pub avc: Option<AvcParameterSets>,
}

/// Whether a sample can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Key,
    Delta,
}

/// One encoded access unit extracted from the container.
///
/// The demuxer keeps its own copy until told to release it by sequence
/// number; ownership of this value moves to the decoder on submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub track_id: u32,

    /// Zero-based position of the sample within its track.
    pub sequence: u64,

    pub kind: SampleKind,

    /// Decode timestamp in track timescale units.
    pub dts: i64,

    /// Composition timestamp in track timescale units.
    pub cts: i64,

    /// Duration in track timescale units.
    pub duration: u32,

    pub timescale: u32,

    pub data: Bytes,

    pub description: Option<Arc<SampleDescription>>,
}

impl EncodedSample {
    pub fn is_key(&self) -> bool {
        self.kind == SampleKind::Key
    }
}

/// Track selected for decoding, with its derived decoder configuration.
///
/// Produced once when the container header is parsed; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_id: u32,
    pub codec: String,
    pub timescale: u32,
    pub sample_count: u64,
    pub width: u32,
    pub height: u32,

    /// Decoder configuration record, absent when parameters are in-band.
    pub description: Option<Bytes>,
}

impl TrackInfo {
    pub fn from_track(track: &MediaTrack, description: Option<Bytes>) -> Self {
        Self {
            track_id: track.id,
            codec: track.codec.clone(),
            timescale: track.timescale,
            sample_count: track.sample_count,
            width: track.width,
            height: track.height,
            description,
        }
    }
}

/// Encoded chunk submitted to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub kind: SampleKind,

    /// Timestamp in track timescale units (the sample's decode timestamp).
    pub timestamp: i64,

    pub duration: u32,

    pub data: Bytes,
}

impl From<EncodedSample> for EncodedChunk {
    fn from(sample: EncodedSample) -> Self {
        Self {
            kind: sample.kind,
            timestamp: sample.dts,
            duration: sample.duration,
            data: sample.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u64, kind: SampleKind) -> EncodedSample {
        EncodedSample {
            track_id: 1,
            sequence,
            kind,
            dts: sequence as i64 * 512,
            cts: sequence as i64 * 512 + 1024,
            duration: 512,
            timescale: 12_288,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x65]),
            description: None,
        }
    }

    #[test]
    fn test_chunk_takes_decode_timestamp() {
        let chunk = EncodedChunk::from(sample(3, SampleKind::Delta));
        assert_eq!(chunk.timestamp, 1536);
        assert_eq!(chunk.duration, 512);
        assert_eq!(chunk.kind, SampleKind::Delta);
    }

    #[test]
    fn test_avc_tracks_require_description() {
        let track = MediaTrack {
            id: 1,
            kind: TrackKind::Video,
            codec: "avc1.640028".to_string(),
            timescale: 90_000,
            sample_count: 300,
            width: 1280,
            height: 720,
        };
        assert!(track.requires_description());
        assert!(track.is_video());

        let vp9 = MediaTrack {
            codec: "vp09.00.10.08".to_string(),
            ..track
        };
        assert!(!vp9.requires_description());
    }

    #[test]
    fn test_track_info_copies_metadata() {
        let track = MediaTrack {
            id: 2,
            kind: TrackKind::Video,
            codec: "avc1.4d401f".to_string(),
            timescale: 24_000,
            sample_count: 48,
            width: 640,
            height: 360,
        };
        let info = TrackInfo::from_track(&track, Some(Bytes::from_static(&[1, 2, 3])));
        assert_eq!(info.track_id, 2);
        assert_eq!(info.sample_count, 48);
        assert_eq!(info.description.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(sample(0, SampleKind::Key).is_key());
    }
}
