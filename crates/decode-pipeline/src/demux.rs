//! Container demuxer boundary.
//!
//! The demuxer itself lives in an external library. The pipeline only needs
//! the contract below: bytes go in by stream offset, track metadata comes out
//! once, then sample batches come out as extraction proceeds.

use bytes::Bytes;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::{avc_decoder_config_from_sample, EncodedSample, MediaTrack, TrackInfo};
use tokio::sync::mpsc;

/// Events emitted by a demuxer.
#[derive(Debug)]
pub enum DemuxEvent {
    /// Header parsed. Emitted exactly once.
    Ready { tracks: Vec<MediaTrack> },

    /// One full extraction batch, or the remainder emitted by a flush.
    Samples(Vec<EncodedSample>),

    /// The container could not be parsed.
    Error(String),
}

/// Channel the demuxer emits its events into.
pub type DemuxEventSink = mpsc::UnboundedSender<DemuxEvent>;

/// Capability interface over an external container demuxer.
pub trait ContainerDemuxer: Send {
    /// Hand the demuxer the channel for its events. Called once, before any
    /// bytes are appended.
    fn attach(&mut self, events: DemuxEventSink);

    /// Append a fetched byte range that starts at `offset` in the stream.
    fn append_bytes(&mut self, bytes: Bytes, offset: u64) -> FramecastResult<()>;

    /// First sample of a track, carrying its sample description.
    fn first_sample(&self, track_id: u32) -> Option<EncodedSample>;

    /// Extract samples of `track_id` in batches of `batch_size`.
    fn set_extraction(&mut self, track_id: u32, batch_size: usize);

    /// Begin emitting sample batches.
    fn start(&mut self);

    /// Discard retained samples of `track_id` up to and including `sequence`.
    fn release_samples(&mut self, track_id: u32, sequence: u64);

    /// Samples extracted but not yet emitted. Fewer than a batch means
    /// extraction is starved and more bytes are needed.
    fn pending_samples(&self) -> usize;

    /// Emit every remaining buffered sample. Called at end of input.
    ///
    /// All remaining samples must be sent before this returns: the pipeline
    /// starts the decoder flush right after, and samples arriving later are
    /// dropped.
    fn flush(&mut self);
}

/// Choose the track to decode and derive its decoder configuration.
///
/// The first video track wins. Codecs that carry parameters out of band
/// need a configuration record built from the first sample.
pub fn select_video_track(
    tracks: &[MediaTrack],
    demuxer: &dyn ContainerDemuxer,
) -> FramecastResult<TrackInfo> {
    let track = tracks
        .iter()
        .find(|track| track.is_video())
        .ok_or_else(|| FramecastError::configuration("source has no video track"))?;

    let description = demuxer
        .first_sample(track.id)
        .as_ref()
        .and_then(avc_decoder_config_from_sample);

    if track.requires_description() && description.is_none() {
        return Err(FramecastError::configuration(format!(
            "track {} ({}) has no usable decoder configuration",
            track.id, track.codec
        )));
    }

    Ok(TrackInfo::from_track(track, description))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use framecast_media_model::{AvcParameterSets, SampleDescription, SampleKind, TrackKind};

    use super::*;

    struct HeaderOnly {
        first: Option<EncodedSample>,
    }

    impl ContainerDemuxer for HeaderOnly {
        fn attach(&mut self, _events: DemuxEventSink) {}
        fn append_bytes(&mut self, _bytes: Bytes, _offset: u64) -> FramecastResult<()> {
            Ok(())
        }
        fn first_sample(&self, _track_id: u32) -> Option<EncodedSample> {
            self.first.clone()
        }
        fn set_extraction(&mut self, _track_id: u32, _batch_size: usize) {}
        fn start(&mut self) {}
        fn release_samples(&mut self, _track_id: u32, _sequence: u64) {}
        fn pending_samples(&self) -> usize {
            0
        }
        fn flush(&mut self) {}
    }

    fn track(id: u32, kind: TrackKind, codec: &str) -> MediaTrack {
        MediaTrack {
            id,
            kind,
            codec: codec.to_string(),
            timescale: 30_000,
            sample_count: 300,
            width: 1280,
            height: 720,
        }
    }

    fn avc_sample() -> EncodedSample {
        EncodedSample {
            track_id: 2,
            sequence: 0,
            kind: SampleKind::Key,
            dts: 0,
            cts: 0,
            duration: 1001,
            timescale: 30_000,
            data: Bytes::new(),
            description: Some(Arc::new(SampleDescription {
                avc: Some(AvcParameterSets {
                    sps: vec![Bytes::from_static(&[0x67, 0x64, 0x00, 0x1F])],
                    pps: vec![Bytes::from_static(&[0x68, 0xEE])],
                }),
            })),
        }
    }

    #[test]
    fn test_selects_first_video_track_with_record() {
        let tracks = vec![
            track(1, TrackKind::Audio, "mp4a.40.2"),
            track(2, TrackKind::Video, "avc1.64001f"),
        ];
        let demuxer = HeaderOnly {
            first: Some(avc_sample()),
        };
        let info = select_video_track(&tracks, &demuxer).unwrap();
        assert_eq!(info.track_id, 2);
        assert_eq!(info.sample_count, 300);
        assert_eq!(info.description.as_ref().map(|d| d[0]), Some(0x01));
    }

    #[test]
    fn test_missing_video_track_is_configuration_error() {
        let tracks = vec![track(1, TrackKind::Audio, "opus")];
        let err = select_video_track(&tracks, &HeaderOnly { first: None }).unwrap_err();
        assert!(matches!(err, FramecastError::Configuration { .. }));
    }

    #[test]
    fn test_avc_without_parameter_sets_is_rejected() {
        let tracks = vec![track(1, TrackKind::Video, "avc1.640028")];
        let err = select_video_track(&tracks, &HeaderOnly { first: None }).unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_in_band_codec_needs_no_record() {
        let tracks = vec![track(1, TrackKind::Video, "vp09.00.10.08")];
        let info = select_video_track(&tracks, &HeaderOnly { first: None }).unwrap();
        assert!(info.description.is_none());
    }
}
