//! Hardware encoder boundary.

use framecast_common::config::{AudioDefaults, RenderDefaults};
use framecast_common::error::FramecastResult;
use framecast_media_model::{AudioData, EncodeJob};
use futures::future::BoxFuture;

use crate::mux::PacketSink;

/// Video encoder setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub framerate: u32,
}

impl VideoEncoderConfig {
    pub fn new(defaults: &RenderDefaults, width: u32, height: u32, fps: u32) -> Self {
        Self {
            codec: defaults.video_codec.clone(),
            width,
            height,
            bitrate: defaults.video_bitrate,
            framerate: fps,
        }
    }
}

/// Audio encoder setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl From<&AudioDefaults> for AudioEncoderConfig {
    fn from(defaults: &AudioDefaults) -> Self {
        Self {
            codec: defaults.codec.clone(),
            sample_rate: defaults.sample_rate,
            channels: defaults.channels,
            bitrate: defaults.bitrate,
        }
    }
}

/// Capability interface over an opaque hardware video encoder.
pub trait VideoEncoder: Send {
    /// Configure, delivering packets into `output`.
    fn configure(&mut self, config: &VideoEncoderConfig, output: PacketSink) -> FramecastResult<()>;

    /// Submit one composite frame; the job is owned by the encoder afterwards.
    fn encode(&mut self, job: EncodeJob) -> FramecastResult<()>;

    /// Frames submitted but not yet encoded.
    fn encode_queue_size(&self) -> usize;

    /// Resolves once every submitted frame has been delivered as a packet.
    fn flush(&mut self) -> BoxFuture<'static, FramecastResult<()>>;

    fn close(&mut self);
}

/// Capability interface over an audio encoder.
pub trait AudioEncoder: Send {
    fn configure(&mut self, config: &AudioEncoderConfig, output: PacketSink) -> FramecastResult<()>;

    fn encode(&mut self, data: AudioData) -> FramecastResult<()>;

    fn flush(&mut self) -> BoxFuture<'static, FramecastResult<()>>;

    fn close(&mut self);
}
