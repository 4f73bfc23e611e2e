//! Hardware video decoder boundary.

use framecast_common::error::FramecastResult;
use framecast_media_model::{DecodedFrame, EncodedChunk, TrackInfo};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Output delivered by a decoder.
#[derive(Debug)]
pub enum DecoderOutput {
    Frame(DecodedFrame),
    /// The decoder reported an internal error.
    Error(String),
}

/// Channel decoded frames are delivered into.
pub type DecoderOutputSink = mpsc::UnboundedSender<DecoderOutput>;

/// Capability interface over an opaque hardware decoder.
///
/// Implementations stall internally once too many decoded frames are
/// outstanding; releasing frames is what lets them make progress again.
pub trait VideoDecoder: Send {
    /// Configure for `track`, delivering frames into `output`.
    fn configure(&mut self, track: &TrackInfo, output: DecoderOutputSink) -> FramecastResult<()>;

    /// Submit one encoded chunk.
    fn decode(&mut self, chunk: EncodedChunk) -> FramecastResult<()>;

    /// Chunks submitted but not yet decoded.
    fn decode_queue_size(&self) -> usize;

    /// Deliver every in-flight frame.
    ///
    /// The returned future resolves once all frames have been sent to the
    /// output. It must not borrow the decoder: the pipeline keeps handling
    /// consumers (and releasing frames) while it waits.
    fn flush(&mut self) -> BoxFuture<'static, FramecastResult<()>>;

    /// Release decoder resources. Further calls are no-ops.
    fn close(&mut self);
}
