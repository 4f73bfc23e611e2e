//! Decoded frames and encode jobs.
//!
//! A [`DecodedFrame`] owns a decoder output surface. The surface is handed
//! back to its producer exactly once: when the frame is closed or dropped,
//! whichever happens first. Ownership moves with the value, so a frame
//! discarded by the seek filter, left in a cache at shutdown, or used by a
//! consumer is released by whoever holds it at that point.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Nv12,
    I420,
}

impl PixelFormat {
    /// Buffer size in bytes for a frame of the given dimensions.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba8 | Self::Bgra8 => pixels * 4,
            Self::Nv12 | Self::I420 => pixels + 2 * (pixels.div_ceil(4)),
        }
    }
}

/// Callback returning a frame's surface to its producer.
pub type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// A frame produced by a video decoder.
pub struct DecodedFrame {
    /// Presentation timestamp in track timescale units.
    pub timestamp: i64,

    pub timescale: u32,

    /// Duration in track timescale units.
    pub duration: u32,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Bytes,

    release: Option<ReleaseHook>,
}

impl DecodedFrame {
    pub fn new(
        timestamp: i64,
        timescale: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Bytes,
    ) -> Self {
        Self {
            timestamp,
            timescale,
            duration: 0,
            width,
            height,
            format,
            pixels,
            release: None,
        }
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration;
        self
    }

    /// Attach the hook invoked when this frame is released.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Presentation time in seconds.
    pub fn presentation_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.timestamp as f64 / self.timescale as f64
    }

    /// Release the frame back to its producer.
    pub fn close(self) {
        drop(self);
    }

    fn release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("timestamp", &self.timestamp)
            .field("timescale", &self.timescale)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Raw frame captured from the composite surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Bytes,
}

/// One composite frame handed to the video encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub frame: VideoFrame,

    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,

    /// Duration in microseconds.
    pub duration_us: u64,

    /// Force an independently decodable frame.
    pub key_frame: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn tracked_frame(counter: &Arc<AtomicUsize>) -> DecodedFrame {
        let counter = counter.clone();
        DecodedFrame::new(
            3003,
            30_000,
            4,
            2,
            PixelFormat::Rgba8,
            Bytes::from(vec![0u8; 32]),
        )
        .with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_close_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let frame = tracked_frame(&releases);
        assert!((frame.presentation_secs() - 0.1001).abs() < 1e-9);
        frame.close();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let frames: Vec<_> = (0..3).map(|_| tracked_frame(&releases)).collect();
            assert_eq!(frames.len(), 3);
        }
        assert_eq!(releases.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_buffer_len() {
        assert_eq!(PixelFormat::Rgba8.buffer_len(4, 2), 32);
        assert_eq!(PixelFormat::Nv12.buffer_len(4, 2), 12);
        assert_eq!(PixelFormat::I420.buffer_len(3, 3), 9 + 2 * 3);
    }
}
