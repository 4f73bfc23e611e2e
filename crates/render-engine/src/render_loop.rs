//! Fixed-cadence render/encode loop.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use framecast_common::clock::{FrameClock, RenderClock};
use framecast_common::config::RenderDefaults;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::{DecodedFrame, EncodeJob, PixelFormat, RenderJobConfig, VideoFrame};
use serde::Serialize;

use crate::encoder::VideoEncoder;

/// Resolved parameters of one render run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_secs: f64,

    /// Encoder queue depth above which submission pauses.
    pub encoder_queue_ceiling: usize,

    /// Interval between encoder queue checks while paused.
    pub backpressure_poll: Duration,

    pub keyframe_interval_secs: u32,
}

impl RenderSettings {
    pub fn new(job: &RenderJobConfig, defaults: &RenderDefaults) -> FramecastResult<Self> {
        let settings = Self {
            width: job.width,
            height: job.height,
            fps: job.fps,
            duration_secs: job.duration_secs,
            encoder_queue_ceiling: defaults.encoder_queue_ceiling,
            backpressure_poll: Duration::from_millis(defaults.backpressure_poll_ms.max(1)),
            keyframe_interval_secs: defaults.keyframe_interval_secs,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// The loop can only resume once the encoder queue drops below the
    /// ceiling, so a ceiling of zero would never resume.
    pub fn validate(&self) -> FramecastResult<()> {
        if self.encoder_queue_ceiling == 0 {
            return Err(FramecastError::configuration(
                "encoder queue ceiling must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn clock(&self) -> FrameClock {
        FrameClock::new(self.fps)
    }

    /// Index of the last tick; the loop runs `0..=total_frames`.
    pub fn total_frames(&self) -> u64 {
        self.clock().total_frames(self.duration_secs)
    }
}

/// What the compositor is asked to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub current_frame: u64,
    pub total_frames: u64,
    /// Seconds.
    pub current_time: f64,
    /// Seconds.
    pub total_time: f64,
}

/// Shared RGBA composite surface.
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; PixelFormat::Rgba8.buffer_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Fill a rectangle, clipped to the surface.
    pub fn fill_rect(&mut self, x: i64, y: i64, width: u32, height: u32, rgba: [u8; 4]) {
        let Some((x0, y0, x1, y1)) = self.clip(x, y, width, height) else {
            return;
        };
        let stride = self.width as usize * 4;
        for row in y0..y1 {
            let start = row * stride + x0 * 4;
            let end = row * stride + x1 * 4;
            for px in self.pixels[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Copy an RGBA frame onto the surface with its top-left at `(x, y)`.
    pub fn blit(&mut self, frame: &DecodedFrame, x: i64, y: i64) -> FramecastResult<()> {
        if frame.format != PixelFormat::Rgba8 {
            return Err(FramecastError::configuration(format!(
                "cannot composite {:?} frames",
                frame.format
            )));
        }
        let expected = PixelFormat::Rgba8.buffer_len(frame.width, frame.height);
        if frame.pixels.len() < expected {
            return Err(FramecastError::configuration(format!(
                "frame buffer holds {} bytes, {}x{} needs {expected}",
                frame.pixels.len(),
                frame.width,
                frame.height
            )));
        }
        let Some((x0, y0, x1, y1)) = self.clip(x, y, frame.width, frame.height) else {
            return Ok(());
        };

        let dst_stride = self.width as usize * 4;
        let src_stride = frame.width as usize * 4;
        let src_x = (x0 as i64 - x) as usize;
        let row_len = (x1 - x0) * 4;
        for row in y0..y1 {
            let src_row = (row as i64 - y) as usize;
            let src = src_row * src_stride + src_x * 4;
            let dst = row * dst_stride + x0 * 4;
            self.pixels[dst..dst + row_len].copy_from_slice(&frame.pixels[src..src + row_len]);
        }
        Ok(())
    }

    /// Copy of the current contents, owned by the encode job.
    pub fn snapshot(&self) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba8,
            pixels: Bytes::copy_from_slice(&self.pixels),
        }
    }

    fn clip(&self, x: i64, y: i64, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + i64::from(width)).min(i64::from(self.width));
        let y1 = (y + i64::from(height)).min(i64::from(self.height));
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0 as usize, y0 as usize, x1 as usize, y1 as usize))
    }
}

/// Draws one output frame.
///
/// Implementations pull frames from decode pipelines and must drop every
/// frame they consume before returning.
#[async_trait]
pub trait Compositor: Send {
    async fn render_tick(&mut self, tick: &TickContext, surface: &mut Surface) -> FramecastResult<()>;
}

/// Progress callback for rendering.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send + Sync>;

/// Render progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    pub frames_rendered: u64,

    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    pub stage: RenderStage,
}

/// Stages of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
    Failed,
}

pub(crate) fn report(progress: Option<&ProgressCallback>, update: RenderProgress) {
    if let Some(cb) = progress {
        cb(update);
    }
}

/// Outcome of the video half of a render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoopReport {
    pub frames: u64,
    pub keyframes: u64,
    /// Times the loop paused for the encoder.
    pub backpressure_waits: u64,
    pub average_tick_ms: f64,
}

/// Run every tick through `compositor` into the configured `encoder`, then
/// flush it.
pub async fn run_render_loop(
    settings: &RenderSettings,
    compositor: &mut dyn Compositor,
    encoder: &mut dyn VideoEncoder,
    progress: Option<&ProgressCallback>,
) -> FramecastResult<LoopReport> {
    settings.validate()?;
    let clock = settings.clock();
    let total_frames = settings.total_frames();
    let ticks = total_frames + 1;
    let total_time = clock.tick_secs(total_frames);
    let stopwatch = RenderClock::start();
    let mut surface = Surface::new(settings.width, settings.height);
    let mut report = LoopReport::default();
    let mut tick_time = Duration::ZERO;

    tracing::info!(
        ticks,
        fps = settings.fps,
        width = settings.width,
        height = settings.height,
        ceiling = settings.encoder_queue_ceiling,
        "Render loop started"
    );

    for i in 0..=total_frames {
        if wait_for_encoder(encoder, settings.encoder_queue_ceiling, settings.backpressure_poll).await {
            report.backpressure_waits += 1;
        }

        let started = Instant::now();
        let tick = TickContext {
            current_frame: i,
            total_frames,
            current_time: clock.tick_secs(i),
            total_time,
        };
        compositor.render_tick(&tick, &mut surface).await?;

        let key_frame = clock.is_keyframe(i, settings.keyframe_interval_secs);
        encoder.encode(EncodeJob {
            frame: surface.snapshot(),
            timestamp_us: clock.tick_timestamp_us(i),
            duration_us: clock.frame_duration_us(),
            key_frame,
        })?;
        tick_time += started.elapsed();

        report.frames += 1;
        if key_frame {
            report.keyframes += 1;
        }
        tracing::trace!(frame = i, key_frame, queue = encoder.encode_queue_size(), "Tick submitted");

        report_progress(progress, &stopwatch, report.frames, ticks, RenderStage::Rendering);
    }

    report_progress(progress, &stopwatch, report.frames, ticks, RenderStage::Encoding);
    encoder.flush().await?;

    report.average_tick_ms = tick_time.as_secs_f64() * 1000.0 / ticks as f64;
    tracing::info!(
        frames = report.frames,
        keyframes = report.keyframes,
        backpressure_waits = report.backpressure_waits,
        average_tick_ms = format!("{:.2}", report.average_tick_ms),
        "Video encode complete"
    );
    Ok(report)
}

/// Pause while the encoder queue is above `ceiling`, resuming once it drops
/// below. Returns whether the loop had to wait.
async fn wait_for_encoder(encoder: &mut dyn VideoEncoder, ceiling: usize, poll: Duration) -> bool {
    if encoder.encode_queue_size() <= ceiling {
        return false;
    }
    tracing::debug!(queue = encoder.encode_queue_size(), ceiling, "Encoder backpressure");
    while encoder.encode_queue_size() >= ceiling {
        tokio::time::sleep(poll).await;
    }
    true
}

fn report_progress(
    progress: Option<&ProgressCallback>,
    stopwatch: &RenderClock,
    done: u64,
    total: u64,
    stage: RenderStage,
) {
    report(
        progress,
        RenderProgress {
            progress: if total == 0 { 1.0 } else { done as f64 / total as f64 },
            frames_rendered: done,
            total_frames: total,
            eta_secs: stopwatch.eta_secs(done, total),
            stage,
        },
    );
}
