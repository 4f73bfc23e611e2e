//! Render job orchestration.

use std::sync::Arc;

use framecast_common::clock::RenderClock;
use framecast_common::config::AppConfig;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::RenderJobConfig;
use serde::Serialize;

use crate::audio::{AudioRenderer, AudioSourceLoader, MIX_CHANNELS};
use crate::encoder::{AudioEncoder, AudioEncoderConfig, VideoEncoder, VideoEncoderConfig};
use crate::mux::{ContainerMuxer, MuxSink, MuxTrack, MuxerConfig, StorageHandle};
use crate::render_loop::{
    report, run_render_loop, Compositor, ProgressCallback, RenderProgress, RenderSettings,
    RenderStage,
};

/// A render job ready to run.
pub struct RenderJob {
    pub config: RenderJobConfig,

    /// Draws every output frame.
    pub compositor: Box<dyn Compositor>,
}

/// Audio half of the encode backends.
pub struct AudioBackend {
    pub encoder: Box<dyn AudioEncoder>,
    pub loader: Arc<dyn AudioSourceLoader>,
}

/// Encoders, muxer and storage the output goes through.
pub struct EncodeBackends {
    pub video: Box<dyn VideoEncoder>,

    /// Required when the job has audio sources.
    pub audio: Option<AudioBackend>,

    pub muxer: Box<dyn ContainerMuxer>,
    pub storage: Box<dyn StorageHandle>,
}

/// Totals for a finished render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderReport {
    pub frames: u64,
    pub keyframes: u64,
    pub video_chunks: u64,
    pub audio_chunks: u64,
    pub bytes_written: u64,
    pub storage_writes: u64,
    pub elapsed_secs: f64,
    pub average_tick_ms: f64,
}

/// Render `job` into `backends.storage`.
///
/// Audio is mixed and encoded while the video loop runs; both feed one
/// mux sink, which is finalized once both encoders have flushed.
pub async fn render_video(
    job: RenderJob,
    backends: EncodeBackends,
    config: &AppConfig,
    progress: Option<ProgressCallback>,
) -> FramecastResult<RenderReport> {
    let result = run(job, backends, config, progress.as_ref()).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Render failed");
        report(
            progress.as_ref(),
            RenderProgress {
                progress: 0.0,
                frames_rendered: 0,
                total_frames: 0,
                eta_secs: 0.0,
                stage: RenderStage::Failed,
            },
        );
    }
    result
}

async fn run(
    job: RenderJob,
    backends: EncodeBackends,
    config: &AppConfig,
    progress: Option<&ProgressCallback>,
) -> FramecastResult<RenderReport> {
    let RenderJob {
        config: job,
        mut compositor,
    } = job;
    job.validate()
        .map_err(|e| FramecastError::configuration(e.to_string()))?;

    let settings = RenderSettings::new(&job, &config.render)?;
    let ticks = settings.total_frames() + 1;
    let stopwatch = RenderClock::start();
    stage(progress, RenderStage::Preparing, 0, ticks);

    let audio = match (job.audio.is_empty(), backends.audio) {
        (true, _) => None,
        (false, Some(audio)) => Some(audio),
        (false, None) => {
            return Err(FramecastError::configuration(
                "job has audio sources but no audio encoder",
            ));
        }
    };
    let mut audio_config = AudioEncoderConfig::from(&config.audio);
    audio_config.channels = MIX_CHANNELS;

    tracing::info!(
        width = job.width,
        height = job.height,
        fps = job.fps,
        duration = job.duration_secs,
        ticks,
        audio_sources = job.audio.len(),
        started = stopwatch.started_wall(),
        "Starting render"
    );

    let mux = MuxSink::spawn(
        backends.muxer,
        backends.storage,
        &MuxerConfig {
            video_codec: config.render.video_codec.clone(),
            width: job.width,
            height: job.height,
            audio_codec: audio.as_ref().map(|_| audio_config.codec.clone()),
            sample_rate: audio_config.sample_rate,
            channels: audio_config.channels,
            fast_start: config.mux.fast_start,
        },
        &config.mux,
    )?;

    let mut video = backends.video;
    video.configure(
        &VideoEncoderConfig::new(&config.render, job.width, job.height, job.fps),
        mux.packet_sink(MuxTrack::Video),
    )?;

    let video_path = async {
        let result = run_render_loop(&settings, compositor.as_mut(), video.as_mut(), progress).await;
        video.close();
        result
    };

    let audio_path = async {
        let Some(AudioBackend {
            mut encoder,
            loader,
        }) = audio
        else {
            tracing::info!("No audio sources; skipping audio track");
            return Ok(());
        };
        let result = async {
            encoder.configure(&audio_config, mux.packet_sink(MuxTrack::Audio))?;
            let data = AudioRenderer::new(loader, audio_config.sample_rate)
                .render(&job.audio)
                .await?;
            encoder.encode(data)?;
            encoder.flush().await
        }
        .await;
        encoder.close();
        result
    };

    let (loop_report, ()) = tokio::try_join!(video_path, audio_path)?;

    stage(progress, RenderStage::Finalizing, ticks, ticks);
    let mux_report = mux.finalize().await?;

    let report = RenderReport {
        frames: loop_report.frames,
        keyframes: loop_report.keyframes,
        video_chunks: mux_report.video_packets,
        audio_chunks: mux_report.audio_packets,
        bytes_written: mux_report.bytes_written,
        storage_writes: mux_report.storage_writes,
        elapsed_secs: stopwatch.elapsed_secs(),
        average_tick_ms: loop_report.average_tick_ms,
    };
    stage(progress, RenderStage::Complete, ticks, ticks);

    tracing::info!(
        frames = report.frames,
        video_chunks = report.video_chunks,
        audio_chunks = report.audio_chunks,
        bytes = report.bytes_written,
        elapsed_secs = format!("{:.2}", report.elapsed_secs),
        average_tick_ms = format!("{:.2}", report.average_tick_ms),
        "Render complete"
    );
    Ok(report)
}

fn stage(progress: Option<&ProgressCallback>, stage: RenderStage, done: u64, total: u64) {
    report(
        progress,
        RenderProgress {
            progress: if total == 0 { 0.0 } else { done as f64 / total as f64 },
            frames_rendered: done,
            total_frames: total,
            eta_secs: 0.0,
            stage,
        },
    );
}
