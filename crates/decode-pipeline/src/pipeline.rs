//! The decode pipeline task.
//!
//! Each pipeline runs as its own tokio task and owns its fetcher, demuxer,
//! decoder and frame cache outright. Everything reaches it as a message:
//! commands from handles, demuxer events, decoder outputs, fetch and drain
//! completions, and the flow-check timer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use framecast_common::config::PipelineDefaults;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::{
    ByteWindow, DecodedFrame, EncodedChunk, EncodedSample, MediaTrack, PipelineState,
    SourceDescriptor, TrackInfo,
};
use futures::future::{BoxFuture, OptionFuture};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::Instrument;

use crate::decoder::{DecoderOutput, DecoderOutputSink, VideoDecoder};
use crate::demux::{select_video_track, ContainerDemuxer, DemuxEvent};
use crate::flow::FlowController;
use crate::handle::{Command, ConsumeReply, PipelineHandle, PipelineStatus};
use crate::source::{ByteSource, ChunkedSource, FetchOutcome};

/// Runtime tuning for a decode pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Delay that coalesces bursts of flow checks into one evaluation.
    pub flow_debounce: Duration,

    /// Give up on a decoder flush after this long.
    pub flush_timeout: Option<Duration>,

    /// Capacity of the command channel.
    pub command_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            flow_debounce: Duration::from_millis(20),
            flush_timeout: None,
            command_capacity: 32,
        }
    }
}

impl From<&PipelineDefaults> for PipelineOptions {
    fn from(defaults: &PipelineDefaults) -> Self {
        Self {
            flow_debounce: Duration::from_millis(defaults.flow_debounce_ms),
            flush_timeout: defaults.flush_timeout_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }
}

/// Source descriptor for `locator` using configured chunking and seek.
pub fn descriptor_from_defaults(locator: &str, defaults: &PipelineDefaults) -> SourceDescriptor {
    SourceDescriptor::new(locator)
        .with_chunk_size(defaults.chunk_size)
        .with_samples_per_batch(defaults.samples_per_batch)
        .with_seek(defaults.seek_secs)
}

/// A decode pipeline ready to be spawned.
pub struct DecodePipeline {
    descriptor: SourceDescriptor,
    source: Arc<dyn ByteSource>,
    demuxer: Box<dyn ContainerDemuxer>,
    decoder: Box<dyn VideoDecoder>,
    options: PipelineOptions,
}

impl DecodePipeline {
    pub fn new(
        descriptor: SourceDescriptor,
        source: Arc<dyn ByteSource>,
        demuxer: Box<dyn ContainerDemuxer>,
        decoder: Box<dyn VideoDecoder>,
    ) -> Self {
        Self {
            descriptor,
            source,
            demuxer,
            decoder,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Start the pipeline task and begin fetching the container header.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> FramecastResult<PipelineHandle> {
        self.descriptor
            .validate()
            .map_err(|e| FramecastError::configuration(e.to_string()))?;

        let label = self.descriptor.label().to_string();
        let (command_tx, command_rx) = mpsc::channel(self.options.command_capacity.max(1));
        let (demux_tx, demux_rx) = mpsc::unbounded_channel();
        let (decoder_tx, decoder_rx) = mpsc::unbounded_channel();

        let mut demuxer = self.demuxer;
        demuxer.attach(demux_tx);

        let actor = PipelineActor {
            flow: FlowController::new(
                self.descriptor.samples_per_batch,
                self.options.flow_debounce,
            ),
            source: Arc::new(ChunkedSource::new(self.source, self.descriptor.chunk_size)),
            descriptor: self.descriptor,
            demuxer,
            decoder: self.decoder,
            options: self.options,
            state: PipelineState::Initializing,
            track: None,
            cache: VecDeque::new(),
            pending: None,
            drain_waiters: Vec::new(),
            window: None,
            processed: 0,
            frames_decoded: 0,
            frames_discarded: 0,
            fetch_halted: false,
            fetch_error: None,
            fatal: None,
            fetch: None,
            drain: None,
            commands: command_rx,
            demux_events: demux_rx,
            decoder_outputs: decoder_rx,
            decoder_sink: decoder_tx,
        };

        let span = tracing::info_span!("decode", source = %label);
        tokio::spawn(actor.run().instrument(span));

        Ok(PipelineHandle::new(&label, command_tx))
    }
}

struct PipelineActor {
    descriptor: SourceDescriptor,
    source: Arc<ChunkedSource>,
    demuxer: Box<dyn ContainerDemuxer>,
    decoder: Box<dyn VideoDecoder>,
    options: PipelineOptions,

    state: PipelineState,
    track: Option<TrackInfo>,
    flow: FlowController,
    cache: VecDeque<DecodedFrame>,
    pending: Option<ConsumeReply>,
    drain_waiters: Vec<oneshot::Sender<FramecastResult<()>>>,

    window: Option<ByteWindow>,
    processed: u64,
    frames_decoded: u64,
    frames_discarded: u64,
    fetch_halted: bool,
    fetch_error: Option<String>,
    fatal: Option<FramecastError>,

    fetch: Option<BoxFuture<'static, FramecastResult<FetchOutcome>>>,
    drain: Option<BoxFuture<'static, FramecastResult<()>>>,

    commands: mpsc::Receiver<Command>,
    demux_events: mpsc::UnboundedReceiver<DemuxEvent>,
    decoder_outputs: mpsc::UnboundedReceiver<DecoderOutput>,
    decoder_sink: DecoderOutputSink,
}

impl PipelineActor {
    async fn run(mut self) {
        tracing::info!(
            chunk_size = self.descriptor.chunk_size,
            batch = self.descriptor.samples_per_batch,
            seek = self.descriptor.seek_secs,
            "Decode pipeline started"
        );

        self.start_fetch();

        loop {
            let flow_deadline = self.flow.deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All handles dropped");
                        break;
                    };
                    if !self.on_command(command) {
                        return;
                    }
                }
                Some(event) = self.demux_events.recv() => self.on_demux_event(event),
                Some(output) = self.decoder_outputs.recv() => self.on_decoder_output(output),
                Some(outcome) = OptionFuture::from(self.fetch.as_mut()), if self.fetch.is_some() => {
                    self.fetch = None;
                    self.on_fetch(outcome);
                }
                Some(result) = OptionFuture::from(self.drain.as_mut()), if self.drain.is_some() => {
                    self.drain = None;
                    self.on_drained(result);
                }
                _ = sleep_until(flow_deadline.unwrap_or_else(Instant::now)), if flow_deadline.is_some() => {
                    self.on_flow_check();
                }
            }
        }

        self.shutdown();
    }

    /// Returns `false` once the task should exit.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Consume(reply) => self.on_consume(reply),
            Command::Flush(reply) => {
                self.begin_drain();
                match self.state {
                    PipelineState::Flushed => {
                        let _ = reply.send(Ok(()));
                    }
                    PipelineState::Failed => {
                        let _ = reply.send(Err(self.fatal_error()));
                    }
                    _ => self.drain_waiters.push(reply),
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::RetryFetch => self.retry_fetch(),
            Command::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn on_consume(&mut self, reply: ConsumeReply) {
        if self.pending.as_ref().is_some_and(|waiter| !waiter.is_closed()) {
            tracing::warn!("Rejecting consume while another is pending");
            let _ = reply.send(Err(FramecastError::protocol_violation(
                "a consume request is already pending",
            )));
            return;
        }

        if let Some(frame) = self.cache.pop_front() {
            self.deliver(reply, frame);
            self.schedule_flow_check();
            return;
        }

        match self.state {
            PipelineState::Flushed => {
                let _ = reply.send(Ok(None));
            }
            PipelineState::Failed => {
                let _ = reply.send(Err(self.fatal_error()));
            }
            _ => {
                self.pending = Some(reply);
                self.schedule_flow_check();
            }
        }
    }

    /// Hand `frame` to a consumer. If the consumer went away, the frame goes
    /// back to the head of the cache.
    fn deliver(&mut self, reply: ConsumeReply, frame: DecodedFrame) {
        if let Err(Ok(Some(frame))) = reply.send(Ok(Some(frame))) {
            tracing::debug!("Consumer dropped; re-caching frame");
            self.cache.push_front(frame);
        }
    }

    fn on_fetch(&mut self, outcome: FramecastResult<FetchOutcome>) {
        if let Some(window) = self.source.window() {
            self.window = Some(window);
        }

        match outcome {
            Ok(FetchOutcome::Chunk { bytes, start, .. }) => {
                self.fetch_error = None;
                tracing::debug!(offset = start, len = bytes.len(), "Appending chunk");
                if let Err(e) = self.demuxer.append_bytes(bytes, start) {
                    self.fail(e);
                    return;
                }
                self.pump_demux_events();

                if self.state == PipelineState::Initializing {
                    // Keep reading until the header parses.
                    self.start_fetch();
                } else {
                    self.schedule_flow_check();
                }
            }
            Ok(FetchOutcome::EndOfStream) => self.on_end_of_input(),
            Ok(FetchOutcome::Busy) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Fetch failed; halting until retried");
                self.fetch_halted = true;
                self.fetch_error = Some(e.to_string());
                if let Some(reply) = self.pending.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn on_end_of_input(&mut self) {
        match self.state {
            PipelineState::Initializing => self.fail(FramecastError::configuration(
                "reached end of input before track metadata",
            )),
            PipelineState::Streaming => {
                tracing::debug!(processed = self.processed, "End of input");
                self.begin_drain();
            }
            _ => {}
        }
    }

    fn pump_demux_events(&mut self) {
        while let Ok(event) = self.demux_events.try_recv() {
            self.on_demux_event(event);
        }
    }

    fn on_demux_event(&mut self, event: DemuxEvent) {
        match event {
            DemuxEvent::Ready { tracks } => self.on_ready(tracks),
            DemuxEvent::Samples(samples) => self.on_samples(samples),
            DemuxEvent::Error(message) => {
                self.fail(FramecastError::configuration(format!("demuxer: {message}")))
            }
        }
    }

    fn on_ready(&mut self, tracks: Vec<MediaTrack>) {
        if self.state != PipelineState::Initializing {
            tracing::debug!("Ignoring repeated ready event");
            return;
        }
        self.transition(PipelineState::Configuring);

        let track = match select_video_track(&tracks, self.demuxer.as_ref()) {
            Ok(track) => track,
            Err(e) => return self.fail(e),
        };
        tracing::info!(
            track = track.track_id,
            codec = %track.codec,
            samples = track.sample_count,
            width = track.width,
            height = track.height,
            "Track ready"
        );

        if let Err(e) = self.decoder.configure(&track, self.decoder_sink.clone()) {
            return self.fail(e);
        }

        self.demuxer
            .set_extraction(track.track_id, self.descriptor.samples_per_batch);
        let total = track.sample_count;
        self.track = Some(track);
        self.transition(PipelineState::Streaming);
        self.demuxer.start();

        if total == 0 {
            self.begin_drain();
        }
    }

    fn on_samples(&mut self, samples: Vec<EncodedSample>) {
        // Samples flushed out of the demuxer at drain time still count.
        let accepting = self.state == PipelineState::Streaming
            || (self.state == PipelineState::Draining && self.drain.is_none());
        if !accepting {
            tracing::warn!(count = samples.len(), state = %self.state, "Dropping samples");
            return;
        }

        for sample in samples {
            let (track_id, sequence) = (sample.track_id, sample.sequence);
            if let Err(e) = self.decoder.decode(EncodedChunk::from(sample)) {
                return self.fail(e);
            }
            self.demuxer.release_samples(track_id, sequence);
            self.processed += 1;
        }

        let total = self.track.as_ref().map_or(0, |track| track.sample_count);
        tracing::trace!(processed = self.processed, total, "Samples submitted");

        if self.state == PipelineState::Streaming && self.processed >= total {
            tracing::info!(processed = self.processed, "All samples submitted");
            self.begin_drain();
        }
        self.schedule_flow_check();
    }

    fn on_decoder_output(&mut self, output: DecoderOutput) {
        match output {
            DecoderOutput::Frame(frame) => self.on_frame(frame),
            DecoderOutput::Error(message) => self.fail(FramecastError::decoder_fault(message)),
        }
    }

    fn on_frame(&mut self, frame: DecodedFrame) {
        self.frames_decoded += 1;

        if self.state == PipelineState::Failed {
            tracing::trace!("Dropping frame from closed decoder");
            return;
        }

        let time = frame.presentation_secs();
        if time < self.descriptor.seek_secs {
            self.frames_discarded += 1;
            tracing::trace!(time, "Discarding frame before seek point");
            drop(frame);
        } else {
            match self.pending.take() {
                Some(reply) => self.deliver(reply, frame),
                None => self.cache.push_back(frame),
            }
        }

        self.schedule_flow_check();
    }

    fn schedule_flow_check(&mut self) {
        self.flow.schedule(Instant::now());
    }

    fn on_flow_check(&mut self) {
        let pending = self.demuxer.pending_samples();
        let queue = self.decoder.decode_queue_size();
        let fetch = self.flow.evaluate(pending, queue);
        tracing::trace!(
            demux_pending = pending,
            decode_queue = queue,
            cached = self.cache.len(),
            fetch,
            "Flow check"
        );

        if fetch && self.state == PipelineState::Streaming && !self.fetch_halted {
            self.start_fetch();
        }
    }

    fn start_fetch(&mut self) {
        if self.fetch.is_some() {
            return;
        }
        let source = self.source.clone();
        self.fetch = Some(async move { source.fetch_next().await }.boxed());
    }

    fn retry_fetch(&mut self) {
        if !self.fetch_halted {
            tracing::debug!("Retry requested but fetching is not halted");
            return;
        }
        tracing::info!("Retrying fetch");
        self.fetch_halted = false;
        match self.state {
            PipelineState::Initializing => self.start_fetch(),
            PipelineState::Streaming => self.schedule_flow_check(),
            _ => {}
        }
    }

    /// Move to `Draining`: flush the demuxer, submit what it still holds, then
    /// start the decoder flush. Repeated calls are no-ops.
    fn begin_drain(&mut self) {
        match self.state {
            PipelineState::Initializing | PipelineState::Configuring => {
                self.fetch = None;
                self.finish();
                return;
            }
            PipelineState::Streaming => {}
            PipelineState::Draining | PipelineState::Flushed | PipelineState::Failed => return,
        }

        self.transition(PipelineState::Draining);
        self.fetch = None;
        self.flow.cancel();

        self.demuxer.flush();
        self.pump_demux_events();
        if self.state != PipelineState::Draining {
            return;
        }

        tracing::debug!(processed = self.processed, "Flushing decoder");
        let flush = self.decoder.flush();
        self.drain = Some(match self.options.flush_timeout {
            Some(limit) => async move {
                match tokio::time::timeout(limit, flush).await {
                    Ok(result) => result,
                    Err(_) => Err(FramecastError::timeout(format!(
                        "decoder flush did not finish within {limit:?}"
                    ))),
                }
            }
            .boxed(),
            None => flush,
        });
    }

    fn on_drained(&mut self, result: FramecastResult<()>) {
        // Frames delivered before the flush resolved are still queued.
        while let Ok(output) = self.decoder_outputs.try_recv() {
            self.on_decoder_output(output);
        }
        match result {
            Ok(()) => self.finish(),
            Err(e) => self.fail(e),
        }
    }

    fn finish(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.decoder.close();
        self.transition(PipelineState::Flushed);
        tracing::info!(
            decoded = self.frames_decoded,
            discarded = self.frames_discarded,
            cached = self.cache.len(),
            "Decode pipeline flushed"
        );

        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Ok(None));
        }
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail(&mut self, error: FramecastError) {
        if self.state.is_terminal() {
            tracing::debug!(error = %error, "Ignoring error after pipeline stopped");
            return;
        }
        tracing::error!(state = %self.state, error = %error, "Decode pipeline failed");

        self.transition(PipelineState::Failed);
        self.decoder.close();
        self.fetch = None;
        self.drain = None;
        self.flow.cancel();

        if let Some(reply) = self.pending.take() {
            let _ = reply.send(Err(error.to_reported()));
        }
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(Err(error.to_reported()));
        }
        self.fatal = Some(error);
    }

    fn fatal_error(&self) -> FramecastError {
        self.fatal
            .as_ref()
            .map(FramecastError::to_reported)
            .unwrap_or_else(|| FramecastError::closed("pipeline failed"))
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring invalid state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Pipeline state changed");
        self.state = next;
    }

    fn status(&self) -> PipelineStatus {
        PipelineStatus {
            source: self.descriptor.label().to_string(),
            state: self.state,
            cached_frames: self.cache.len(),
            processed_samples: self.processed,
            total_samples: self.track.as_ref().map_or(0, |track| track.sample_count),
            frames_decoded: self.frames_decoded,
            frames_discarded: self.frames_discarded,
            bytes_fetched: self.window.map_or(0, |window| window.bytes_fetched()),
            total_bytes: self.window.map_or(0, |window| window.total_size),
            fetch_error: self.fetch_error.clone(),
            last_error: self.fatal.as_ref().map(ToString::to_string),
        }
    }

    fn shutdown(&mut self) {
        tracing::debug!(cached = self.cache.len(), "Shutting down decode pipeline");
        self.fetch = None;
        self.drain = None;
        self.flow.cancel();
        self.decoder.close();
        self.cache.clear();
        self.pending = None;
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(Err(FramecastError::closed("pipeline shut down")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let defaults = PipelineDefaults {
            flush_timeout_ms: Some(1500),
            ..PipelineDefaults::default()
        };
        let options = PipelineOptions::from(&defaults);
        assert_eq!(options.flow_debounce, Duration::from_millis(20));
        assert_eq!(options.flush_timeout, Some(Duration::from_millis(1500)));

        let descriptor = descriptor_from_defaults("https://cdn.example.com/clip.mp4", &defaults);
        assert_eq!(descriptor.chunk_size, 1024 * 1024);
        assert_eq!(descriptor.samples_per_batch, 10);
        assert_eq!(descriptor.label(), "clip.mp4");
    }
}
