//! Client side of a running decode pipeline.

use std::sync::Arc;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::{DecodedFrame, PipelineState};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

pub(crate) type ConsumeReply = oneshot::Sender<FramecastResult<Option<DecodedFrame>>>;

pub(crate) enum Command {
    Consume(ConsumeReply),
    Flush(oneshot::Sender<FramecastResult<()>>),
    Status(oneshot::Sender<PipelineStatus>),
    RetryFetch,
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time view of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub source: String,
    pub state: PipelineState,
    pub cached_frames: usize,
    pub processed_samples: u64,
    pub total_samples: u64,
    pub frames_decoded: u64,
    pub frames_discarded: u64,
    pub bytes_fetched: u64,
    pub total_bytes: u64,

    /// Last fetch failure, cleared by the next successful fetch.
    pub fetch_error: Option<String>,

    /// The error that moved the pipeline to `Failed`.
    pub last_error: Option<String>,
}

/// Cloneable handle to a decode pipeline task.
///
/// Dropping every handle stops the task and releases its cached frames.
#[derive(Clone)]
pub struct PipelineHandle {
    label: Arc<str>,
    commands: mpsc::Sender<Command>,
}

impl PipelineHandle {
    pub(crate) fn new(label: &str, commands: mpsc::Sender<Command>) -> Self {
        Self {
            label: Arc::from(label),
            commands,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Next frame at or after the seek point, or `None` at end of stream.
    ///
    /// Only one consume may be outstanding per pipeline; a second one fails
    /// with `ProtocolViolation` and leaves the first untouched. After the
    /// pipeline fails, cached frames are still served before the error.
    pub async fn consume_frame(&self) -> FramecastResult<Option<DecodedFrame>> {
        self.request(Command::Consume).await?
    }

    /// Like [`consume_frame`](Self::consume_frame), but any error counts as
    /// an empty pipeline.
    pub async fn next_frame(&self) -> Option<DecodedFrame> {
        match self.consume_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(source = %self.label, error = %e, "No frame from pipeline");
                None
            }
        }
    }

    /// Drain the decoder and wait until the pipeline is flushed.
    ///
    /// Safe to call repeatedly.
    pub async fn flush(&self) -> FramecastResult<()> {
        self.request(Command::Flush).await?
    }

    pub async fn status(&self) -> FramecastResult<PipelineStatus> {
        self.request(Command::Status).await
    }

    /// Resume fetching after a network error.
    pub async fn retry_fetch(&self) -> FramecastResult<()> {
        self.commands
            .send(Command::RetryFetch)
            .await
            .map_err(|_| self.closed())
    }

    /// Stop the pipeline, releasing cached frames.
    pub async fn shutdown(&self) -> FramecastResult<()> {
        self.request(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> FramecastResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> FramecastError {
        FramecastError::closed(format!("decode pipeline for {} is gone", self.label))
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("label", &self.label)
            .finish()
    }
}
