//! Streaming multiplexer output.
//!
//! Encoded packets from the audio and video paths are funneled through one
//! channel into a single mux task, which is the only writer of the
//! container muxer and the storage handle. The muxer writes into a
//! [`ChunkedTarget`] that buffers contiguous output into fixed-size segments
//! and hands them to storage at their byte positions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use framecast_common::config::MuxDefaults;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::SampleKind;
use serde::Serialize;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Output track a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxTrack {
    Video,
    Audio,
}

/// One encoded access unit from an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub kind: SampleKind,
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub data: Bytes,

    /// Decoder configuration emitted alongside the first packet.
    pub decoder_config: Option<Bytes>,
}

/// Parameters a container muxer is set up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerConfig {
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub audio_codec: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub fast_start: bool,
}

/// Positional byte sink a container muxer writes into.
pub trait MuxWriter {
    /// Current write position.
    fn position(&self) -> u64;

    /// Move the write position, e.g. to patch an earlier header.
    fn seek(&mut self, position: u64);

    /// Write at the current position and advance it.
    fn write(&mut self, data: &[u8]);
}

/// Capability interface over an external container multiplexer.
pub trait ContainerMuxer: Send {
    fn configure(&mut self, config: &MuxerConfig) -> FramecastResult<()>;

    fn add_packet(
        &mut self,
        track: MuxTrack,
        packet: EncodedPacket,
        out: &mut dyn MuxWriter,
    ) -> FramecastResult<()>;

    /// Write trailing structures and patch earlier headers.
    fn finalize(&mut self, out: &mut dyn MuxWriter) -> FramecastResult<()>;
}

/// Storage the finished container lands in.
#[async_trait]
pub trait StorageHandle: Send {
    async fn write_at(&mut self, position: u64, data: Bytes) -> FramecastResult<()>;

    async fn close(&mut self) -> FramecastResult<()>;
}

/// Storage backed by a file on disk.
pub struct FileStorage {
    path: PathBuf,
    file: tokio::fs::File,
}

impl FileStorage {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> FramecastResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await.map_err(|e| {
            FramecastError::storage(format!("create {}: {e}", path.display()))
        })?;
        Ok(Self { path, file })
    }
}

#[async_trait]
impl StorageHandle for FileStorage {
    async fn write_at(&mut self, position: u64, data: Bytes) -> FramecastResult<()> {
        let path = &self.path;
        let fail = |e: std::io::Error| {
            FramecastError::storage(format!("write {} at {position}: {e}", path.display()))
        };
        self.file
            .seek(std::io::SeekFrom::Start(position))
            .await
            .map_err(fail)?;
        self.file.write_all(&data).await.map_err(fail)
    }

    async fn close(&mut self) -> FramecastResult<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Storage that keeps the output in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    bytes: Arc<Mutex<Vec<u8>>>,
    writes: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// `(position, length)` of each write, in order.
    pub fn writes(&self) -> Vec<(u64, usize)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageHandle for MemoryStorage {
    async fn write_at(&mut self, position: u64, data: Bytes) -> FramecastResult<()> {
        let mut bytes = self
            .bytes
            .lock()
            .map_err(|_| FramecastError::storage("memory storage poisoned"))?;
        let start = position as usize;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&data);
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((position, data.len()));
        }
        Ok(())
    }

    async fn close(&mut self) -> FramecastResult<()> {
        Ok(())
    }
}

/// Segmenting writer between a muxer and storage.
///
/// Sequential output accumulates in an open segment that is emitted once it
/// reaches `segment_size`. Writes landing before the open segment (header
/// patches) are emitted as-is at their position; a forward jump closes the
/// open segment and starts a new one.
#[derive(Debug)]
pub struct ChunkedTarget {
    segment_size: usize,
    position: u64,
    open_start: u64,
    open: Vec<u8>,
    ready: Vec<(u64, Bytes)>,
}

impl ChunkedTarget {
    pub fn new(segment_size: u64) -> Self {
        Self {
            segment_size: segment_size.max(1) as usize,
            position: 0,
            open_start: 0,
            open: Vec::new(),
            ready: Vec::new(),
        }
    }

    fn open_end(&self) -> u64 {
        self.open_start + self.open.len() as u64
    }

    fn emit_open(&mut self) {
        if self.open.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.open);
        let start = self.open_start;
        self.open_start += data.len() as u64;
        self.ready.push((start, Bytes::from(data)));
    }

    fn emit_full_segments(&mut self) {
        while self.open.len() >= self.segment_size {
            let rest = self.open.split_off(self.segment_size);
            let full = std::mem::replace(&mut self.open, rest);
            self.ready.push((self.open_start, Bytes::from(full)));
            self.open_start += self.segment_size as u64;
        }
    }

    /// Segments and patches waiting to be written, in write order.
    pub fn take_ready(&mut self) -> Vec<(u64, Bytes)> {
        std::mem::take(&mut self.ready)
    }

    /// Emit whatever remains in the open segment.
    pub fn finish(&mut self) {
        self.emit_open();
    }
}

impl MuxWriter for ChunkedTarget {
    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) {
        self.position = position;
    }

    fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let start = self.position;
        let end = start + data.len() as u64;
        self.position = end;

        if end <= self.open_start {
            self.ready.push((start, Bytes::copy_from_slice(data)));
            return;
        }
        if start < self.open_start {
            // Straddles the open segment's start: patch the flushed part.
            let split = (self.open_start - start) as usize;
            self.ready
                .push((start, Bytes::copy_from_slice(&data[..split])));
            self.position = self.open_start;
            self.write(&data[split..]);
            return;
        }
        if start > self.open_end() {
            self.emit_open();
            self.open_start = start;
        }

        let offset = (start - self.open_start) as usize;
        let overlap = (self.open.len() - offset).min(data.len());
        self.open[offset..offset + overlap].copy_from_slice(&data[..overlap]);
        self.open.extend_from_slice(&data[overlap..]);
        self.emit_full_segments();
    }
}

enum MuxMessage {
    Packet(MuxTrack, EncodedPacket),
    Error(MuxTrack, String),
    Finalize,
}

/// Encoder-side handle feeding one track of a [`MuxSink`].
#[derive(Clone)]
pub struct PacketSink {
    track: MuxTrack,
    tx: mpsc::UnboundedSender<MuxMessage>,
}

impl PacketSink {
    pub fn track(&self) -> MuxTrack {
        self.track
    }

    /// Deliver an encoded packet.
    pub fn send(&self, packet: EncodedPacket) {
        if self.tx.send(MuxMessage::Packet(self.track, packet)).is_err() {
            tracing::warn!(track = ?self.track, "Mux sink closed; dropping packet");
        }
    }

    /// Report an asynchronous encoder error. Fails the output at finalize.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(MuxMessage::Error(self.track, message.into()));
    }
}

/// Totals for a finished container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxReport {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub storage_writes: u64,
    pub bytes_written: u64,
}

/// Running mux task.
pub struct MuxSink {
    tx: mpsc::UnboundedSender<MuxMessage>,
    task: JoinHandle<FramecastResult<MuxReport>>,
}

impl MuxSink {
    /// Configure `muxer` and start the task that owns it and `storage`.
    pub fn spawn(
        mut muxer: Box<dyn ContainerMuxer>,
        storage: Box<dyn StorageHandle>,
        config: &MuxerConfig,
        defaults: &MuxDefaults,
    ) -> FramecastResult<Self> {
        muxer.configure(config)?;
        tracing::info!(
            video = %config.video_codec,
            audio = config.audio_codec.as_deref().unwrap_or("none"),
            segment_size = defaults.segment_size,
            fast_start = config.fast_start,
            "Mux sink started"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let target = ChunkedTarget::new(defaults.segment_size);
        let task = tokio::spawn(run_mux(muxer, storage, target, rx));
        Ok(Self { tx, task })
    }

    pub fn packet_sink(&self, track: MuxTrack) -> PacketSink {
        PacketSink {
            track,
            tx: self.tx.clone(),
        }
    }

    /// Flush the muxer and storage once every packet sent so far is written.
    pub async fn finalize(self) -> FramecastResult<MuxReport> {
        self.tx
            .send(MuxMessage::Finalize)
            .map_err(|_| FramecastError::mux("mux task exited before finalize"))?;
        self.task
            .await
            .map_err(|e| FramecastError::mux(format!("mux task panicked: {e}")))?
    }
}

async fn run_mux(
    mut muxer: Box<dyn ContainerMuxer>,
    mut storage: Box<dyn StorageHandle>,
    mut target: ChunkedTarget,
    mut rx: mpsc::UnboundedReceiver<MuxMessage>,
) -> FramecastResult<MuxReport> {
    let mut report = MuxReport::default();
    let mut failure: Option<FramecastError> = None;
    let mut finalize_requested = false;

    while let Some(message) = rx.recv().await {
        match message {
            MuxMessage::Packet(track, packet) => {
                if failure.is_some() {
                    continue;
                }
                match track {
                    MuxTrack::Video => report.video_packets += 1,
                    MuxTrack::Audio => report.audio_packets += 1,
                }
                let written = match muxer.add_packet(track, packet, &mut target) {
                    Ok(()) => write_ready(&mut target, storage.as_mut(), &mut report).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::error!(error = %e, "Muxing failed");
                    failure = Some(e);
                }
            }
            MuxMessage::Error(track, message) => {
                tracing::error!(track = ?track, error = %message, "Encoder reported an error");
                if failure.is_none() {
                    failure = Some(FramecastError::encoder(format!("{track:?}: {message}")));
                }
            }
            MuxMessage::Finalize => {
                finalize_requested = true;
                break;
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if !finalize_requested {
        tracing::warn!("Mux sink dropped before finalize; output left incomplete");
        return Err(FramecastError::mux("aborted before finalize"));
    }

    muxer.finalize(&mut target)?;
    target.finish();
    write_ready(&mut target, storage.as_mut(), &mut report).await?;
    storage.close().await?;

    tracing::info!(
        video_packets = report.video_packets,
        audio_packets = report.audio_packets,
        bytes = report.bytes_written,
        writes = report.storage_writes,
        "Container finalized"
    );
    Ok(report)
}

async fn write_ready(
    target: &mut ChunkedTarget,
    storage: &mut dyn StorageHandle,
    report: &mut MuxReport,
) -> FramecastResult<()> {
    for (position, data) in target.take_ready() {
        tracing::debug!(position, len = data.len(), "Writing segment");
        report.storage_writes += 1;
        report.bytes_written += data.len() as u64;
        storage.write_at(position, data).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(target: &mut ChunkedTarget) -> Vec<(u64, Vec<u8>)> {
        target
            .take_ready()
            .into_iter()
            .map(|(pos, data)| (pos, data.to_vec()))
            .collect()
    }

    #[test]
    fn test_sequential_writes_flush_full_segments() {
        let mut target = ChunkedTarget::new(4);
        target.write(&[1, 2, 3]);
        assert!(collect(&mut target).is_empty());

        target.write(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(
            collect(&mut target),
            vec![(0, vec![1, 2, 3, 4]), (4, vec![5, 6, 7, 8])]
        );

        target.finish();
        assert_eq!(collect(&mut target), vec![(8, vec![9])]);
    }

    #[test]
    fn test_patch_into_flushed_region_keeps_position() {
        let mut target = ChunkedTarget::new(4);
        target.write(&[0; 10]);
        collect(&mut target);

        let end = target.position();
        target.seek(2);
        target.write(&[7, 7]);
        target.seek(end);
        target.write(&[1]);
        target.finish();

        assert_eq!(
            collect(&mut target),
            vec![(2, vec![7, 7]), (8, vec![0, 0, 1])]
        );
    }

    #[test]
    fn test_patch_inside_open_segment_overwrites_in_place() {
        let mut target = ChunkedTarget::new(16);
        target.write(&[0, 0, 0, 0, 9, 9]);
        target.seek(0);
        target.write(&[0, 0, 0, 6]);
        target.finish();
        assert_eq!(collect(&mut target), vec![(0, vec![0, 0, 0, 6, 9, 9])]);
    }

    #[test]
    fn test_write_straddling_flushed_boundary() {
        let mut target = ChunkedTarget::new(4);
        target.write(&[0; 6]);
        collect(&mut target);
        target.seek(3);
        target.write(&[5, 5]);
        target.finish();
        assert_eq!(collect(&mut target), vec![(3, vec![5]), (4, vec![5, 0])]);
    }

    #[tokio::test]
    async fn test_memory_storage_positions() {
        let mut storage = MemoryStorage::new();
        storage.write_at(4, Bytes::from_static(&[4, 5])).await.unwrap();
        storage.write_at(0, Bytes::from_static(&[0, 1, 2, 3])).await.unwrap();
        assert_eq!(storage.contents(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(storage.writes(), vec![(4, 2), (0, 4)]);
    }
}
