//! Source descriptors and the byte window over a remote or local file.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Default range request size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of samples per demuxer batch.
pub const DEFAULT_SAMPLES_PER_BATCH: usize = 10;

/// Everything a decode pipeline needs to know about its source.
///
/// Immutable once the pipeline is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// URL (`http://`, `https://`) or local path (`file://` or bare).
    pub locator: String,

    /// Bytes per range request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Samples the demuxer buffers before emitting a batch.
    #[serde(default = "default_samples_per_batch")]
    pub samples_per_batch: usize,

    /// Frames presented before this time (seconds) are discarded.
    #[serde(default, rename = "seek")]
    pub seek_secs: f64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_samples_per_batch() -> usize {
    DEFAULT_SAMPLES_PER_BATCH
}

impl SourceDescriptor {
    /// Descriptor with default chunking and no seek.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            samples_per_batch: DEFAULT_SAMPLES_PER_BATCH,
            seek_secs: 0.0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_samples_per_batch(mut self, samples_per_batch: usize) -> Self {
        self.samples_per_batch = samples_per_batch;
        self
    }

    pub fn with_seek(mut self, seek_secs: f64) -> Self {
        self.seek_secs = seek_secs;
        self
    }

    /// Short label for logs (last path segment of the locator).
    pub fn label(&self) -> &str {
        let trimmed = self.locator.trim_end_matches('/');
        let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
        tail.split(['?', '#']).next().unwrap_or(tail)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.locator.trim().is_empty() {
            return Err(ModelError::invalid("locator", "must not be empty"));
        }
        if self.chunk_size == 0 {
            return Err(ModelError::invalid("chunk_size", "must be positive"));
        }
        if self.samples_per_batch == 0 {
            return Err(ModelError::invalid("samples_per_batch", "must be positive"));
        }
        if !self.seek_secs.is_finite() || self.seek_secs < 0.0 {
            return Err(ModelError::invalid(
                "seek",
                format!("must be a non-negative number of seconds, got {}", self.seek_secs),
            ));
        }
        Ok(())
    }
}

/// Cursor over the source bytes.
///
/// `offset` only moves forward, by exactly one chunk per successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteWindow {
    /// Start of the next range to fetch.
    pub offset: u64,

    /// Length of the most recently fetched range.
    pub length: u64,

    /// Total size of the source in bytes.
    pub total_size: u64,
}

impl ByteWindow {
    /// Window positioned at the start of a source of `total_size` bytes.
    pub fn new(total_size: u64) -> Self {
        Self {
            offset: 0,
            length: 0,
            total_size,
        }
    }

    /// Whether every byte has been fetched.
    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.total_size
    }

    /// Inclusive byte range of the next fetch, or `None` at end of stream.
    pub fn next_range(&self, chunk_size: u64) -> Option<(u64, u64)> {
        if self.is_exhausted() || chunk_size == 0 {
            return None;
        }
        let end = self
            .offset
            .saturating_add(chunk_size - 1)
            .min(self.total_size - 1);
        Some((self.offset, end))
    }

    /// Record a successful fetch of `[start, end]` and step one chunk forward.
    pub fn advance(&mut self, start: u64, end: u64, chunk_size: u64) {
        self.length = end - start + 1;
        self.offset = self.offset.saturating_add(chunk_size);
    }

    /// Bytes fetched so far (clamped to the source size).
    pub fn bytes_fetched(&self) -> u64 {
        self.offset.min(self.total_size)
    }
}
