//! Byte sources and the chunked range reader.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::ByteWindow;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Response to a single range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeResponse {
    Bytes(Bytes),
    /// The source refused the range (HTTP 416).
    Unsatisfiable,
}

/// Random-access byte source addressed by inclusive ranges.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Locator used in logs.
    fn locator(&self) -> &str;

    /// Total size of the source in bytes.
    async fn probe_size(&self) -> FramecastResult<u64>;

    /// Fetch bytes `[start, end]` (inclusive).
    async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse>;
}

/// HTTP(S) source: `HEAD` for the size, `GET` with a `Range` header per chunk.
pub struct HttpByteSource {
    client: Client,
    url: String,
}

impl HttpByteSource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });
        Self::with_client(client, url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    fn locator(&self) -> &str {
        &self.url
    }

    async fn probe_size(&self) -> FramecastResult<u64> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| FramecastError::network(format!("HEAD {}: {e}", self.url)))?;

        if !response.status().is_success() {
            return Err(FramecastError::network(format!(
                "HEAD {} returned {}",
                self.url,
                response.status()
            )));
        }

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                FramecastError::network(format!("HEAD {} has no Content-Length", self.url))
            })
    }

    async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| FramecastError::network(format!("GET {}: {e}", self.url)))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(RangeResponse::Unsatisfiable);
        }
        if !status.is_success() {
            return Err(FramecastError::network(format!(
                "GET {} bytes={start}-{end} returned {status}",
                self.url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FramecastError::network(format!("reading {}: {e}", self.url)))?;
        Ok(RangeResponse::Bytes(body))
    }
}

/// Local file source.
pub struct FileByteSource {
    path: PathBuf,
    locator: String,
}

impl FileByteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let locator = path.display().to_string();
        Self { path, locator }
    }
}

#[async_trait]
impl ByteSource for FileByteSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    async fn probe_size(&self) -> FramecastResult<u64> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| FramecastError::network(format!("stat {}: {e}", self.locator)))?;
        Ok(metadata.len())
    }

    async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
        let read_error = |e: std::io::Error| {
            FramecastError::network(format!("reading {} at {start}: {e}", self.locator))
        };

        let mut file = tokio::fs::File::open(&self.path).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();
        if start >= size || end < start {
            return Ok(RangeResponse::Unsatisfiable);
        }

        let len = (end.min(size - 1) - start + 1) as usize;
        let mut buffer = vec![0u8; len];
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(read_error)?;
        file.read_exact(&mut buffer).await.map_err(read_error)?;
        Ok(RangeResponse::Bytes(Bytes::from(buffer)))
    }
}

/// Source over bytes already in memory.
pub struct MemoryByteSource {
    data: Bytes,
    locator: String,
}

impl MemoryByteSource {
    pub fn new(locator: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            locator: locator.into(),
        }
    }
}

#[async_trait]
impl ByteSource for MemoryByteSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    async fn probe_size(&self) -> FramecastResult<u64> {
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
        let size = self.data.len() as u64;
        if start >= size || end < start {
            return Ok(RangeResponse::Unsatisfiable);
        }
        let end = end.min(size - 1);
        Ok(RangeResponse::Bytes(
            self.data.slice(start as usize..=end as usize),
        ))
    }
}

/// Pick a byte source for a locator by its scheme.
///
/// `http://` and `https://` go over the network; `file://` and bare paths
/// are read from disk.
pub fn byte_source_for(locator: &str) -> FramecastResult<Arc<dyn ByteSource>> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return Ok(Arc::new(HttpByteSource::new(locator)));
    }
    if let Some(path) = locator.strip_prefix("file://") {
        return Ok(Arc::new(FileByteSource::new(path)));
    }
    if let Some((scheme, _)) = locator.split_once("://") {
        return Err(FramecastError::configuration(format!(
            "unsupported source scheme '{scheme}'"
        )));
    }
    Ok(Arc::new(FileByteSource::new(locator)))
}

/// Result of [`ChunkedSource::fetch_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// One chunk starting at `start`; `window` is the cursor after the fetch.
    Chunk {
        bytes: Bytes,
        start: u64,
        window: ByteWindow,
    },
    /// Every byte has been fetched, or the source refused the range.
    EndOfStream,
    /// Another fetch on this instance is still in progress.
    Busy,
}

/// Fixed-size window reader over a [`ByteSource`].
///
/// Each call to [`fetch_next`](Self::fetch_next) issues exactly one range
/// request. A call made while another is in progress returns
/// [`FetchOutcome::Busy`] immediately and is not queued.
pub struct ChunkedSource {
    source: Arc<dyn ByteSource>,
    chunk_size: u64,
    window: Mutex<Option<ByteWindow>>,
}

impl ChunkedSource {
    pub fn new(source: Arc<dyn ByteSource>, chunk_size: u64) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            window: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &str {
        self.source.locator()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Probe the total size, positioning the window at offset 0.
    ///
    /// Probing twice keeps the current offset.
    pub async fn probe_size(&self) -> FramecastResult<u64> {
        let mut window = self.window.lock().await;
        self.ensure_window(&mut window).await.map(|w| w.total_size)
    }

    /// Snapshot of the cursor, if the size has been probed and no fetch is
    /// running.
    pub fn window(&self) -> Option<ByteWindow> {
        self.window.try_lock().ok().and_then(|guard| *guard)
    }

    pub async fn fetch_next(&self) -> FramecastResult<FetchOutcome> {
        let Ok(mut guard) = self.window.try_lock() else {
            tracing::debug!(source = %self.locator(), "Fetch already in progress");
            return Ok(FetchOutcome::Busy);
        };

        let mut window = self.ensure_window(&mut guard).await?;
        let Some((start, end)) = window.next_range(self.chunk_size) else {
            return Ok(FetchOutcome::EndOfStream);
        };

        tracing::debug!(source = %self.locator(), start, end, total = window.total_size, "Fetching range");

        match self.source.fetch_range(start, end).await? {
            RangeResponse::Unsatisfiable => {
                tracing::warn!(source = %self.locator(), start, end, "Range not satisfiable, stopping");
                Ok(FetchOutcome::EndOfStream)
            }
            RangeResponse::Bytes(bytes) => {
                // A server that ignores `Range` answers with the whole body.
                let expected = end - start + 1;
                if bytes.len() as u64 != expected {
                    return Err(FramecastError::network(format!(
                        "{} returned {} bytes for range {start}-{end}, expected {expected}",
                        self.locator(),
                        bytes.len()
                    )));
                }
                window.advance(start, end, self.chunk_size);
                *guard = Some(window);
                Ok(FetchOutcome::Chunk {
                    bytes,
                    start,
                    window,
                })
            }
        }
    }

    async fn ensure_window(&self, slot: &mut Option<ByteWindow>) -> FramecastResult<ByteWindow> {
        if let Some(window) = *slot {
            return Ok(window);
        }
        let total = self.source.probe_size().await?;
        tracing::debug!(source = %self.locator(), total, "Probed source size");
        let window = ByteWindow::new(total);
        *slot = Some(window);
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Memory source that answers its `from`-th and later requests with
    /// `answer` instead of the requested range.
    struct MisbehavingSource {
        inner: MemoryByteSource,
        calls: AtomicUsize,
        from: usize,
        answer: RangeResponse,
    }

    #[async_trait]
    impl ByteSource for MisbehavingSource {
        fn locator(&self) -> &str {
            self.inner.locator()
        }

        async fn probe_size(&self) -> FramecastResult<u64> {
            self.inner.probe_size().await
        }

        async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.from {
                return Ok(self.answer.clone());
            }
            self.inner.fetch_range(start, end).await
        }
    }

    /// Memory source that fails or stalls on demand.
    struct FlakySource {
        inner: MemoryByteSource,
        failures_left: AtomicUsize,
        stall: bool,
    }

    #[async_trait]
    impl ByteSource for FlakySource {
        fn locator(&self) -> &str {
            self.inner.locator()
        }

        async fn probe_size(&self) -> FramecastResult<u64> {
            self.inner.probe_size().await
        }

        async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
            if self.stall {
                futures::future::pending::<()>().await;
            }
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(FramecastError::network("503 Service Unavailable"));
            }
            self.inner.fetch_range(start, end).await
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_chunks_tile_the_source() {
        let source = Arc::new(MemoryByteSource::new("mem", data(2500)));
        let reader = ChunkedSource::new(source, 1000);
        assert_eq!(reader.probe_size().await.unwrap(), 2500);

        let mut ranges = Vec::new();
        let mut joined = Vec::new();
        loop {
            match reader.fetch_next().await.unwrap() {
                FetchOutcome::Chunk { bytes, start, .. } => {
                    ranges.push((start, start + bytes.len() as u64 - 1));
                    joined.extend_from_slice(&bytes);
                }
                FetchOutcome::EndOfStream => break,
                FetchOutcome::Busy => panic!("sequential fetches must not be busy"),
            }
        }
        assert_eq!(ranges, vec![(0, 999), (1000, 1999), (2000, 2499)]);
        assert_eq!(joined, data(2500));
        assert!(reader.window().unwrap().is_exhausted());
    }

    #[tokio::test]
    async fn test_failure_leaves_offset_for_retry() {
        let source = Arc::new(FlakySource {
            inner: MemoryByteSource::new("flaky", data(300)),
            failures_left: AtomicUsize::new(1),
            stall: false,
        });
        let reader = ChunkedSource::new(source, 200);

        let err = reader.fetch_next().await.unwrap_err();
        assert!(matches!(err, FramecastError::Network { .. }));
        assert_eq!(reader.window().unwrap().offset, 0);

        match reader.fetch_next().await.unwrap() {
            FetchOutcome::Chunk { start, window, .. } => {
                assert_eq!(start, 0);
                assert_eq!(window.offset, 200);
            }
            other => panic!("expected a chunk, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_mid_file_ends_stream() {
        let source = Arc::new(MisbehavingSource {
            inner: MemoryByteSource::new("mem", data(2500)),
            calls: AtomicUsize::new(0),
            from: 1,
            answer: RangeResponse::Unsatisfiable,
        });
        let reader = ChunkedSource::new(source.clone(), 1000);

        assert!(matches!(
            reader.fetch_next().await.unwrap(),
            FetchOutcome::Chunk { start: 0, .. }
        ));
        assert_eq!(reader.fetch_next().await.unwrap(), FetchOutcome::EndOfStream);

        let window = reader.window().unwrap();
        assert_eq!(window.offset, 1000);
        assert!(!window.is_exhausted());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ignored_range_is_a_network_error() {
        // Full body on the second request, as from a server that ignores `Range`.
        let source = Arc::new(MisbehavingSource {
            inner: MemoryByteSource::new("mem", data(2500)),
            calls: AtomicUsize::new(0),
            from: 1,
            answer: RangeResponse::Bytes(Bytes::from(data(2500))),
        });
        let reader = ChunkedSource::new(source, 1000);

        reader.fetch_next().await.unwrap();
        let err = reader.fetch_next().await.unwrap_err();
        assert!(matches!(err, FramecastError::Network { .. }), "{err}");
        assert_eq!(reader.window().unwrap().offset, 1000);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_is_busy() {
        let source = Arc::new(FlakySource {
            inner: MemoryByteSource::new("stalled", data(10)),
            failures_left: AtomicUsize::new(0),
            stall: true,
        });
        let reader = Arc::new(ChunkedSource::new(source, 4));

        let first = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.fetch_next().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(reader.fetch_next().await.unwrap(), FetchOutcome::Busy);
        first.abort();
    }

    #[tokio::test]
    async fn test_empty_source_is_end_of_stream() {
        let reader = ChunkedSource::new(Arc::new(MemoryByteSource::new("empty", Vec::new())), 16);
        assert_eq!(reader.fetch_next().await.unwrap(), FetchOutcome::EndOfStream);
    }

    #[tokio::test]
    async fn test_file_source_reads_ranges() {
        let path = std::env::temp_dir().join(format!("framecast-src-{}.bin", std::process::id()));
        tokio::fs::write(&path, data(100)).await.unwrap();

        let source = FileByteSource::new(&path);
        assert_eq!(source.probe_size().await.unwrap(), 100);
        assert_eq!(
            source.fetch_range(90, 120).await.unwrap(),
            RangeResponse::Bytes(Bytes::from(data(100)[90..].to_vec()))
        );
        assert_eq!(
            source.fetch_range(100, 120).await.unwrap(),
            RangeResponse::Unsatisfiable
        );

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn test_byte_source_for_schemes() {
        assert_eq!(
            byte_source_for("https://cdn.example.com/a.mp4").unwrap().locator(),
            "https://cdn.example.com/a.mp4"
        );
        assert_eq!(byte_source_for("file:///tmp/a.mp4").unwrap().locator(), "/tmp/a.mp4");
        assert_eq!(byte_source_for("clips/a.mp4").unwrap().locator(), "clips/a.mp4");
        assert!(matches!(
            byte_source_for("ftp://host/a.mp4"),
            Err(FramecastError::Configuration { .. })
        ));
    }
}
