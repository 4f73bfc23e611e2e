//! Download a source through the chunked range reader.

use std::path::PathBuf;

use anyhow::Context;
use framecast_common::clock::RenderClock;
use framecast_common::config::AppConfig;
use framecast_decode_pipeline::{byte_source_for, ChunkedSource, FetchOutcome};
use framecast_render_engine::{FileStorage, StorageHandle};

pub async fn run(
    config: &AppConfig,
    locator: String,
    output: PathBuf,
    chunk_size: Option<u64>,
) -> anyhow::Result<()> {
    let source = ChunkedSource::new(
        byte_source_for(&locator)?,
        chunk_size.unwrap_or(config.pipeline.chunk_size),
    );
    let total = source.probe_size().await?;
    let mut storage = FileStorage::create(&output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let clock = RenderClock::start();
    let copied = copy_chunks(&source, &mut storage, total, &clock).await;
    storage.close().await?;
    let chunks = copied?;

    println!(
        "Fetched {total} bytes in {chunks} chunk(s) to {} ({:.2}s)",
        output.display(),
        clock.elapsed_secs()
    );
    Ok(())
}

/// Write every chunk of `source` into `storage` at its offset. Returns the
/// number of chunks; fails if the source stopped short of `total` bytes.
async fn copy_chunks(
    source: &ChunkedSource,
    storage: &mut dyn StorageHandle,
    total: u64,
    clock: &RenderClock,
) -> anyhow::Result<u64> {
    let mut chunks = 0u64;
    let mut written = 0u64;
    loop {
        match source.fetch_next().await? {
            FetchOutcome::Chunk {
                bytes,
                start,
                window,
            } => {
                chunks += 1;
                written += bytes.len() as u64;
                storage.write_at(start, bytes).await?;
                tracing::info!(
                    fetched = window.bytes_fetched(),
                    total,
                    eta_secs = format!("{:.1}", clock.eta_secs(window.bytes_fetched(), total)),
                    "Chunk written"
                );
            }
            FetchOutcome::EndOfStream => break,
            FetchOutcome::Busy => tokio::task::yield_now().await,
        }
    }

    if written != total {
        anyhow::bail!(
            "{} ended after {written} of {total} bytes",
            source.locator()
        );
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use framecast_common::error::FramecastResult;
    use framecast_decode_pipeline::{ByteSource, MemoryByteSource, RangeResponse};
    use framecast_render_engine::MemoryStorage;

    use super::*;

    /// Refuses every range after the first.
    struct CutOffSource {
        inner: MemoryByteSource,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ByteSource for CutOffSource {
        fn locator(&self) -> &str {
            self.inner.locator()
        }

        async fn probe_size(&self) -> FramecastResult<u64> {
            self.inner.probe_size().await
        }

        async fn fetch_range(&self, start: u64, end: u64) -> FramecastResult<RangeResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(RangeResponse::Unsatisfiable);
            }
            self.inner.fetch_range(start, end).await
        }
    }

    #[tokio::test]
    async fn test_copies_whole_source() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let source = ChunkedSource::new(Arc::new(MemoryByteSource::new("mem", data.clone())), 1000);
        let mut storage = MemoryStorage::new();

        let chunks = copy_chunks(&source, &mut storage, 2500, &RenderClock::start())
            .await
            .unwrap();
        assert_eq!(chunks, 3);
        assert_eq!(storage.contents(), data);
    }

    #[tokio::test]
    async fn test_truncated_source_fails() {
        let source = ChunkedSource::new(
            Arc::new(CutOffSource {
                inner: MemoryByteSource::new("cut.mp4", vec![7u8; 2500]),
                calls: AtomicUsize::new(0),
            }),
            1000,
        );
        let mut storage = MemoryStorage::new();

        let err = copy_chunks(&source, &mut storage, 2500, &RenderClock::start())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1000 of 2500"), "{err}");
        assert_eq!(storage.contents().len(), 1000);
    }
}
