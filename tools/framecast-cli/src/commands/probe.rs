//! Show a source's size and how it would be fetched.

use anyhow::Context;
use framecast_common::config::AppConfig;
use framecast_decode_pipeline::{byte_source_for, ChunkedSource};
use framecast_media_model::ByteWindow;

pub async fn run(config: &AppConfig, locator: String, chunk_size: Option<u64>) -> anyhow::Result<()> {
    let chunk_size = chunk_size.unwrap_or(config.pipeline.chunk_size);
    let source = ChunkedSource::new(byte_source_for(&locator)?, chunk_size);
    let total = source
        .probe_size()
        .await
        .with_context(|| format!("Failed to probe {locator}"))?;

    let plan = chunk_plan(total, source.chunk_size());
    println!("Source: {locator}");
    println!("  Size: {total} bytes ({:.2} MiB)", total as f64 / (1024.0 * 1024.0));
    println!("  Chunk size: {} bytes", source.chunk_size());
    println!("  Range requests: {}", plan.len());
    for (i, (start, end)) in plan.iter().enumerate() {
        if i < 3 || i + 1 == plan.len() {
            println!("    #{i}: bytes={start}-{end}");
        } else if i == 3 {
            println!("    ...");
        }
    }
    Ok(())
}

/// Inclusive byte ranges a full fetch would request, in order.
pub fn chunk_plan(total: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut window = ByteWindow::new(total);
    let mut plan = Vec::new();
    while let Some((start, end)) = window.next_range(chunk_size) {
        window.advance(start, end, chunk_size);
        plan.push((start, end));
    }
    plan
}
