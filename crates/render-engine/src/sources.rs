//! Per-tick frame pulls across several decode pipelines.

use framecast_decode_pipeline::PipelineHandle;
use framecast_media_model::DecodedFrame;

struct Slot {
    handle: PipelineHandle,
    exhausted: bool,
}

/// The decode pipelines feeding a compositor.
///
/// A pipeline that reaches end of stream or fails for good is marked
/// exhausted and yields nothing from then on; the others keep running.
pub struct FrameSources {
    slots: Vec<Slot>,
}

impl FrameSources {
    pub fn new(handles: Vec<PipelineHandle>) -> Self {
        Self {
            slots: handles
                .into_iter()
                .map(|handle| Slot {
                    handle,
                    exhausted: false,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pipelines that may still produce frames.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| !s.exhausted).count()
    }

    /// One frame from every active pipeline, in pipeline order.
    ///
    /// Pulls run concurrently. A transient error (a failed fetch that can
    /// still be retried) yields `None` for this tick only.
    pub async fn pull(&mut self) -> Vec<Option<DecodedFrame>> {
        let pulls = self.slots.iter().map(|slot| async move {
            if slot.exhausted {
                return (None, false);
            }
            match slot.handle.consume_frame().await {
                Ok(Some(frame)) => (Some(frame), false),
                Ok(None) => {
                    tracing::info!(source = %slot.handle.label(), "Source exhausted");
                    (None, true)
                }
                Err(e) if e.is_terminal() => {
                    tracing::warn!(source = %slot.handle.label(), error = %e, "Source failed");
                    (None, true)
                }
                Err(e) => {
                    tracing::warn!(source = %slot.handle.label(), error = %e, "No frame this tick");
                    (None, false)
                }
            }
        });
        let results = futures::future::join_all(pulls).await;

        results
            .into_iter()
            .zip(self.slots.iter_mut())
            .map(|((frame, exhausted), slot)| {
                slot.exhausted |= exhausted;
                frame
            })
            .collect()
    }

    /// Stop every pipeline, releasing cached frames.
    pub async fn shutdown(self) {
        for slot in self.slots {
            if let Err(e) = slot.handle.shutdown().await {
                tracing::debug!(source = %slot.handle.label(), error = %e, "Pipeline already stopped");
            }
        }
    }
}
