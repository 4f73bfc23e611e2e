//! Decode pipeline lifecycle.

use serde::{Deserialize, Serialize};

/// Lifecycle of a decode pipeline.
///
/// States only move forward. `Flushed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Fetching header bytes until the container is parseable.
    Initializing,
    /// Track metadata is known; the decoder is being configured.
    Configuring,
    /// Samples flow from the demuxer into the decoder.
    Streaming,
    /// All samples submitted (or a drain was requested); decoder flushing.
    Draining,
    /// Decoder closed; only cached frames remain.
    Flushed,
    /// A fatal error stopped the pipeline.
    Failed,
}

impl PipelineState {
    fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Configuring => 1,
            Self::Streaming => 2,
            Self::Draining => 3,
            Self::Flushed | Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Flushed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Configuring => "configuring",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Flushed => "flushed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
