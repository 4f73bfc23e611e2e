//! Framecast Media Model
//!
//! Defines the data contracts shared by the decode and render pipelines:
//! - **Source:** what to fetch and how (`SourceDescriptor`, `ByteWindow`)
//! - **Sample:** demuxed tracks and encoded access units
//! - **Frame:** decoded frames with exactly-once release, encode jobs
//! - **Audio:** timed audio sources and rendered PCM buffers
//! - **State:** the decode pipeline lifecycle
//!
//! Timestamps inside a source are kept in that track's timescale units;
//! timestamps on the output timeline are microseconds.

pub mod audio;
pub mod avcc;
pub mod frame;
pub mod job;
pub mod sample;
pub mod source;
pub mod state;

pub use audio::*;
pub use avcc::*;
pub use frame::*;
pub use job::*;
pub use sample::*;
pub use source::*;
pub use state::*;

/// Validation failures for model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Parameter set too short: {len} bytes")]
    ParameterSetTooShort { len: usize },

    #[error("Parameter set too long: {len} bytes")]
    ParameterSetTooLong { len: usize },
}

impl ModelError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
