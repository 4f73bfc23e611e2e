//! Framecast Common Utilities
//!
//! Shared infrastructure for all Framecast crates:
//! - Error taxonomy and result aliases
//! - Frame clock math (tick times, timestamps, keyframe cadence)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
