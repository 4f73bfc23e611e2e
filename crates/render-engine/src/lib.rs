//! Framecast Render Engine
//!
//! Drives the output timeline: every tick pulls frames from the decode
//! pipelines, composites them onto a shared surface and submits the result
//! to a hardware video encoder. Audio is mixed offline in parallel and both
//! encoders feed one streaming muxer.
//!
//! # Pipeline Architecture
//!
//! ```text
//! decode pipelines ──┐
//!                    ├── Compositor (per tick) ── Surface
//! procedural layers ─┘                               │
//!                                          EncodeJob (backpressure)
//!                                                    │
//!                                              VideoEncoder ──┐
//!                                                             ├── MuxSink ── ChunkedTarget ── storage
//! audio sources ── AudioRenderer (mix) ── AudioEncoder ───────┘
//! ```

pub mod audio;
pub mod encoder;
pub mod export;
pub mod mux;
pub mod render_loop;
pub mod sources;

pub use audio::*;
pub use encoder::*;
pub use export::*;
pub use mux::*;
pub use render_loop::*;
pub use sources::*;
