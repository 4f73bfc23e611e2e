//! Framecast Decode Pipeline
//!
//! Progressively fetches a video over ranged reads, demultiplexes it, and
//! decodes frames on demand. Each source gets its own pipeline task; callers
//! pull frames one at a time through a [`PipelineHandle`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 DecodePipeline task                  │
//! │                                                      │
//! │  ChunkedSource ──▶ ContainerDemuxer ──▶ VideoDecoder │
//! │       ▲                                     │        │
//! │       │ FlowController                      ▼        │
//! │       └──── (starved && idle) ◀──── seek filter      │
//! │                                             │        │
//! │                                        FrameCache    │
//! └─────────────────────────────────────────────┬────────┘
//!                                               │ consume_frame()
//!                                               ▼
//!                                        PipelineHandle
//! ```

pub mod decoder;
pub mod demux;
pub mod flow;
pub mod handle;
pub mod pipeline;
pub mod source;

pub use decoder::{DecoderOutput, DecoderOutputSink, VideoDecoder};
pub use demux::{select_video_track, ContainerDemuxer, DemuxEvent, DemuxEventSink};
pub use flow::{should_fetch, FlowController};
pub use handle::{PipelineHandle, PipelineStatus};
pub use pipeline::{descriptor_from_defaults, DecodePipeline, PipelineOptions};
pub use source::{
    byte_source_for, ByteSource, ChunkedSource, FetchOutcome, FileByteSource, HttpByteSource,
    MemoryByteSource, RangeResponse,
};
