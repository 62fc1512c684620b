//! Access-pattern analysis over block I/O traces and tensor-access traces.
//!
//! Block traces flow through [`blk`] decoding, [`scope`] filtering against an
//! [`extent`] map, and then either the constant-memory [`streaming`] analyzer
//! or the exact [`batch`] engine (see [`strategy`]). Tensor traces decoded by
//! `iotrace-codec` are grouped per token in [`tensor`] and summarized in
//! [`stats`]; allocation telemetry is replayed in [`buffers`]. Documents are
//! written through a [`sink`].

pub mod batch;
pub mod blk;
pub mod buffers;
pub mod extent;
pub mod outcome;
pub mod scope;
pub mod sink;
pub mod stats;
pub mod strategy;
pub mod streaming;
pub mod tensor;

pub use batch::{
    BandwidthReport, BandwidthWindow, BatchAnalyzer, BatchOptions, BatchReport, GapHistogram,
    SequentialCounts,
};
pub use blk::{parse_blk_line, BlkTraceReader, IngestStats, IoEvent, MalformedLine};
pub use buffers::{
    parse_buffer_events, replay, BufferEvent, BufferRecord, BufferTimelineDocument,
    BufferTimelineMetadata, TimelinePoint,
};
pub use extent::{parse_filefrag, BlockExtent, ExtentMap, SectorRange};
pub use outcome::AnalysisOutcome;
pub use scope::{EventScope, ScopeStats};
pub use sink::{write_json, DocumentSink, InMemorySink, JsonDirSink, Manifest, MANIFEST_FILE};
pub use stats::{disk_access_counts, validate_tensor_indices, IndexValidation, TraceStatistics};
pub use strategy::{choose_strategy, select_strategy, PatternStrategy, StrategyKind};
pub use streaming::{AccessPatternSummary, PatternClass, StreamingAnalyzer};
pub use tensor::{aggregate_by_token, TokenTraceDocument};
