//! Decoding of tensor-access trace records.

pub mod op_table;
pub mod reader;
pub mod record;
pub mod schema;
mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use op_table::{OpTable, DEFAULT_OP_TABLE};
pub use reader::{read_trace_file, ReaderStats, RecordReader};
pub use record::{
    decode_record, Decoded, MemorySource, Phase, Residency, SourceTensor, TensorAccessEvent,
    MAX_EXPERTS, MAX_SOURCES,
};
pub use schema::SchemaVersion;
pub use wire::{read_at, read_fixed_str, WireDeserialize, WireError};
