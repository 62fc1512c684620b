use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use iotrace_types::{BufferId, TokenId};

use crate::schema::SchemaVersion;
use crate::wire::{read_at, read_fixed_str, WireError};

/// Layer id written for operations that belong to no layer.
pub const LAYER_NONE: u16 = u16::MAX;
/// Tensor index written when the tracer could not resolve one.
pub const TENSOR_IDX_NONE: u32 = u32::MAX;

pub const MAX_SOURCES: usize = 4;
pub const MAX_EXPERTS: usize = 16;

const COMPACT_NAME_LEN: usize = 64;
const DST_NAME_LEN: usize = 24;
const SOURCE_NAME_LEN: usize = 20;
const SOURCE_BASE: usize = 48;
const SOURCE_STRIDE: usize = 52;
const EXPERT_BASE: usize = 256;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum MemorySource {
    Disk = 0,
    Buffer = 1,
}

impl MemorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            MemorySource::Disk => "DISK",
            MemorySource::Buffer => "BUFFER",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Prompt,
    Generate,
}

impl Phase {
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0 {
            Phase::Prompt
        } else {
            Phase::Generate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Prompt => "PROMPT",
            Phase::Generate => "GENERATE",
        }
    }
}

/// Where a source tensor's bytes lived when the operation read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Residency {
    /// Backed by the model file, not yet resident.
    Disk { offset: u64 },
    /// Already resident in a compute buffer.
    Buffer { buffer_id: BufferId },
    /// Compact records carry a file offset but no memory-source byte.
    Unclassified { file_offset: u64 },
}

impl Residency {
    pub fn memory_source(&self) -> Option<MemorySource> {
        match self {
            Residency::Disk { .. } => Some(MemorySource::Disk),
            Residency::Buffer { .. } => Some(MemorySource::Buffer),
            Residency::Unclassified { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTensor {
    pub name: String,
    /// Opaque pointer identity, only meaningful for equality.
    pub tensor_ptr: u64,
    pub size_bytes: u32,
    pub layer: Option<u16>,
    /// `None` when the memory-source byte held an unknown value.
    pub residency: Option<Residency>,
    pub tensor_idx: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorAccessEvent {
    pub timestamp_ns: u64,
    pub token_id: TokenId,
    pub layer: Option<u16>,
    pub thread_id: u16,
    pub op_code: u8,
    pub phase: Phase,
    pub dst_name: Option<String>,
    pub sources: Vec<SourceTensor>,
    /// Routed expert ids, only for schemas that record routing.
    pub expert_ids: Option<Vec<i32>>,
}

impl TensorAccessEvent {
    pub fn num_experts(&self) -> Option<usize> {
        self.expert_ids.as_ref().map(Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(TensorAccessEvent),
    /// Zero timestamp: padding slot, no more data in this segment.
    End,
}

fn layer_from_raw(raw: u16) -> Option<u16> {
    (raw != LAYER_NONE).then_some(raw)
}

fn tensor_idx_from_raw(raw: u32) -> Option<u32> {
    (raw != TENSOR_IDX_NONE).then_some(raw)
}

/// Decodes one record of the given layout from the front of `buf`.
pub fn decode_record(version: SchemaVersion, buf: &[u8]) -> Result<Decoded, WireError> {
    let len = version.record_len();
    if buf.len() < len {
        return Err(WireError::InsufficientData {
            need: len,
            have: buf.len(),
        });
    }
    let rec = &buf[..len];

    let timestamp_ns: u64 = read_at(rec, 0)?;
    if timestamp_ns == 0 {
        return Ok(Decoded::End);
    }

    let mut event = TensorAccessEvent {
        timestamp_ns,
        token_id: TokenId(read_at(rec, 8)?),
        layer: layer_from_raw(read_at(rec, 12)?),
        thread_id: read_at(rec, 14)?,
        op_code: read_at(rec, 16)?,
        phase: Phase::from_raw(read_at(rec, 17)?),
        dst_name: None,
        sources: Vec::new(),
        expert_ids: None,
    };

    match version {
        SchemaVersion::Compact => decode_compact_source(rec, &mut event)?,
        SchemaVersion::Wide | SchemaVersion::WideExperts => {
            decode_wide_body(rec, &mut event)?;
            if version.has_experts() {
                event.expert_ids = Some(decode_experts(rec)?);
            }
        }
    }

    Ok(Decoded::Event(event))
}

fn decode_compact_source(rec: &[u8], event: &mut TensorAccessEvent) -> Result<(), WireError> {
    event.sources.push(SourceTensor {
        name: read_fixed_str(rec, 64, COMPACT_NAME_LEN)?,
        tensor_ptr: read_at(rec, 28)?,
        size_bytes: read_at(rec, 44)?,
        layer: event.layer,
        residency: Some(Residency::Unclassified {
            file_offset: read_at(rec, 36)?,
        }),
        tensor_idx: tensor_idx_from_raw(read_at(rec, 24)?),
    });
    Ok(())
}

fn decode_wide_body(rec: &[u8], event: &mut TensorAccessEvent) -> Result<(), WireError> {
    let num_sources = read_at::<u8>(rec, 18)? as usize;
    if num_sources > MAX_SOURCES {
        return Err(WireError::CountOutOfRange {
            field: "num_sources",
            count: num_sources,
            capacity: MAX_SOURCES,
        });
    }

    event.dst_name = Some(read_fixed_str(rec, 24, DST_NAME_LEN)?);
    event.sources.reserve(num_sources);
    for i in 0..num_sources {
        let base = SOURCE_BASE + i * SOURCE_STRIDE;
        let provenance: u64 = read_at(rec, base + 36)?;
        let residency = match MemorySource::try_from(read_at::<u8>(rec, base + 34)?) {
            Ok(MemorySource::Disk) => Some(Residency::Disk { offset: provenance }),
            Ok(MemorySource::Buffer) => Some(Residency::Buffer {
                buffer_id: BufferId(provenance),
            }),
            Err(_) => None,
        };
        event.sources.push(SourceTensor {
            name: read_fixed_str(rec, base, SOURCE_NAME_LEN)?,
            tensor_ptr: read_at(rec, base + 20)?,
            size_bytes: read_at(rec, base + 28)?,
            layer: layer_from_raw(read_at(rec, base + 32)?),
            residency,
            tensor_idx: tensor_idx_from_raw(read_at(rec, base + 44)?),
        });
    }
    Ok(())
}

fn decode_experts(rec: &[u8]) -> Result<Vec<i32>, WireError> {
    let num_experts = read_at::<u8>(rec, 19)? as usize;
    if num_experts > MAX_EXPERTS {
        return Err(WireError::CountOutOfRange {
            field: "num_experts",
            count: num_experts,
            capacity: MAX_EXPERTS,
        });
    }
    (0..num_experts)
        .map(|i| read_at::<i32>(rec, EXPERT_BASE + i * 4))
        .collect()
}
