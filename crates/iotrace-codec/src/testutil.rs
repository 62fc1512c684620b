//! Record encoders for building test fixtures.

use byteorder::{ByteOrder, LittleEndian};

use crate::record::{LAYER_NONE, TENSOR_IDX_NONE};
use crate::schema::SchemaVersion;

fn put_str(buf: &mut [u8], at: usize, capacity: usize, s: &str) {
    let n = s.len().min(capacity);
    buf[at..at + n].copy_from_slice(&s.as_bytes()[..n]);
}

#[derive(Debug, Clone)]
pub struct CompactRecord {
    pub timestamp_ns: u64,
    pub token: u32,
    pub layer: u16,
    pub thread: u16,
    pub op: u8,
    pub phase: u8,
    pub tensor_idx: u32,
    pub tensor_ptr: u64,
    pub file_offset: u64,
    pub size: u32,
    pub name: &'static str,
}

impl Default for CompactRecord {
    fn default() -> Self {
        Self {
            timestamp_ns: 1,
            token: 0,
            layer: 0,
            thread: 0,
            op: 0,
            phase: 0,
            tensor_idx: TENSOR_IDX_NONE,
            tensor_ptr: 0,
            file_offset: 0,
            size: 0,
            name: "",
        }
    }
}

impl CompactRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SchemaVersion::Compact.record_len()];
        LittleEndian::write_u64(&mut buf[0..], self.timestamp_ns);
        LittleEndian::write_u32(&mut buf[8..], self.token);
        LittleEndian::write_u16(&mut buf[12..], self.layer);
        LittleEndian::write_u16(&mut buf[14..], self.thread);
        buf[16] = self.op;
        buf[17] = self.phase;
        LittleEndian::write_u32(&mut buf[24..], self.tensor_idx);
        LittleEndian::write_u64(&mut buf[28..], self.tensor_ptr);
        LittleEndian::write_u64(&mut buf[36..], self.file_offset);
        LittleEndian::write_u32(&mut buf[44..], self.size);
        put_str(&mut buf, 64, 64, self.name);
        buf
    }
}

#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: &'static str,
    pub tensor_ptr: u64,
    pub size: u32,
    pub layer: u16,
    pub memory_source: u8,
    pub provenance: u64,
    pub tensor_idx: u32,
}

impl SourceSpec {
    pub fn disk(name: &'static str, size: u32, offset: u64) -> Self {
        Self {
            name,
            tensor_ptr: 0x7f00_0000_0000 + offset,
            size,
            layer: LAYER_NONE,
            memory_source: 0,
            provenance: offset,
            tensor_idx: TENSOR_IDX_NONE,
        }
    }

    pub fn buffer(name: &'static str, size: u32, buffer_id: u64) -> Self {
        Self {
            name,
            tensor_ptr: 0x5500_0000_0000 + buffer_id,
            size,
            layer: LAYER_NONE,
            memory_source: 1,
            provenance: buffer_id,
            tensor_idx: TENSOR_IDX_NONE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WideRecord {
    pub timestamp_ns: u64,
    pub token: u32,
    pub layer: u16,
    pub thread: u16,
    pub op: u8,
    pub phase: u8,
    pub dst_name: &'static str,
    pub sources: Vec<SourceSpec>,
    pub expert_ids: Vec<i32>,
}

impl WideRecord {
    pub fn encode(&self, version: SchemaVersion) -> Vec<u8> {
        let mut buf = vec![0u8; version.record_len()];
        LittleEndian::write_u64(&mut buf[0..], self.timestamp_ns);
        LittleEndian::write_u32(&mut buf[8..], self.token);
        LittleEndian::write_u16(&mut buf[12..], self.layer);
        LittleEndian::write_u16(&mut buf[14..], self.thread);
        buf[16] = self.op;
        buf[17] = self.phase;
        buf[18] = self.sources.len() as u8;
        put_str(&mut buf, 24, 24, self.dst_name);
        for (i, src) in self.sources.iter().enumerate() {
            let base = 48 + i * 52;
            put_str(&mut buf, base, 20, src.name);
            LittleEndian::write_u64(&mut buf[base + 20..], src.tensor_ptr);
            LittleEndian::write_u32(&mut buf[base + 28..], src.size);
            LittleEndian::write_u16(&mut buf[base + 32..], src.layer);
            buf[base + 34] = src.memory_source;
            LittleEndian::write_u64(&mut buf[base + 36..], src.provenance);
            LittleEndian::write_u32(&mut buf[base + 44..], src.tensor_idx);
        }
        if version.has_experts() {
            buf[19] = self.expert_ids.len() as u8;
            for (i, id) in self.expert_ids.iter().enumerate() {
                LittleEndian::write_i32(&mut buf[256 + i * 4..], *id);
            }
        }
        buf
    }
}
