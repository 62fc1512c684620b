//! Per-token grouping of tensor-access events into standalone documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use iotrace_codec::{OpTable, Residency, SchemaVersion, SourceTensor, TensorAccessEvent};
use iotrace_types::{Result, TokenId};

const NS_PER_MS: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTraceMetadata {
    pub token_id: TokenId,
    pub total_entries: u64,
    /// `max(timestamp) - min(timestamp)` within the token.
    pub duration_ms: f64,
    pub timestamp_start_ns: u64,
    pub format_version: String,
    pub op_table: String,
    /// Entries whose operation code has no name in `op_table`.
    pub unknown_operations: u64,
    /// Sources whose memory-source byte could not be classified.
    pub unclassified_sources: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSourceEntry {
    pub name: String,
    /// Opaque identity, rendered as hex.
    pub tensor_ptr: String,
    pub size_bytes: u32,
    pub layer_id: Option<u16>,
    /// `"DISK"` or `"BUFFER"`; absent when the record did not say.
    pub memory_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_offset: Option<u64>,
    pub tensor_idx: Option<u32>,
}

impl TraceSourceEntry {
    fn from_source(src: &SourceTensor) -> Self {
        let (mut disk_offset, mut buffer_id, mut file_offset) = (None, None, None);
        match src.residency {
            Some(Residency::Disk { offset }) => disk_offset = Some(offset),
            Some(Residency::Buffer { buffer_id: id }) => buffer_id = Some(id.get()),
            Some(Residency::Unclassified { file_offset: off }) => file_offset = Some(off),
            None => {}
        }
        TraceSourceEntry {
            name: src.name.clone(),
            tensor_ptr: format!("{:#x}", src.tensor_ptr),
            size_bytes: src.size_bytes,
            layer_id: src.layer,
            memory_source: src
                .residency
                .and_then(|r| r.memory_source())
                .map(|m| m.as_str().to_string()),
            disk_offset,
            buffer_id,
            file_offset,
            tensor_idx: src.tensor_idx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Position of the record in the decoded stream.
    pub entry_id: u64,
    pub timestamp_ns: u64,
    pub timestamp_relative_ms: f64,
    pub token_id: TokenId,
    pub layer_id: Option<u16>,
    pub thread_id: u16,
    pub phase: String,
    pub op_code: u8,
    pub operation_type: Option<String>,
    pub dst_name: Option<String>,
    pub num_sources: usize,
    pub sources: Vec<TraceSourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_ids: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_experts: Option<usize>,
}

/// Everything recorded for one token, loadable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTraceDocument {
    pub metadata: TokenTraceMetadata,
    pub entries: Vec<TraceEntry>,
}

impl TokenTraceDocument {
    pub fn token_id(&self) -> TokenId {
        self.metadata.token_id
    }

    pub fn file_name(&self) -> String {
        format!("token-{:05}.json", self.metadata.token_id.get())
    }

    /// Stable rendering: fixed field order, no maps with unordered keys.
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Groups events by token and orders each group by `(timestamp_ns, entry_id)`.
///
/// Documents come out in ascending token order. Only the subset passed in is
/// considered, so aggregating the same subset twice gives identical output.
pub fn aggregate_by_token(
    events: &[TensorAccessEvent],
    op_table: &OpTable,
    schema: SchemaVersion,
) -> Vec<TokenTraceDocument> {
    let mut groups: BTreeMap<TokenId, Vec<(u64, &TensorAccessEvent)>> = BTreeMap::new();
    for (idx, event) in events.iter().enumerate() {
        groups
            .entry(event.token_id)
            .or_default()
            .push((idx as u64, event));
    }

    groups
        .into_iter()
        .map(|(token_id, mut group)| {
            group.sort_by_key(|&(idx, ev)| (ev.timestamp_ns, idx));
            build_document(token_id, &group, op_table, schema)
        })
        .collect()
}

fn build_document(
    token_id: TokenId,
    group: &[(u64, &TensorAccessEvent)],
    op_table: &OpTable,
    schema: SchemaVersion,
) -> TokenTraceDocument {
    let start_ns = group.first().map_or(0, |(_, ev)| ev.timestamp_ns);
    let end_ns = group.last().map_or(0, |(_, ev)| ev.timestamp_ns);

    let mut unknown_operations = 0u64;
    let mut unclassified_sources = 0u64;
    let entries: Vec<TraceEntry> = group
        .iter()
        .map(|&(entry_id, ev)| {
            let operation_type = op_table.name(ev.op_code).map(str::to_string);
            if operation_type.is_none() {
                unknown_operations += 1;
            }
            unclassified_sources += ev.sources.iter().filter(|s| s.residency.is_none()).count() as u64;
            TraceEntry {
                entry_id,
                timestamp_ns: ev.timestamp_ns,
                timestamp_relative_ms: (ev.timestamp_ns - start_ns) as f64 / NS_PER_MS,
                token_id: ev.token_id,
                layer_id: ev.layer,
                thread_id: ev.thread_id,
                phase: ev.phase.as_str().to_string(),
                op_code: ev.op_code,
                operation_type,
                dst_name: ev.dst_name.clone(),
                num_sources: ev.sources.len(),
                sources: ev.sources.iter().map(TraceSourceEntry::from_source).collect(),
                expert_ids: ev.expert_ids.clone(),
                num_experts: ev.num_experts(),
            }
        })
        .collect();

    if unknown_operations > 0 {
        tracing::warn!(
            token = token_id.get(),
            unknown_operations,
            op_table = op_table.version(),
            "operation codes missing from the table"
        );
    }

    TokenTraceDocument {
        metadata: TokenTraceMetadata {
            token_id,
            total_entries: entries.len() as u64,
            duration_ms: (end_ns - start_ns) as f64 / NS_PER_MS,
            timestamp_start_ns: start_ns,
            format_version: schema.as_str().to_string(),
            op_table: op_table.version().to_string(),
            unknown_operations,
            unclassified_sources,
        },
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotrace_codec::Phase;
    use iotrace_types::BufferId;

    fn source(name: &str, residency: Option<Residency>) -> SourceTensor {
        SourceTensor {
            name: name.to_string(),
            tensor_ptr: 0x7f00_0000_1000,
            size_bytes: 4096,
            layer: Some(3),
            residency,
            tensor_idx: Some(12),
        }
    }

    fn event(ts: u64, token: u32, op: u8, sources: Vec<SourceTensor>) -> TensorAccessEvent {
        TensorAccessEvent {
            timestamp_ns: ts,
            token_id: TokenId(token),
            layer: Some(3),
            thread_id: 1,
            op_code: op,
            phase: Phase::Generate,
            dst_name: Some("ffn_out-3".into()),
            sources,
            expert_ids: None,
        }
    }

    fn events() -> Vec<TensorAccessEvent> {
        vec![
            event(5_000_000, 1, 23, vec![source("blk.3.ffn_up.weight", Some(Residency::Disk { offset: 8192 }))]),
            event(1_000_000, 0, 23, vec![]),
            event(2_000_000, 1, 41, vec![source("kq", Some(Residency::Buffer { buffer_id: BufferId(9) }))]),
            event(3_500_000, 0, 200, vec![source("x", None)]),
            event(2_000_000, 1, 2, vec![]),
        ]
    }

    #[test]
    fn test_groups_by_token_and_orders_by_time() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let docs = aggregate_by_token(&events(), &table, SchemaVersion::Wide);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].token_id(), TokenId(0));
        assert_eq!(docs[1].token_id(), TokenId(1));

        let tok1 = &docs[1];
        assert_eq!(tok1.metadata.total_entries, 3);
        assert_eq!(tok1.metadata.timestamp_start_ns, 2_000_000);
        assert_eq!(tok1.metadata.duration_ms, 3.0);
        // Equal timestamps keep stream order.
        let ids: Vec<u64> = tok1.entries.iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![2, 4, 0]);
        assert_eq!(tok1.entries[2].timestamp_relative_ms, 3.0);
        assert_eq!(tok1.entries[0].operation_type.as_deref(), Some("ROPE"));
        assert_eq!(tok1.metadata.format_version, "wide");
        assert_eq!(tok1.metadata.op_table, "ggml-78");
    }

    #[test]
    fn test_sources_annotated_by_residency() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let docs = aggregate_by_token(&events(), &table, SchemaVersion::Wide);
        let tok1 = &docs[1];

        let buffer_src = &tok1.entries[0].sources[0];
        assert_eq!(buffer_src.memory_source.as_deref(), Some("BUFFER"));
        assert_eq!(buffer_src.buffer_id, Some(9));
        assert_eq!(buffer_src.disk_offset, None);

        let disk_src = &tok1.entries[2].sources[0];
        assert_eq!(disk_src.memory_source.as_deref(), Some("DISK"));
        assert_eq!(disk_src.disk_offset, Some(8192));
        assert_eq!(disk_src.tensor_ptr, "0x7f0000001000");

        let json = tok1.to_canonical_json().unwrap();
        assert!(json.contains("\"disk_offset\": 8192"));
        assert!(!json.contains("\"expert_ids\""));
    }

    #[test]
    fn test_unknown_operation_is_absent() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let docs = aggregate_by_token(&events(), &table, SchemaVersion::Wide);
        let tok0 = &docs[0];
        assert_eq!(tok0.entries[1].op_code, 200);
        assert_eq!(tok0.entries[1].operation_type, None);
        assert_eq!(tok0.metadata.unknown_operations, 1);
        assert_eq!(tok0.metadata.unclassified_sources, 1);
        assert_eq!(tok0.entries[1].sources[0].memory_source, None);
    }

    #[test]
    fn test_reaggregation_is_byte_identical() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let subset: Vec<_> = events().into_iter().filter(|e| e.token_id == TokenId(1)).collect();
        let first = aggregate_by_token(&subset, &table, SchemaVersion::Wide);
        let second = aggregate_by_token(&subset, &table, SchemaVersion::Wide);
        assert_eq!(first.len(), 1);
        assert_eq!(
            first[0].to_canonical_json().unwrap(),
            second[0].to_canonical_json().unwrap()
        );
    }

    #[test]
    fn test_experts_and_file_name() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let mut ev = event(10, 7, 23, vec![]);
        ev.expert_ids = Some(vec![3, 1]);
        let docs = aggregate_by_token(&[ev], &table, SchemaVersion::WideExperts);
        assert_eq!(docs[0].entries[0].num_experts, Some(2));
        assert_eq!(docs[0].file_name(), "token-00007.json");
        assert_eq!(docs[0].metadata.duration_ms, 0.0);

        let parsed: TokenTraceDocument =
            serde_json::from_str(&docs[0].to_canonical_json().unwrap()).unwrap();
        assert_eq!(parsed, docs[0]);
    }
}
