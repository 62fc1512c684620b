//! Whole-trace summaries of decoded tensor-access events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use iotrace_codec::{MemorySource, OpTable, Residency, TensorAccessEvent};
use iotrace_types::TokenId;

const UNCLASSIFIED: &str = "UNCLASSIFIED";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStatistics {
    pub total_entries: u64,
    pub duration_ms: f64,
    pub tokens: Vec<TokenId>,
    pub unique_layers: Vec<u16>,
    /// Keyed by operation name, or `op#<code>` when the table has none.
    pub operation_counts: BTreeMap<String, u64>,
    pub total_sources: u64,
    pub avg_sources_per_entry: f64,
    pub memory_source_counts: BTreeMap<String, u64>,
    pub unique_source_tensors: u64,
    pub total_source_bytes: u64,
    pub disk_sources: u64,
    pub disk_sources_with_offset: u64,
    pub entries_with_dst_name: u64,
    pub entries_with_experts: u64,
}

impl TraceStatistics {
    pub fn compute(events: &[TensorAccessEvent], op_table: &OpTable) -> TraceStatistics {
        if events.is_empty() {
            return TraceStatistics::default();
        }

        let mut tokens = BTreeSet::new();
        let mut layers = BTreeSet::new();
        let mut names = BTreeSet::new();
        let mut stats = TraceStatistics {
            total_entries: events.len() as u64,
            ..Default::default()
        };
        let (mut first_ns, mut last_ns) = (u64::MAX, 0u64);

        for ev in events {
            first_ns = first_ns.min(ev.timestamp_ns);
            last_ns = last_ns.max(ev.timestamp_ns);
            tokens.insert(ev.token_id);
            if let Some(layer) = ev.layer {
                layers.insert(layer);
            }
            let op = op_table
                .name(ev.op_code)
                .map_or_else(|| format!("op#{}", ev.op_code), str::to_string);
            *stats.operation_counts.entry(op).or_insert(0) += 1;
            if ev.dst_name.as_deref().is_some_and(|n| !n.is_empty()) {
                stats.entries_with_dst_name += 1;
            }
            if ev.num_experts().is_some_and(|n| n > 0) {
                stats.entries_with_experts += 1;
            }

            for src in &ev.sources {
                stats.total_sources += 1;
                stats.total_source_bytes += u64::from(src.size_bytes);
                if !src.name.is_empty() {
                    names.insert(src.name.as_str());
                }
                let kind = src
                    .residency
                    .and_then(|r| r.memory_source())
                    .map_or(UNCLASSIFIED, MemorySource::as_str);
                *stats.memory_source_counts.entry(kind.to_string()).or_insert(0) += 1;
                if let Some(Residency::Disk { offset }) = src.residency {
                    stats.disk_sources += 1;
                    if offset > 0 {
                        stats.disk_sources_with_offset += 1;
                    }
                }
            }
        }

        stats.duration_ms = (last_ns - first_ns) as f64 / 1_000_000.0;
        stats.tokens = tokens.into_iter().collect();
        stats.unique_layers = layers.into_iter().collect();
        stats.unique_source_tensors = names.len() as u64;
        stats.avg_sources_per_entry = stats.total_sources as f64 / stats.total_entries as f64;
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMismatch {
    pub entry_id: u64,
    pub tensor_idx: u32,
    /// Name recorded on this entry.
    pub recorded_name: String,
    /// Name first seen with the same index.
    pub indexed_name: String,
}

/// Consistency of the name and index paths for source tensors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexValidation {
    pub checked_sources: u64,
    pub unresolved: u64,
    pub index_to_name: BTreeMap<u32, String>,
    pub mismatches: Vec<IndexMismatch>,
}

impl IndexValidation {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Checks that each tensor index always comes with the name it was first
/// seen with. Unresolved indices are counted and otherwise skipped.
pub fn validate_tensor_indices(events: &[TensorAccessEvent]) -> IndexValidation {
    let mut result = IndexValidation::default();
    for (entry_id, ev) in events.iter().enumerate() {
        for src in &ev.sources {
            result.checked_sources += 1;
            let Some(idx) = src.tensor_idx else {
                result.unresolved += 1;
                continue;
            };
            match result.index_to_name.get(&idx) {
                None => {
                    result.index_to_name.insert(idx, src.name.clone());
                }
                Some(first) if *first != src.name => {
                    result.mismatches.push(IndexMismatch {
                        entry_id: entry_id as u64,
                        tensor_idx: idx,
                        recorded_name: src.name.clone(),
                        indexed_name: first.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }
    if !result.mismatches.is_empty() {
        tracing::warn!(
            mismatches = result.mismatches.len(),
            "tensor names disagree with their indices"
        );
    }
    result
}

fn is_expert_tensor(name: &str) -> bool {
    name.contains("_exps.weight") || name.contains("_exps.bias")
}

/// Disk-backed reads per tensor, up to `until_ms` after the first event.
///
/// Expert tensors are counted once per routed expert (the first `top_k`
/// ids) under `name[expert]`.
pub fn disk_access_counts(
    events: &[TensorAccessEvent],
    top_k: usize,
    until_ms: Option<f64>,
) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    let Some(start_ns) = events.iter().map(|e| e.timestamp_ns).min() else {
        return counts;
    };
    for ev in events {
        let rel_ms = (ev.timestamp_ns - start_ns) as f64 / 1_000_000.0;
        if until_ms.is_some_and(|limit| rel_ms > limit) {
            continue;
        }
        for src in &ev.sources {
            if !matches!(src.residency, Some(Residency::Disk { .. })) {
                continue;
            }
            match ev.expert_ids.as_deref() {
                Some(ids) if !ids.is_empty() && is_expert_tensor(&src.name) => {
                    for id in ids.iter().take(top_k) {
                        *counts.entry(format!("{}[{}]", src.name, id)).or_insert(0) += 1;
                    }
                }
                _ => *counts.entry(src.name.clone()).or_insert(0) += 1,
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotrace_codec::{Phase, SourceTensor};
    use iotrace_types::BufferId;

    fn src(name: &str, idx: Option<u32>, residency: Option<Residency>) -> SourceTensor {
        SourceTensor {
            name: name.to_string(),
            tensor_ptr: 1,
            size_bytes: 100,
            layer: None,
            residency,
            tensor_idx: idx,
        }
    }

    fn ev(ts: u64, token: u32, layer: Option<u16>, sources: Vec<SourceTensor>) -> TensorAccessEvent {
        TensorAccessEvent {
            timestamp_ns: ts,
            token_id: TokenId(token),
            layer,
            thread_id: 0,
            op_code: 23,
            phase: Phase::Prompt,
            dst_name: None,
            sources,
            expert_ids: None,
        }
    }

    fn disk(offset: u64) -> Option<Residency> {
        Some(Residency::Disk { offset })
    }

    #[test]
    fn test_compute_statistics() {
        let table = OpTable::builtin("ggml-78").unwrap();
        let mut second = ev(3_000_000, 1, Some(2), vec![src("b", None, Some(Residency::Buffer { buffer_id: BufferId(4) }))]);
        second.op_code = 250;
        second.dst_name = Some("out".into());
        let events = vec![
            ev(1_000_000, 0, Some(0), vec![src("a", Some(1), disk(0)), src("b", None, disk(64))]),
            second,
            ev(2_000_000, 1, None, vec![src("", None, None)]),
        ];
        let stats = TraceStatistics::compute(&events, &table);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.duration_ms, 2.0);
        assert_eq!(stats.tokens, vec![TokenId(0), TokenId(1)]);
        assert_eq!(stats.unique_layers, vec![0, 2]);
        assert_eq!(stats.operation_counts.get("MUL_MAT"), Some(&2));
        assert_eq!(stats.operation_counts.get("op#250"), Some(&1));
        assert_eq!(stats.total_sources, 4);
        assert_eq!(stats.total_source_bytes, 400);
        assert_eq!(stats.unique_source_tensors, 2);
        assert_eq!(stats.memory_source_counts.get("DISK"), Some(&2));
        assert_eq!(stats.memory_source_counts.get("BUFFER"), Some(&1));
        assert_eq!(stats.memory_source_counts.get(UNCLASSIFIED), Some(&1));
        assert_eq!(stats.disk_sources, 2);
        assert_eq!(stats.disk_sources_with_offset, 1);
        assert_eq!(stats.entries_with_dst_name, 1);
        assert!((stats.avg_sources_per_entry - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_statistics() {
        let table = OpTable::builtin("legacy-3").unwrap();
        assert_eq!(TraceStatistics::compute(&[], &table), TraceStatistics::default());
    }

    #[test]
    fn test_index_validation() {
        let events = vec![
            ev(1, 0, None, vec![src("tok_embd", Some(0), disk(1)), src("x", None, None)]),
            ev(2, 0, None, vec![src("tok_embd", Some(0), disk(1))]),
            ev(3, 0, None, vec![src("output", Some(0), disk(1))]),
        ];
        let v = validate_tensor_indices(&events);
        assert_eq!(v.checked_sources, 4);
        assert_eq!(v.unresolved, 1);
        assert_eq!(v.index_to_name.get(&0).map(String::as_str), Some("tok_embd"));
        assert!(!v.is_consistent());
        assert_eq!(
            v.mismatches,
            vec![IndexMismatch {
                entry_id: 2,
                tensor_idx: 0,
                recorded_name: "output".into(),
                indexed_name: "tok_embd".into(),
            }]
        );
    }

    #[test]
    fn test_disk_access_counts_expand_experts() {
        let mut routed = ev(
            2_000_000,
            0,
            Some(0),
            vec![
                src("blk.0.ffn_down_exps.weight", None, disk(10)),
                src("kv", None, Some(Residency::Buffer { buffer_id: BufferId(1) })),
            ],
        );
        routed.expert_ids = Some(vec![5, 2, 7]);
        let events = vec![
            ev(1_000_000, 0, Some(0), vec![src("blk.0.attn_q.weight", None, disk(10))]),
            routed,
            ev(9_000_000, 0, Some(0), vec![src("blk.0.attn_q.weight", None, disk(10))]),
        ];

        let counts = disk_access_counts(&events, 2, None);
        assert_eq!(counts.get("blk.0.attn_q.weight"), Some(&2));
        assert_eq!(counts.get("blk.0.ffn_down_exps.weight[5]"), Some(&1));
        assert_eq!(counts.get("blk.0.ffn_down_exps.weight[2]"), Some(&1));
        assert_eq!(counts.get("blk.0.ffn_down_exps.weight[7]"), None);
        assert_eq!(counts.get("kv"), None);

        let early = disk_access_counts(&events, 4, Some(1.0));
        assert_eq!(early.get("blk.0.attn_q.weight"), Some(&1));
        assert_eq!(early.len(), 4);
    }
}
