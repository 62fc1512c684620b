//! Buffer allocation telemetry: JSON-lines input replayed into an occupancy
//! timeline.

use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use iotrace_types::units::bytes_to_mb;
use iotrace_types::{BufferId, Result};

/// Layer id written for buffers not tied to a layer.
const LAYER_NONE: u16 = u16::MAX;

fn default_buffer_name() -> String {
    "unnamed".to_string()
}

/// One line of the allocation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BufferEvent {
    Alloc {
        timestamp_ms: f64,
        buffer_id: BufferId,
        #[serde(default)]
        size: u64,
        #[serde(default = "default_buffer_name")]
        name: String,
        #[serde(default)]
        backend: Option<String>,
        #[serde(default)]
        usage: u8,
        #[serde(default)]
        layer: Option<u16>,
    },
    Dealloc {
        timestamp_ms: f64,
        buffer_id: BufferId,
    },
}

impl BufferEvent {
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            BufferEvent::Alloc { timestamp_ms, .. } | BufferEvent::Dealloc { timestamp_ms, .. } => {
                *timestamp_ms
            }
        }
    }

    pub fn buffer_id(&self) -> BufferId {
        match self {
            BufferEvent::Alloc { buffer_id, .. } | BufferEvent::Dealloc { buffer_id, .. } => {
                *buffer_id
            }
        }
    }
}

pub fn usage_name(usage: u8) -> &'static str {
    match usage {
        0 => "ANY",
        1 => "WEIGHTS",
        2 => "COMPUTE",
        _ => "UNKNOWN",
    }
}

/// Reads one event per line. Blank lines are ignored; lines that are not a
/// valid event, including lines that are not UTF-8, are logged and counted
/// in the second return value. Only read failures are returned as errors.
pub fn parse_buffer_events<R: BufRead>(mut reader: R) -> Result<(Vec<BufferEvent>, u64)> {
    let mut events = Vec::new();
    let mut skipped = 0u64;
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no, error = %e, "skipping non-UTF-8 buffer event line");
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<BufferEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no, error = %e, "skipping buffer event line");
            }
        }
    }
    Ok((events, skipped))
}

/// One allocation, from `alloc` to the matching `dealloc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferRecord {
    pub id: BufferId,
    pub name: String,
    pub size: u64,
    pub backend: Option<String>,
    pub usage: u8,
    pub usage_name: String,
    pub layer: Option<u16>,
    pub alloc_time_ms: f64,
    pub dealloc_time_ms: Option<f64>,
    pub lifetime_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Alloc,
    Dealloc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub timestamp_ms: f64,
    pub event: TimelineEventKind,
    pub buffer_id: BufferId,
    pub buffer_name: String,
    pub size: u64,
    pub cumulative_size: u64,
    pub num_active_buffers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferTimelineMetadata {
    pub total_events: u64,
    pub total_buffers: u64,
    pub peak_occupancy_bytes: u64,
    pub peak_occupancy_mb: f64,
    pub final_occupancy_bytes: u64,
    pub duration_ms: f64,
    pub usage_breakdown: BTreeMap<String, u64>,
    /// Deallocations of ids that were not active; ignored.
    pub unknown_deallocs: u64,
    /// Allocations of ids that were still active; the newer one replaces the
    /// older in the active set while the older size stays counted.
    pub reused_allocs: u64,
    /// Input lines that did not parse.
    pub skipped_lines: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferTimelineDocument {
    pub metadata: BufferTimelineMetadata,
    /// Ordered by allocation time.
    pub buffers: Vec<BufferRecord>,
    pub timeline: Vec<TimelinePoint>,
}

impl BufferTimelineDocument {
    pub const FILE_NAME: &'static str = "buffer-timeline.json";

    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct ActiveBuffer {
    size: u64,
    record: usize,
}

/// Replays events in timestamp order (stable for ties).
pub fn replay(events: &[BufferEvent]) -> BufferTimelineDocument {
    let mut ordered: Vec<&BufferEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.timestamp_ms().total_cmp(&b.timestamp_ms()));

    let mut active: HashMap<BufferId, ActiveBuffer> = HashMap::new();
    let mut buffers: Vec<BufferRecord> = Vec::new();
    let mut timeline: Vec<TimelinePoint> = Vec::new();
    let mut cumulative = 0u64;
    let mut peak = 0u64;
    let mut unknown_deallocs = 0u64;
    let mut reused_allocs = 0u64;

    for event in ordered {
        match event {
            BufferEvent::Alloc {
                timestamp_ms,
                buffer_id,
                size,
                name,
                backend,
                usage,
                layer,
            } => {
                buffers.push(BufferRecord {
                    id: *buffer_id,
                    name: name.clone(),
                    size: *size,
                    backend: backend.clone(),
                    usage: *usage,
                    usage_name: usage_name(*usage).to_string(),
                    layer: layer.filter(|&l| l != LAYER_NONE),
                    alloc_time_ms: *timestamp_ms,
                    dealloc_time_ms: None,
                    lifetime_ms: None,
                });
                let replaced = active.insert(
                    *buffer_id,
                    ActiveBuffer {
                        size: *size,
                        record: buffers.len() - 1,
                    },
                );
                if replaced.is_some() {
                    reused_allocs += 1;
                    tracing::debug!(buffer = buffer_id.get(), "allocation reuses an active buffer id");
                }
                cumulative += size;
                peak = peak.max(cumulative);
                timeline.push(TimelinePoint {
                    timestamp_ms: *timestamp_ms,
                    event: TimelineEventKind::Alloc,
                    buffer_id: *buffer_id,
                    buffer_name: name.clone(),
                    size: *size,
                    cumulative_size: cumulative,
                    num_active_buffers: active.len(),
                });
            }
            BufferEvent::Dealloc {
                timestamp_ms,
                buffer_id,
            } => {
                let Some(freed) = active.remove(buffer_id) else {
                    unknown_deallocs += 1;
                    tracing::warn!(buffer = buffer_id.get(), "dealloc for unknown buffer");
                    continue;
                };
                cumulative = cumulative.saturating_sub(freed.size);
                let record = &mut buffers[freed.record];
                record.dealloc_time_ms = Some(*timestamp_ms);
                record.lifetime_ms = Some(timestamp_ms - record.alloc_time_ms);
                timeline.push(TimelinePoint {
                    timestamp_ms: *timestamp_ms,
                    event: TimelineEventKind::Dealloc,
                    buffer_id: *buffer_id,
                    buffer_name: record.name.clone(),
                    size: freed.size,
                    cumulative_size: cumulative,
                    num_active_buffers: active.len(),
                });
            }
        }
    }

    let mut usage_breakdown = BTreeMap::new();
    for buf in &buffers {
        *usage_breakdown.entry(buf.usage_name.clone()).or_insert(0) += 1;
    }
    let duration_ms = match (timeline.first(), timeline.last()) {
        (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
        _ => 0.0,
    };

    BufferTimelineDocument {
        metadata: BufferTimelineMetadata {
            total_events: events.len() as u64,
            total_buffers: buffers.len() as u64,
            peak_occupancy_bytes: peak,
            peak_occupancy_mb: bytes_to_mb(peak),
            final_occupancy_bytes: cumulative,
            duration_ms,
            usage_breakdown,
            unknown_deallocs,
            reused_allocs,
            skipped_lines: 0,
        },
        buffers,
        timeline,
    }
}
