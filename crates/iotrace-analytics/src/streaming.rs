//! Single-pass access pattern analysis with constant memory.

use std::fmt;

use serde::{Deserialize, Serialize};

use iotrace_types::units::{bytes_to_mb, sectors_to_bytes};

use crate::blk::IoEvent;
use crate::outcome::AnalysisOutcome;

pub const DEFAULT_SEQ_THRESHOLD_SECTORS: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternClass {
    HighlySequential,
    MostlySequential,
    Mixed,
    HighlyRandom,
}

impl PatternClass {
    pub fn from_sequential_percent(pct: f64) -> Self {
        if pct > 80.0 {
            PatternClass::HighlySequential
        } else if pct > 50.0 {
            PatternClass::MostlySequential
        } else if pct > 20.0 {
            PatternClass::Mixed
        } else {
            PatternClass::HighlyRandom
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternClass::HighlySequential => "HIGHLY SEQUENTIAL",
            PatternClass::MostlySequential => "MOSTLY SEQUENTIAL",
            PatternClass::Mixed => "MIXED (Sequential + Random)",
            PatternClass::HighlyRandom => "HIGHLY RANDOM",
        }
    }
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sequential/random characterization of a read stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPatternSummary {
    pub threshold_sectors: u64,
    pub total_reads: u64,
    pub total_bytes: u64,
    pub total_mb_read: f64,
    pub sequential_reads: u64,
    pub random_reads: u64,
    pub sequential_percent: f64,
    /// Mean of `|gap|` over consecutive pairs.
    pub avg_gap_sectors: f64,
    pub avg_gap_kb: f64,
    pub mean_interval_ms: f64,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub classification: PatternClass,
}

impl AccessPatternSummary {
    /// Derives the percentage fields and classification from raw counters.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_counters(
        threshold_sectors: u64,
        total_reads: u64,
        total_bytes: u64,
        sequential_reads: u64,
        random_reads: u64,
        avg_gap_sectors: f64,
        intervals: IntervalStats,
    ) -> Self {
        let pairs = sequential_reads + random_reads;
        let sequential_percent = if pairs > 0 {
            sequential_reads as f64 / pairs as f64 * 100.0
        } else {
            0.0
        };
        AccessPatternSummary {
            threshold_sectors,
            total_reads,
            total_bytes,
            total_mb_read: bytes_to_mb(total_bytes),
            sequential_reads,
            random_reads,
            sequential_percent,
            avg_gap_sectors,
            // One sector is half a KiB.
            avg_gap_kb: avg_gap_sectors * 0.5,
            mean_interval_ms: intervals.mean_ms,
            min_interval_ms: intervals.min_ms,
            max_interval_ms: intervals.max_ms,
            classification: PatternClass::from_sequential_percent(sequential_percent),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct IntervalStats {
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct PrevRead {
    timestamp: f64,
    sector: u64,
    length: u64,
}

/// Consumes reads one at a time; holds only the previous read and scalar
/// accumulators, so traces of any length fit.
///
/// Events must already be scoped (reads of the workload under study) and
/// arrive in timestamp order.
#[derive(Debug, Clone)]
pub struct StreamingAnalyzer {
    threshold_sectors: u64,
    prev: Option<PrevRead>,
    total_reads: u64,
    total_bytes: u64,
    sequential: u64,
    random: u64,
    gap_sum: u128,
    interval_count: u64,
    interval_sum_ms: f64,
    interval_min_ms: f64,
    interval_max_ms: f64,
}

impl StreamingAnalyzer {
    pub fn new(threshold_sectors: u64) -> Self {
        Self {
            threshold_sectors,
            prev: None,
            total_reads: 0,
            total_bytes: 0,
            sequential: 0,
            random: 0,
            gap_sum: 0,
            interval_count: 0,
            interval_sum_ms: 0.0,
            interval_min_ms: f64::INFINITY,
            interval_max_ms: f64::NEG_INFINITY,
        }
    }

    pub fn threshold_sectors(&self) -> u64 {
        self.threshold_sectors
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    pub fn observe(&mut self, event: &IoEvent) {
        self.record(event.timestamp, event.start_sector.get(), event.length_sectors);
    }

    fn record(&mut self, timestamp: f64, sector: u64, length: u64) {
        self.total_reads += 1;
        self.total_bytes = self.total_bytes.saturating_add(sectors_to_bytes(length));

        if let Some(prev) = self.prev {
            let gap = sector.abs_diff(prev.sector.saturating_add(prev.length));
            self.gap_sum += u128::from(gap);
            if gap <= self.threshold_sectors {
                self.sequential += 1;
            } else {
                self.random += 1;
            }

            let interval_ms = (timestamp - prev.timestamp) * 1000.0;
            self.interval_count += 1;
            self.interval_sum_ms += interval_ms;
            self.interval_min_ms = self.interval_min_ms.min(interval_ms);
            self.interval_max_ms = self.interval_max_ms.max(interval_ms);
        }

        self.prev = Some(PrevRead {
            timestamp,
            sector,
            length,
        });
    }

    pub fn summary(&self) -> AnalysisOutcome<AccessPatternSummary> {
        if self.total_reads == 0 {
            return AnalysisOutcome::NoSignal;
        }
        let pairs = self.sequential + self.random;
        let avg_gap_sectors = if pairs > 0 {
            self.gap_sum as f64 / pairs as f64
        } else {
            0.0
        };
        let intervals = if self.interval_count > 0 {
            IntervalStats {
                mean_ms: self.interval_sum_ms / self.interval_count as f64,
                min_ms: self.interval_min_ms,
                max_ms: self.interval_max_ms,
            }
        } else {
            IntervalStats::default()
        };
        AnalysisOutcome::Signal(AccessPatternSummary::from_counters(
            self.threshold_sectors,
            self.total_reads,
            self.total_bytes,
            self.sequential,
            self.random,
            avg_gap_sectors,
            intervals,
        ))
    }
}

impl Default for StreamingAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_SEQ_THRESHOLD_SECTORS)
    }
}
