//! One interface over the two sequential/random estimators.
//!
//! The streaming analyzer fits any trace in constant memory; the batch engine
//! is exact but materializes every scoped read. Which one runs is decided by
//! how many events the caller expects.

use serde::{Deserialize, Serialize};

use iotrace_types::Result;

use crate::batch::{BatchAnalyzer, BatchOptions};
use crate::blk::IoEvent;
use crate::outcome::AnalysisOutcome;
use crate::streaming::{AccessPatternSummary, StreamingAnalyzer};

pub trait PatternStrategy {
    fn name(&self) -> &'static str;

    /// Feeds one already-scoped read, in timestamp order.
    fn observe(&mut self, event: &IoEvent) -> Result<()>;

    fn finish(&mut self) -> Result<AnalysisOutcome<AccessPatternSummary>>;
}

impl PatternStrategy for StreamingAnalyzer {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn observe(&mut self, event: &IoEvent) -> Result<()> {
        StreamingAnalyzer::observe(self, event);
        Ok(())
    }

    fn finish(&mut self) -> Result<AnalysisOutcome<AccessPatternSummary>> {
        Ok(self.summary())
    }
}

impl PatternStrategy for BatchAnalyzer {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn observe(&mut self, event: &IoEvent) -> Result<()> {
        self.push(event)
    }

    fn finish(&mut self) -> Result<AnalysisOutcome<AccessPatternSummary>> {
        Ok(self.analyze()?.map(|report| report.pattern))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Streaming,
    Batch,
}

/// Batch only when the event count is known and small enough to materialize.
pub fn choose_strategy(expected_events: Option<u64>, batch_max_events: u64) -> StrategyKind {
    match expected_events {
        Some(n) if n <= batch_max_events => StrategyKind::Batch,
        _ => StrategyKind::Streaming,
    }
}

pub fn select_strategy(
    expected_events: Option<u64>,
    options: &BatchOptions,
    threshold_sectors: u64,
) -> Result<Box<dyn PatternStrategy>> {
    let kind = choose_strategy(expected_events, options.batch_max_events);
    tracing::debug!(?kind, ?expected_events, limit = options.batch_max_events, "strategy selected");
    Ok(match kind {
        StrategyKind::Batch => {
            let options = BatchOptions {
                seq_threshold_sectors: threshold_sectors,
                ..options.clone()
            };
            Box::new(BatchAnalyzer::new(options)?)
        }
        StrategyKind::Streaming => Box::new(StreamingAnalyzer::new(threshold_sectors)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotrace_types::SectorNo;

    fn read(ts: f64, sector: u64, len: u64) -> IoEvent {
        IoEvent {
            device: "259,1".into(),
            cpu: 1,
            sequence: 0,
            timestamp: ts,
            pid: 42,
            action: "D".into(),
            rwbs: "R".into(),
            start_sector: SectorNo(sector),
            length_sectors: len,
            process_name: Some("llama-cli".into()),
        }
    }

    #[test]
    fn test_choose_strategy() {
        assert_eq!(choose_strategy(None, 100), StrategyKind::Streaming);
        assert_eq!(choose_strategy(Some(100), 100), StrategyKind::Batch);
        assert_eq!(choose_strategy(Some(101), 100), StrategyKind::Streaming);
    }

    #[test]
    fn test_select_strategy_names() {
        let options = BatchOptions::default();
        assert_eq!(select_strategy(None, &options, 256).unwrap().name(), "streaming");
        assert_eq!(select_strategy(Some(10), &options, 256).unwrap().name(), "batch");
    }

    #[test]
    fn test_both_strategies_summarize_identically() {
        let events = [
            read(0.0, 1000, 8),
            read(0.001, 1008, 8),
            read(0.003, 5000, 8),
            read(0.004, 5008, 8),
        ];
        let options = BatchOptions::default();
        let mut summaries = Vec::new();
        for expected in [None, Some(events.len() as u64)] {
            let mut strategy = select_strategy(expected, &options, 256).unwrap();
            for ev in &events {
                strategy.observe(ev).unwrap();
            }
            summaries.push(strategy.finish().unwrap().signal().unwrap());
        }
        let (s, b) = (&summaries[0], &summaries[1]);
        assert_eq!(s.sequential_reads, b.sequential_reads);
        assert_eq!(s.random_reads, b.random_reads);
        assert_eq!(s.total_bytes, b.total_bytes);
        assert_eq!(s.classification, b.classification);
        assert_eq!(s.sequential_reads, 2);
    }

    #[test]
    fn test_empty_finish_is_no_signal() {
        let options = BatchOptions::default();
        for expected in [None, Some(0)] {
            let mut strategy = select_strategy(expected, &options, 256).unwrap();
            assert!(!strategy.finish().unwrap().is_signal());
        }
    }
}
