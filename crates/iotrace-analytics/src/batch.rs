//! Exact set-based metrics over a materialized read table.
//!
//! Reads are bulk-loaded into an in-memory DuckDB table
//! `reads(idx, ts, sector, size_sectors)` and every metric is one relational
//! query over it. Memory grows with the number of loaded reads, so callers
//! scope events (process, extent bound) before loading them.

use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use iotrace_config::BatchSection;
use iotrace_types::units::{bytes_to_mb, sectors_to_bytes};
use iotrace_types::{make_error_msg, Result, Status, StatusCode, TraceCode};

use crate::blk::IoEvent;
use crate::outcome::AnalysisOutcome;
use crate::streaming::{AccessPatternSummary, IntervalStats, DEFAULT_SEQ_THRESHOLD_SECTORS};

const APPEND_CHUNK_ROWS: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub gap_small_sectors: u64,
    pub gap_medium_sectors: u64,
    /// Same meaning as the streaming analyzer's threshold, applied to `|gap|`.
    pub seq_threshold_sectors: u64,
    pub reference_size_bytes: Option<u64>,
    pub batch_max_events: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchSection::default(), DEFAULT_SEQ_THRESHOLD_SECTORS)
    }
}

impl BatchOptions {
    pub fn from_config(section: &BatchSection, seq_threshold_sectors: u64) -> Self {
        Self {
            gap_small_sectors: section.gap_small_sectors,
            gap_medium_sectors: section.gap_medium_sectors,
            seq_threshold_sectors,
            reference_size_bytes: section.reference_size_bytes,
            batch_max_events: section.batch_max_events,
        }
    }
}

/// Consecutive-read gaps by size. Gaps are signed: `sector - (prev_sector + prev_len)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapHistogram {
    /// `gap == 0`
    pub perfect_sequential: u64,
    /// `0 < gap < small`
    pub small: u64,
    /// `small <= gap < medium`
    pub medium: u64,
    /// `gap >= medium`
    pub large: u64,
    /// `gap < 0`
    pub backward: u64,
    /// Number of consecutive pairs, `reads - 1`.
    pub total: u64,
}

impl GapHistogram {
    pub fn bucket_sum(&self) -> u64 {
        self.perfect_sequential + self.small + self.medium + self.large + self.backward
    }

    pub fn percent(&self, count: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthWindow {
    /// Whole second of the trace, `floor(ts)`.
    pub second: i64,
    pub operations: u64,
    pub mb_read: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub windows: Vec<BandwidthWindow>,
    /// Mean of per-window MB over windows that saw reads.
    pub average_mb_per_sec: f64,
    pub peak_mb_per_sec: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialCounts {
    pub threshold_sectors: u64,
    pub sequential: u64,
    pub random: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_reads: u64,
    /// Counts re-reads of the same region once per read.
    pub total_bytes_read: u64,
    pub total_mb_read: f64,
    pub unique_sectors: u64,
    pub unique_bytes: u64,
    pub unique_mb: f64,
    /// Against the reference file size, when known.
    pub unique_coverage_pct: Option<f64>,
    /// `total_bytes_read / unique_bytes`.
    pub reread_amplification: f64,
    pub gap_distribution: GapHistogram,
    pub bandwidth: BandwidthReport,
    pub sequential: SequentialCounts,
    pub pattern: AccessPatternSummary,
}

fn query_err(e: duckdb::Error) -> Status {
    Status::with_message(TraceCode::QUERY_FAILED, e.to_string())
}

fn to_i64(field: &'static str, v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| {
        Status::with_message(
            StatusCode::INVALID_ARG,
            format!("{} {} does not fit the read table", field, v),
        )
    })
}

fn count(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
struct ReadRow {
    idx: i64,
    ts: f64,
    sector: i64,
    size_sectors: i64,
}

struct GapRow {
    histogram: GapHistogram,
    sequential: u64,
    random: u64,
    avg_abs_gap: f64,
    intervals: IntervalStats,
}

pub struct BatchAnalyzer {
    conn: Connection,
    options: BatchOptions,
    pending: Vec<ReadRow>,
    loaded: u64,
}

impl BatchAnalyzer {
    pub fn new(options: BatchOptions) -> Result<Self> {
        if options.gap_small_sectors >= options.gap_medium_sectors {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!(
                    "gap thresholds must satisfy small < medium ({} >= {})",
                    options.gap_small_sectors, options.gap_medium_sectors
                ),
            );
        }
        let conn = Connection::open_in_memory().map_err(query_err)?;
        conn.execute_batch(
            "CREATE TABLE reads (idx BIGINT, ts DOUBLE, sector BIGINT, size_sectors BIGINT);",
        )
        .map_err(query_err)?;
        Ok(Self {
            conn,
            options,
            pending: Vec::new(),
            loaded: 0,
        })
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Number of reads handed to the analyzer so far.
    pub fn len(&self) -> u64 {
        self.loaded
    }

    pub fn is_empty(&self) -> bool {
        self.loaded == 0
    }

    /// Queues one already-scoped read; insertion order breaks timestamp ties.
    pub fn push(&mut self, event: &IoEvent) -> Result<()> {
        self.pending.push(ReadRow {
            idx: to_i64("index", self.loaded)?,
            ts: event.timestamp,
            sector: to_i64("sector", event.start_sector.get())?,
            size_sectors: to_i64("length", event.length_sectors)?,
        });
        self.loaded += 1;
        if self.pending.len() >= APPEND_CHUNK_ROWS {
            self.flush_pending()?;
        }
        Ok(())
    }

    pub fn load<'a>(&mut self, events: impl IntoIterator<Item = &'a IoEvent>) -> Result<()> {
        for event in events {
            self.push(event)?;
        }
        self.flush_pending()
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // Rows are committed when the appender is dropped at the end of this scope.
        let mut appender = self.conn.appender("reads").map_err(query_err)?;
        for row in self.pending.drain(..) {
            appender
                .append_row(params![row.idx, row.ts, row.sector, row.size_sectors])
                .map_err(query_err)?;
        }
        Ok(())
    }

    pub fn analyze(&mut self) -> Result<AnalysisOutcome<BatchReport>> {
        self.flush_pending()?;

        let (rows, total_sectors): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), CAST(COALESCE(SUM(size_sectors), 0) AS BIGINT) FROM reads",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(query_err)?;
        let total_reads = count(rows);
        if total_reads != self.loaded {
            return make_error_msg(
                TraceCode::QUERY_FAILED,
                format!("read table holds {} rows, {} were loaded", total_reads, self.loaded),
            );
        }
        if total_reads == 0 {
            tracing::info!("no reads left after scoping");
            return Ok(AnalysisOutcome::NoSignal);
        }

        let total_bytes = sectors_to_bytes(count(total_sectors));
        let unique_sectors = self.unique_sectors()?;
        let unique_bytes = sectors_to_bytes(unique_sectors);
        let gaps = self.gap_stats()?;
        let bandwidth = self.bandwidth()?;

        let sequential = SequentialCounts {
            threshold_sectors: self.options.seq_threshold_sectors,
            sequential: gaps.sequential,
            random: gaps.random,
        };
        let pattern = AccessPatternSummary::from_counters(
            self.options.seq_threshold_sectors,
            total_reads,
            total_bytes,
            gaps.sequential,
            gaps.random,
            gaps.avg_abs_gap,
            gaps.intervals,
        );
        let unique_coverage_pct = self
            .options
            .reference_size_bytes
            .filter(|&size| size > 0)
            .map(|size| unique_bytes as f64 / size as f64 * 100.0);
        let reread_amplification = if unique_bytes > 0 {
            total_bytes as f64 / unique_bytes as f64
        } else {
            0.0
        };

        tracing::info!(
            reads = total_reads,
            total_mb = bytes_to_mb(total_bytes),
            unique_mb = bytes_to_mb(unique_bytes),
            windows = bandwidth.windows.len(),
            "batch analysis complete"
        );

        Ok(AnalysisOutcome::Signal(BatchReport {
            total_reads,
            total_bytes_read: total_bytes,
            total_mb_read: bytes_to_mb(total_bytes),
            unique_sectors,
            unique_bytes,
            unique_mb: bytes_to_mb(unique_bytes),
            unique_coverage_pct,
            reread_amplification,
            gap_distribution: gaps.histogram,
            bandwidth,
            sequential,
            pattern,
        }))
    }

    /// Cardinality of the union of all `[sector, sector + size)` ranges.
    fn unique_sectors(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row(
                "WITH expanded AS (
                     SELECT UNNEST(generate_series(sector, sector + size_sectors - 1)) AS s
                     FROM reads
                     WHERE size_sectors > 0
                 )
                 SELECT COUNT(DISTINCT s) FROM expanded",
                [],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count(n))
    }

    fn gap_stats(&self) -> Result<GapRow> {
        let small = to_i64("gap_small_sectors", self.options.gap_small_sectors)?;
        let medium = to_i64("gap_medium_sectors", self.options.gap_medium_sectors)?;
        let threshold = to_i64("seq_threshold_sectors", self.options.seq_threshold_sectors)?;
        let sql = format!(
            "WITH ordered AS (
                 SELECT
                     sector - (LAG(sector) OVER w + LAG(size_sectors) OVER w) AS gap,
                     (ts - LAG(ts) OVER w) * 1000.0 AS interval_ms
                 FROM reads
                 WINDOW w AS (ORDER BY ts, idx)
             )
             SELECT
                 COUNT(*) FILTER (WHERE gap = 0),
                 COUNT(*) FILTER (WHERE gap > 0 AND gap < {small}),
                 COUNT(*) FILTER (WHERE gap >= {small} AND gap < {medium}),
                 COUNT(*) FILTER (WHERE gap >= {medium}),
                 COUNT(*) FILTER (WHERE gap < 0),
                 COUNT(*),
                 COUNT(*) FILTER (WHERE ABS(gap) <= {threshold}),
                 COUNT(*) FILTER (WHERE ABS(gap) > {threshold}),
                 COALESCE(AVG(ABS(gap)), 0.0),
                 COALESCE(AVG(interval_ms), 0.0),
                 COALESCE(MIN(interval_ms), 0.0),
                 COALESCE(MAX(interval_ms), 0.0)
             FROM ordered
             WHERE gap IS NOT NULL"
        );
        self.conn
            .query_row(&sql, [], |row| {
                Ok(GapRow {
                    histogram: GapHistogram {
                        perfect_sequential: count(row.get(0)?),
                        small: count(row.get(1)?),
                        medium: count(row.get(2)?),
                        large: count(row.get(3)?),
                        backward: count(row.get(4)?),
                        total: count(row.get(5)?),
                    },
                    sequential: count(row.get(6)?),
                    random: count(row.get(7)?),
                    avg_abs_gap: row.get(8)?,
                    intervals: IntervalStats {
                        mean_ms: row.get(9)?,
                        min_ms: row.get(10)?,
                        max_ms: row.get(11)?,
                    },
                })
            })
            .map_err(query_err)
    }

    /// One-second windows keyed by the truncated timestamp.
    fn bandwidth(&self) -> Result<BandwidthReport> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT CAST(FLOOR(ts) AS BIGINT) AS second,
                        COUNT(*) AS operations,
                        CAST(SUM(size_sectors) AS BIGINT) AS sectors
                 FROM reads
                 GROUP BY second
                 ORDER BY second",
            )
            .map_err(query_err)?;
        let windows = stmt
            .query_map([], |row| {
                let sectors: i64 = row.get(2)?;
                Ok(BandwidthWindow {
                    second: row.get(0)?,
                    operations: count(row.get(1)?),
                    mb_read: bytes_to_mb(sectors_to_bytes(count(sectors))),
                })
            })
            .map_err(query_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err)?;

        if windows.is_empty() {
            return Ok(BandwidthReport::default());
        }
        let sum: f64 = windows.iter().map(|w| w.mb_read).sum();
        let peak = windows.iter().map(|w| w.mb_read).fold(0.0, f64::max);
        Ok(BandwidthReport {
            average_mb_per_sec: sum / windows.len() as f64,
            peak_mb_per_sec: peak,
            windows,
        })
    }
}
