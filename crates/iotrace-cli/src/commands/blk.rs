//! Block trace commands.
//!
//! - `blk stream`: constant-memory analysis, reads from a file or stdin.
//! - `blk batch`: exact analysis against a reference file's extents.
//! - `blk auto`: picks one of the two from the expected event count.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use serde::Serialize;

use iotrace_analytics::{
    select_strategy, AccessPatternSummary, AnalysisOutcome, BatchAnalyzer, BatchOptions,
    BatchReport, BlkTraceReader, EventScope, ExtentMap, IngestStats, IoEvent, ScopeStats,
    StreamingAnalyzer,
};
use iotrace_config::{BatchSection, BlkSection};
use iotrace_types::Result;

use super::export_document;
use crate::env::{open_input, read_input_to_string, require_input, AnalysisEnv};
use crate::output::{format_bytes, kv_row, opt_cell, CommandOutput, OutputTable};

#[derive(Debug, Subcommand)]
pub enum BlkCommands {
    /// Single pass, constant memory. Use `-` to read blkparse output from stdin.
    Stream(StreamArgs),

    /// Exact analysis with gap histogram, unique coverage and bandwidth.
    Batch(BatchArgs),

    /// Batch when the expected event count is small enough, streaming otherwise.
    Auto(AutoArgs),
}

/// Filters and output shared by every `blk` command.
#[derive(Debug, Clone, Default, Args)]
pub struct ScopeArgs {
    /// Only reads issued by this process id.
    #[arg(long)]
    pub pid: Option<u32>,

    /// Largest gap, in sectors, still counted as sequential.
    #[arg(long)]
    pub threshold: Option<u64>,

    /// Count every read line instead of dispatched reads only.
    #[arg(long, default_value_t = false)]
    pub all_reads: bool,

    /// Also write the full result as JSON to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ScopeArgs {
    /// Config values with command-line overrides applied.
    pub fn blk_section(&self, base: &BlkSection) -> BlkSection {
        BlkSection {
            seq_threshold_sectors: self.threshold.unwrap_or(base.seq_threshold_sectors),
            dispatched_reads_only: base.dispatched_reads_only && !self.all_reads,
            pid: self.pid.or(base.pid),
        }
    }
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// blkparse text output, or `-` for stdin.
    pub input: PathBuf,

    /// `filefrag -v` output of the file under study.
    #[arg(long)]
    pub filefrag: Option<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub filefrag: PathBuf,

    /// Reference file size for coverage; defaults to the extents' total.
    #[arg(long)]
    pub reference_size: Option<u64>,

    /// Upper bound (exclusive) of small gaps, in sectors.
    #[arg(long)]
    pub gap_small: Option<u64>,

    /// Upper bound (exclusive) of medium gaps, in sectors.
    #[arg(long)]
    pub gap_medium: Option<u64>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Debug, Args)]
pub struct AutoArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub filefrag: Option<PathBuf>,

    /// Expected number of scoped reads; unknown means streaming.
    #[arg(long)]
    pub expected_events: Option<u64>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Everything one `blk` run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BlkRunReport<T> {
    pub strategy: &'static str,
    pub ingest: IngestStats,
    pub scope: ScopeStats,
    #[serde(flatten)]
    pub outcome: AnalysisOutcome<T>,
}

impl BlkCommands {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        match self {
            Self::Stream(args) => args.execute(env),
            Self::Batch(args) => args.execute(env),
            Self::Auto(args) => args.execute(env),
        }
    }
}

fn load_extents(path: &Path, env: &AnalysisEnv) -> Result<ExtentMap> {
    let text = read_input_to_string(path)?;
    ExtentMap::from_filefrag(&text, env.config.extents.block_size)
}

fn check_inputs(input: &Path, filefrag: Option<&Path>) -> Result<()> {
    require_input(input)?;
    if let Some(path) = filefrag {
        require_input(path)?;
    }
    Ok(())
}

/// Feeds every admitted read of `input` to `sink`.
fn scan(
    input: &Path,
    scope: &mut EventScope,
    mut sink: impl FnMut(&IoEvent) -> Result<()>,
) -> Result<IngestStats> {
    let mut reader = BlkTraceReader::new(open_input(input)?);
    for event in reader.by_ref() {
        let event = event?;
        if scope.admits(&event) {
            sink(&event)?;
        }
    }
    let stats = reader.stats();
    let scoped = scope.stats();
    tracing::info!(
        lines = stats.lines,
        events = stats.events,
        malformed = stats.malformed,
        admitted = scoped.admitted,
        "block trace scanned"
    );
    if stats.malformed > 0 {
        tracing::warn!(malformed = stats.malformed, "skipped malformed blkparse lines");
    }
    Ok(stats)
}

fn scope_for(
    env: &AnalysisEnv,
    blk: &BlkSection,
    filefrag: Option<&Path>,
) -> Result<EventScope> {
    let map = filefrag.map(|p| load_extents(p, env)).transpose()?;
    Ok(EventScope::from_config(blk, &env.config.extents, map))
}

fn finish<T: Serialize>(
    report: &BlkRunReport<T>,
    output: Option<&Path>,
    mut table: OutputTable,
) -> anyhow::Result<CommandOutput> {
    if let Some(path) = output {
        export_document(path, report)?;
        table.push(kv_row("Written to", path.display()));
    }
    Ok(CommandOutput::new(table).with_document(report)?)
}

fn run_rows(strategy: &str, ingest: &IngestStats, scope: &ScopeStats) -> OutputTable {
    vec![
        kv_row("Strategy", strategy),
        kv_row("Lines read", ingest.lines),
        kv_row("Malformed lines", ingest.malformed),
        kv_row("Reads in scope", scope.admitted),
        kv_row("Rejected (kind)", scope.rejected_kind),
        kv_row("Rejected (pid)", scope.rejected_pid),
        kv_row("Rejected (range)", scope.rejected_range),
    ]
}

pub fn summary_rows(summary: &AccessPatternSummary) -> OutputTable {
    vec![
        kv_row("Total reads", summary.total_reads),
        kv_row("Total read", format_bytes(summary.total_bytes)),
        kv_row(
            "Sequential reads",
            format!("{} ({:.1}%)", summary.sequential_reads, summary.sequential_percent),
        ),
        kv_row("Random reads", summary.random_reads),
        kv_row("Threshold (sectors)", summary.threshold_sectors),
        kv_row(
            "Average gap",
            format!("{:.1} sectors ({:.1} KB)", summary.avg_gap_sectors, summary.avg_gap_kb),
        ),
        kv_row(
            "Interval ms (mean/min/max)",
            format!(
                "{:.3} / {:.3} / {:.3}",
                summary.mean_interval_ms, summary.min_interval_ms, summary.max_interval_ms
            ),
        ),
        kv_row("Classification", summary.classification),
    ]
}

fn batch_rows(report: &BatchReport) -> OutputTable {
    let gaps = &report.gap_distribution;
    let bucket = |count: u64| format!("{} ({:.1}%)", count, gaps.percent(count));
    let mut rows = summary_rows(&report.pattern);
    rows.extend([
        kv_row("Unique read", format_bytes(report.unique_bytes)),
        kv_row(
            "Unique coverage",
            opt_cell(report.unique_coverage_pct.map(|p| format!("{:.1}%", p))),
        ),
        kv_row("Re-read amplification", format!("{:.2}x", report.reread_amplification)),
        kv_row("Gaps: sequential", bucket(gaps.perfect_sequential)),
        kv_row("Gaps: small", bucket(gaps.small)),
        kv_row("Gaps: medium", bucket(gaps.medium)),
        kv_row("Gaps: large", bucket(gaps.large)),
        kv_row("Gaps: backward", bucket(gaps.backward)),
        kv_row(
            "Bandwidth MB/s (avg/peak)",
            format!(
                "{:.2} / {:.2}",
                report.bandwidth.average_mb_per_sec, report.bandwidth.peak_mb_per_sec
            ),
        ),
    ]);
    rows
}

fn outcome_rows<T>(outcome: &AnalysisOutcome<T>, rows: impl FnOnce(&T) -> OutputTable) -> OutputTable {
    match outcome.as_signal() {
        Some(value) => rows(value),
        None => vec![kv_row("Result", "no reads in scope")],
    }
}

impl StreamArgs {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        check_inputs(&self.input, self.filefrag.as_deref())?;
        let blk = self.scope.blk_section(&env.config.blk);
        let mut scope = scope_for(env, &blk, self.filefrag.as_deref())?;

        let mut analyzer = StreamingAnalyzer::new(blk.seq_threshold_sectors);
        let ingest = scan(&self.input, &mut scope, |ev| {
            analyzer.observe(ev);
            Ok(())
        })?;

        let report = BlkRunReport {
            strategy: "streaming",
            ingest,
            scope: scope.stats(),
            outcome: analyzer.summary(),
        };
        let mut table = run_rows(report.strategy, &report.ingest, &report.scope);
        table.extend(outcome_rows(&report.outcome, summary_rows));
        finish(&report, self.scope.output.as_deref(), table)
    }
}

impl BatchArgs {
    /// Reference size precedence: flag, then config, then the extents' total.
    fn options(&self, env: &AnalysisEnv, blk: &BlkSection, map: &ExtentMap) -> BatchOptions {
        let base = &env.config.batch;
        let section = BatchSection {
            gap_small_sectors: self.gap_small.unwrap_or(base.gap_small_sectors),
            gap_medium_sectors: self.gap_medium.unwrap_or(base.gap_medium_sectors),
            reference_size_bytes: self
                .reference_size
                .or(base.reference_size_bytes)
                .or(Some(map.total_bytes())),
            ..base.clone()
        };
        BatchOptions::from_config(&section, blk.seq_threshold_sectors)
    }

    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        check_inputs(&self.input, Some(self.filefrag.as_path()))?;
        let blk = self.scope.blk_section(&env.config.blk);
        let map = load_extents(&self.filefrag, env)?;
        let options = self.options(env, &blk, &map);
        let mut scope = EventScope::from_config(&blk, &env.config.extents, Some(map));

        let mut analyzer = BatchAnalyzer::new(options)?;
        let ingest = scan(&self.input, &mut scope, |ev| analyzer.push(ev))?;

        let report = BlkRunReport {
            strategy: "batch",
            ingest,
            scope: scope.stats(),
            outcome: analyzer.analyze()?,
        };
        let mut table = run_rows(report.strategy, &report.ingest, &report.scope);
        table.extend(outcome_rows(&report.outcome, batch_rows));
        finish(&report, self.scope.output.as_deref(), table)
    }
}

impl AutoArgs {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        check_inputs(&self.input, self.filefrag.as_deref())?;
        let blk = self.scope.blk_section(&env.config.blk);
        let mut scope = scope_for(env, &blk, self.filefrag.as_deref())?;

        let options = BatchOptions::from_config(&env.config.batch, blk.seq_threshold_sectors);
        let mut strategy =
            select_strategy(self.expected_events, &options, blk.seq_threshold_sectors)?;
        let ingest = scan(&self.input, &mut scope, |ev| strategy.observe(ev))?;

        let report = BlkRunReport {
            strategy: strategy.name(),
            ingest,
            scope: scope.stats(),
            outcome: strategy.finish()?,
        };
        let mut table = run_rows(report.strategy, &report.ingest, &report.scope);
        table.extend(outcome_rows(&report.outcome, summary_rows));
        finish(&report, self.scope.output.as_deref(), table)
    }
}
