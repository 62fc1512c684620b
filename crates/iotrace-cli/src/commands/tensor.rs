//! Tensor-access trace commands.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use iotrace_analytics::{
    aggregate_by_token, disk_access_counts, validate_tensor_indices, DocumentSink,
    IndexValidation, JsonDirSink, Manifest, TraceStatistics,
};
use iotrace_codec::{read_trace_file, OpTable, ReaderStats, SchemaVersion, TensorAccessEvent};
use iotrace_config::TensorSection;
use iotrace_types::{Result, TokenId};

use crate::env::{require_input, AnalysisEnv};
use crate::output::{kv_row, table_with_header, CommandOutput, OutputTable};

/// Disk-access rows shown in the table; the document has all of them.
const HEATMAP_ROWS: usize = 20;

#[derive(Debug, Subcommand)]
pub enum TensorCommands {
    /// Write one JSON document per token plus a manifest.
    Export(ExportArgs),

    /// Summarize a trace without writing anything.
    Stats(StatsArgs),
}

/// How to decode a trace file.
#[derive(Debug, Clone, Args)]
pub struct TraceArgs {
    /// Binary trace file.
    pub input: PathBuf,

    /// Record layout: compact, wide or wide-experts.
    #[arg(long)]
    pub schema: Option<SchemaVersion>,

    /// Built-in operation table (ggml-78, legacy-3).
    #[arg(long)]
    pub op_table: Option<String>,

    /// Custom operation table file (TOML); wins over `--op-table`.
    #[arg(long)]
    pub op_table_file: Option<PathBuf>,
}

struct DecodedTrace {
    schema: SchemaVersion,
    op_table: OpTable,
    events: Vec<TensorAccessEvent>,
    reader: ReaderStats,
}

impl TraceArgs {
    fn resolve_op_table(&self, base: &TensorSection) -> Result<OpTable> {
        match (&self.op_table_file, &self.op_table) {
            (Some(path), _) => OpTable::load_file(path),
            (None, Some(name)) => OpTable::builtin(name),
            (None, None) => OpTable::resolve(&base.op_table, base.op_table_path.as_deref()),
        }
    }

    fn decode(&self, base: &TensorSection) -> Result<DecodedTrace> {
        require_input(&self.input)?;
        let schema = self.schema.unwrap_or(base.schema);
        let op_table = self.resolve_op_table(base)?;
        let (events, reader) = read_trace_file(&self.input, schema)?;
        Ok(DecodedTrace {
            schema,
            op_table,
            events,
            reader,
        })
    }
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub trace: TraceArgs,

    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,

    /// Only these tokens, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub tokens: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedToken {
    pub token_id: TokenId,
    pub entries: u64,
    pub duration_ms: f64,
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub schema: SchemaVersion,
    pub op_table: String,
    pub reader: ReaderStats,
    pub out_dir: PathBuf,
    pub tokens: Vec<ExportedToken>,
    pub manifest: Manifest,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub trace: TraceArgs,

    /// Check that tensor indices agree with tensor names.
    #[arg(long, default_value_t = false)]
    pub validate_indices: bool,

    /// Count disk-backed reads per tensor.
    #[arg(long, default_value_t = false)]
    pub heatmap: bool,

    /// Only count disk reads up to this many ms after the first entry.
    #[arg(long)]
    pub until_ms: Option<f64>,

    /// Routed experts expanded per expert tensor; overrides the config.
    #[arg(long)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub schema: SchemaVersion,
    pub op_table: String,
    pub reader: ReaderStats,
    pub statistics: TraceStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_validation: Option<IndexValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_access_counts: Option<BTreeMap<String, u64>>,
}

impl TensorCommands {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        match self {
            Self::Export(args) => args.execute(env),
            Self::Stats(args) => args.execute(env),
        }
    }
}

fn reader_rows(trace: &DecodedTrace) -> OutputTable {
    vec![
        kv_row("Schema", trace.schema),
        kv_row("Operation table", trace.op_table.version()),
        kv_row("Records", trace.reader.records_read),
        kv_row("Malformed records", trace.reader.malformed),
        kv_row("Unknown memory sources", trace.reader.unknown_memory_source),
    ]
}

impl ExportArgs {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        let mut trace = self.trace.decode(&env.config.tensor)?;
        if !self.tokens.is_empty() {
            let wanted: BTreeSet<u32> = self.tokens.iter().copied().collect();
            trace.events.retain(|ev| wanted.contains(&ev.token_id.get()));
            let present: BTreeSet<u32> = trace.events.iter().map(|ev| ev.token_id.get()).collect();
            for missing in wanted.difference(&present) {
                tracing::warn!(token = missing, "requested token has no entries");
            }
        }

        let docs = aggregate_by_token(&trace.events, &trace.op_table, trace.schema);
        let sink = JsonDirSink::create(&self.out)?;
        let mut tokens = Vec::with_capacity(docs.len());
        for doc in &docs {
            let file = doc.file_name();
            sink.write_document(&file, &doc.to_canonical_json()?)?;
            tokens.push(ExportedToken {
                token_id: doc.token_id(),
                entries: doc.metadata.total_entries,
                duration_ms: doc.metadata.duration_ms,
                file,
            });
        }
        let manifest = sink.finish()?;

        let mut table = reader_rows(&trace);
        table.push(kv_row("Output directory", self.out.display()));
        table.extend(table_with_header(&["token", "entries", "duration_ms", "file"]));
        for t in &tokens {
            table.push(vec![
                t.token_id.to_string(),
                t.entries.to_string(),
                format!("{:.3}", t.duration_ms),
                t.file.clone(),
            ]);
        }

        let report = ExportReport {
            schema: trace.schema,
            op_table: trace.op_table.version().to_string(),
            reader: trace.reader,
            out_dir: self.out.clone(),
            tokens,
            manifest,
        };
        Ok(CommandOutput::new(table).with_document(&report)?)
    }
}

impl StatsArgs {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        let trace = self.trace.decode(&env.config.tensor)?;
        let statistics = TraceStatistics::compute(&trace.events, &trace.op_table);
        let index_validation = self
            .validate_indices
            .then(|| validate_tensor_indices(&trace.events));
        let top_k = self.top_k.unwrap_or(env.config.tensor.heatmap_top_k);
        let heatmap = self
            .heatmap
            .then(|| disk_access_counts(&trace.events, top_k, self.until_ms));

        let mut table = reader_rows(&trace);
        table.extend(stats_rows(&statistics));
        if let Some(v) = &index_validation {
            table.push(kv_row("Sources checked", v.checked_sources));
            table.push(kv_row("Unresolved indices", v.unresolved));
            table.push(kv_row("Index mismatches", v.mismatches.len()));
        }
        if let Some(counts) = &heatmap {
            table.extend(table_with_header(&["tensor", "disk_reads"]));
            let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (name, n) in ranked.into_iter().take(HEATMAP_ROWS) {
                table.push(vec![name.clone(), n.to_string()]);
            }
        }

        let report = StatsReport {
            schema: trace.schema,
            op_table: trace.op_table.version().to_string(),
            reader: trace.reader,
            statistics,
            index_validation,
            disk_access_counts: heatmap,
        };
        Ok(CommandOutput::new(table).with_document(&report)?)
    }
}

fn stats_rows(stats: &TraceStatistics) -> OutputTable {
    let mut rows = vec![
        kv_row("Entries", stats.total_entries),
        kv_row("Duration ms", format!("{:.3}", stats.duration_ms)),
        kv_row("Tokens", stats.tokens.len()),
        kv_row("Layers", stats.unique_layers.len()),
        kv_row("Sources", stats.total_sources),
        kv_row("Sources per entry", format!("{:.2}", stats.avg_sources_per_entry)),
        kv_row("Unique source tensors", stats.unique_source_tensors),
        kv_row("Disk sources with offset", format!("{}/{}", stats.disk_sources_with_offset, stats.disk_sources)),
        kv_row("Entries with experts", stats.entries_with_experts),
    ];
    for (kind, n) in &stats.memory_source_counts {
        rows.push(kv_row(&format!("Memory source {}", kind), n));
    }
    for (op, n) in &stats.operation_counts {
        rows.push(kv_row(&format!("Op {}", op), n));
    }
    rows
}
