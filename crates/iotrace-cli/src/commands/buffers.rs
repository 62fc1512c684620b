use std::path::PathBuf;

use clap::Args;

use iotrace_analytics::{parse_buffer_events, replay, BufferTimelineDocument};

use super::export_document;
use crate::env::{open_input, require_input, AnalysisEnv};
use crate::output::{format_bytes, kv_row, CommandOutput};

#[derive(Debug, Args)]
pub struct BuffersArgs {
    /// JSON-lines allocation log, or `-` for stdin.
    pub input: PathBuf,

    /// Write the timeline document to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl BuffersArgs {
    pub fn execute(&self, _env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        require_input(&self.input)?;
        let (events, skipped) = parse_buffer_events(open_input(&self.input)?)?;
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparsable allocation log lines");
        }
        let mut doc: BufferTimelineDocument = replay(&events);
        doc.metadata.skipped_lines = skipped;

        let meta = &doc.metadata;
        let mut table = vec![
            kv_row("Events", meta.total_events),
            kv_row("Buffers", meta.total_buffers),
            kv_row("Peak occupancy", format_bytes(meta.peak_occupancy_bytes)),
            kv_row("Final occupancy", format_bytes(meta.final_occupancy_bytes)),
            kv_row("Duration ms", format!("{:.3}", meta.duration_ms)),
            kv_row("Unknown deallocations", meta.unknown_deallocs),
            kv_row("Reused ids", meta.reused_allocs),
            kv_row("Skipped lines", meta.skipped_lines),
        ];
        for (usage, buffers) in &meta.usage_breakdown {
            table.push(kv_row(&format!("{} buffers", usage), buffers));
        }
        if let Some(path) = &self.output {
            export_document(path, &doc)?;
            table.push(kv_row("Written to", path.display()));
        }
        Ok(CommandOutput::new(table).with_document(&doc)?)
    }
}
