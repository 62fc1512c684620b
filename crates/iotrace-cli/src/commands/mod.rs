//! CLI command definitions and handlers.
//!
//! Each command group lives in its own module and returns a
//! [`CommandOutput`]; [`Commands::run`] prints it.

pub mod blk;
pub mod buffers;
pub mod extents;
pub mod tensor;

use std::path::Path;

use clap::Subcommand;
use serde::Serialize;

use iotrace_analytics::{write_json, JsonDirSink};
use iotrace_types::{make_error_msg, Result, StatusCode};

use crate::env::AnalysisEnv;
use crate::output::{CommandOutput, OutputFormat, Printer};

pub use blk::BlkCommands;
pub use buffers::BuffersArgs;
pub use extents::ExtentsArgs;
pub use tensor::TensorCommands;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sequential/random analysis of a blkparse trace.
    #[command(subcommand)]
    Blk(BlkCommands),

    /// Show the merged physical layout of a file from `filefrag -v` output.
    Extents(ExtentsArgs),

    /// Tensor-access traces: per-token export and summary statistics.
    #[command(subcommand)]
    Tensor(TensorCommands),

    /// Replay a buffer allocation log into a lifecycle timeline.
    Buffers(BuffersArgs),
}

impl Commands {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        match self {
            Self::Blk(cmd) => cmd.execute(env),
            Self::Extents(args) => args.execute(env),
            Self::Tensor(cmd) => cmd.execute(env),
            Self::Buffers(args) => args.execute(env),
        }
    }

    pub fn run(&self, env: &AnalysisEnv, output_format: OutputFormat) -> anyhow::Result<()> {
        let mut printer = Printer::stdout(output_format);
        match self.execute(env) {
            Ok(output) => {
                printer.print_output(&output)?;
                Ok(())
            }
            Err(e) => {
                printer.print_error(&format!("{:#}", e))?;
                Err(e)
            }
        }
    }
}

/// Writes one result document to `path` through a directory sink.
pub(crate) fn export_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("{}: output must name a file", path.display()),
        );
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let sink = JsonDirSink::create(dir)?;
    write_json(&sink, name, doc)?;
    tracing::info!(path = %path.display(), "result written");
    Ok(())
}
