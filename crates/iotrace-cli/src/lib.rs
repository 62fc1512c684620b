//! Command-line interface for trace decoding and access-pattern analysis.
//!
//! Commands are clap derive types grouped by input kind:
//!
//! - **[`commands::blk`]**: blkparse traces through the streaming, batch or
//!   automatically chosen analyzer.
//! - **[`commands::extents`]**: `filefrag -v` listings.
//! - **[`commands::tensor`]**: binary tensor-access traces (export, stats).
//! - **[`commands::buffers`]**: buffer allocation logs.
//!
//! Every command returns a [`output::CommandOutput`]: a key/value table for
//! the terminal and the full JSON document for `--format json`.
//!
//! ```ignore
//! use clap::Parser;
//! use iotrace_cli::{AnalysisEnv, Commands, GlobalOptions, OutputFormat};
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     global: GlobalOptions,
//!
//!     #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
//!     format: OutputFormat,
//!
//!     #[command(subcommand)]
//!     command: Commands,
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse();
//!     let env = AnalysisEnv::load(&cli.global)?;
//!     cli.command.run(&env, cli.format)
//! }
//! ```

pub mod commands;
pub mod env;
pub mod output;
pub mod progress;

pub use commands::Commands;
pub use env::{AnalysisEnv, GlobalOptions};
pub use output::{CommandOutput, OutputFormat, OutputTable, Printer};
