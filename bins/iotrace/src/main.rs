use std::process::ExitCode;

use clap::Parser;

use iotrace_cli::output::Printer;
use iotrace_cli::progress::Timer;
use iotrace_cli::{AnalysisEnv, Commands, GlobalOptions, OutputFormat};
use iotrace_types::{Status, StatusCode};

/// Trace decoding and access-pattern analysis
///
/// Reads block-layer traces, file extent listings, binary tensor-access
/// traces and buffer allocation logs, and reports how the storage was read.
#[derive(Parser, Debug)]
#[command(name = "iotrace", version, about)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    /// Output format (table or json).
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Show timing information for the executed command.
    #[arg(long, global = true, default_value_t = false)]
    profile: bool,

    #[command(subcommand)]
    command: Commands,
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<Status>()
        .map_or_else(|| Status::new(StatusCode::UNKNOWN).exit_code(), Status::exit_code);
    u8::try_from(code).unwrap_or(1)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = match AnalysisEnv::load(&cli.global) {
        Ok(env) => env,
        Err(status) => {
            let _ = Printer::stdout(cli.format).print_error(&status.describe());
            return ExitCode::from(exit_code(&status.into()));
        }
    };

    let _guard = iotrace_logging::init_logging(&env.config.log.clone().verbose(cli.verbose));
    tracing::debug!(source = %env.config_source(), "configuration loaded");
    tracing::debug!(command = ?cli.command, "starting");

    let timer = cli.profile.then(|| Timer::start("command"));
    let result = cli.command.run(&env, cli.format);
    if let Some(timer) = timer {
        timer.stop();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            ExitCode::from(exit_code(&e))
        }
    }
}
