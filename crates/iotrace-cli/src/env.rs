//! Options shared by every subcommand and the analysis environment built
//! from them.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use iotrace_config::{load_or_default, AnalysisConfig};
use iotrace_types::{Result, Status, TraceCode};

/// Path that stands for standard input.
pub const STDIN_PATH: &str = "-";

#[derive(Debug, Clone, Default, clap::Args)]
pub struct GlobalOptions {
    /// Analysis configuration file (TOML). Built-in defaults when omitted.
    #[arg(long, global = true, env = "IOTRACE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Loaded configuration for one invocation.
#[derive(Debug, Clone, Default)]
pub struct AnalysisEnv {
    pub config: AnalysisConfig,
    /// File the configuration was read from; `None` means built-in defaults.
    pub config_path: Option<PathBuf>,
}

impl AnalysisEnv {
    /// Loads the configuration without logging: the subscriber is built from
    /// this configuration, so callers report the load once it is installed.
    pub fn load(options: &GlobalOptions) -> Result<Self> {
        let config = load_or_default::<AnalysisConfig>(options.config.as_deref())?;
        Ok(Self {
            config,
            config_path: options.config.clone(),
        })
    }

    pub fn with_config(config: AnalysisConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    /// Where the configuration came from, for log lines.
    pub fn config_source(&self) -> String {
        match &self.config_path {
            Some(path) => path.display().to_string(),
            None => "defaults".to_string(),
        }
    }
}

/// Fails with `INPUT_NOT_FOUND` unless `path` names an existing file.
pub fn require_input(path: &Path) -> Result<()> {
    if path.as_os_str() == STDIN_PATH || path.is_file() {
        return Ok(());
    }
    Err(Status::with_message(
        TraceCode::INPUT_NOT_FOUND,
        format!("{}: no such file", path.display()),
    ))
}

pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    require_input(path)?;
    if path.as_os_str() == STDIN_PATH {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).map_err(|e| Status::input_not_found(path, e))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn read_input_to_string(path: &Path) -> Result<String> {
    let mut text = String::new();
    open_input(path)?.read_to_string(&mut text)?;
    Ok(text)
}
