use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

pub use tracing::{debug, error, info, trace, warn};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level filter used when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. No file output when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// "hourly", "daily" or "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    /// Console output goes to stderr so stdout stays clean for reports.
    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "iotrace".into()
}

fn default_rotation() -> String {
    "hourly".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    /// Raises the level to `debug` for `-v`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = "debug".into();
        }
        self
    }

    fn rotation(&self) -> Rotation {
        match self.rotation.as_str() {
            "daily" => Rotation::DAILY,
            "never" => Rotation::NEVER,
            _ => Rotation::HOURLY,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

fn console_layer(config: &LogConfig) -> Option<BoxedLayer> {
    if !config.console_output {
        return None;
    }
    let layer = fmt::layer().with_writer(std::io::stderr);
    Some(if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    })
}

fn file_layer(config: &LogConfig) -> (Option<BoxedLayer>, Option<WorkerGuard>) {
    let Some(log_dir) = config.log_dir.as_ref() else {
        return (None, None);
    };

    let appender = match rolling::RollingFileAppender::builder()
        .rotation(config.rotation())
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(log_dir)
    {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("iotrace: file logging disabled, {}: {}", log_dir.display(), e);
            return (None, None);
        }
    };

    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    let layer = if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    };
    (Some(layer), Some(guard))
}

/// Installs the global subscriber. Call once at startup and keep the
/// returned guard alive until exit so buffered file output is flushed.
///
/// A second call is a no-op.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let (file, guard) = file_layer(config);
    let layers: Vec<BoxedLayer> = console_layer(config).into_iter().chain(file).collect();

    let installed = tracing_subscriber::registry()
        .with(layers.with_filter(config.env_filter()))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(level = %config.level, file = ?config.log_dir, "logging initialized");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.file_prefix, "iotrace");
        assert!(config.console_output);
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(LogConfig::default().verbose(true).level, "debug");
        assert_eq!(LogConfig::default().verbose(false).level, "info");
    }

    #[test]
    fn test_rotation_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.rotation(), Rotation::HOURLY);
        config.rotation = "daily".into();
        assert_eq!(config.rotation(), Rotation::DAILY);
        config.rotation = "bogus".into();
        assert_eq!(config.rotation(), Rotation::HOURLY);
    }

    #[test]
    fn test_file_logging_returns_guard() {
        let dir = std::env::temp_dir().join("iotrace_test_logging");
        let config = LogConfig {
            log_dir: Some(dir.clone()),
            console_output: false,
            ..Default::default()
        };
        let guard = init_logging(&config);
        assert!(guard.is_some());
        drop(guard);
        std::fs::remove_dir_all(&dir).ok();
    }
}
