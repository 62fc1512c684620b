//! TOML configuration for analysis runs.

mod analysis;
mod loader;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use iotrace_types::{Status, StatusCode};

pub use analysis::{AnalysisConfig, BatchSection, BlkSection, ExtentSection, TensorSection};
pub use loader::{load_config, load_or_default};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("field '{field}' out of range: {value} ({reason})")]
    OutOfRange {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn out_of_range(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for Status {
    fn from(err: ConfigError) -> Self {
        Status::with_message(StatusCode::INVALID_CONFIG, err.to_string())
    }
}

/// A configuration section that can be read from TOML and checked.
pub trait Config: Sized + Serialize + DeserializeOwned {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        Ok(value.clone().try_into()?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn render(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
