use std::path::Path;

use crate::{Config, ConfigError};

/// Reads, parses and validates a configuration file.
pub fn load_config<T: Config>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    let config = T::from_toml(&value)?;
    config.validate()?;
    Ok(config)
}

/// `load_config` when a path is given, validated defaults otherwise.
pub fn load_or_default<T: Config + Default>(path: Option<&Path>) -> Result<T, ConfigError> {
    match path {
        Some(p) => load_config(p),
        None => {
            let config = T::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnalysisConfig;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("iotrace_test_config_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_config_file() {
        let dir = scratch("load");
        let path = dir.join("iotrace.toml");
        std::fs::write(
            &path,
            "[batch]\nreference_size_bytes = 1048576\n[extents]\nfine_grained = true\n",
        )
        .unwrap();

        let config: AnalysisConfig = load_config(&path).unwrap();
        assert_eq!(config.batch.reference_size_bytes, Some(1_048_576));
        assert!(config.extents.fine_grained);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = scratch("invalid");
        let path = dir.join("iotrace.toml");
        std::fs::write(&path, "[extents]\nblock_size = 100\n").unwrap();

        let err = load_config::<AnalysisConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("iotrace_no_such_config.toml");
        assert!(matches!(
            load_config::<AnalysisConfig>(&path),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config: AnalysisConfig = load_or_default(None).unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }
}
