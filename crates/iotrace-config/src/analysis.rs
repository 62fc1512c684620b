use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use iotrace_codec::{SchemaVersion, DEFAULT_OP_TABLE, MAX_EXPERTS};
use iotrace_logging::LogConfig;
use iotrace_types::units::{sectors_per_block, DEFAULT_BLOCK_SIZE};

use crate::{Config, ConfigError};

/// Block trace decoding and streaming analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlkSection {
    /// Largest gap, in sectors, still counted as a sequential read.
    #[serde(default = "default_seq_threshold")]
    pub seq_threshold_sectors: u64,

    /// Count only dispatched reads ("D" action). Disable to count every read line.
    #[serde(default = "default_true")]
    pub dispatched_reads_only: bool,

    /// Restrict analysis to one process.
    #[serde(default)]
    pub pid: Option<u32>,
}

/// File extent listing interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtentSection {
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Filter against every merged extent instead of the overall bound.
    #[serde(default)]
    pub fine_grained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_gap_small")]
    pub gap_small_sectors: u64,

    #[serde(default = "default_gap_medium")]
    pub gap_medium_sectors: u64,

    /// Largest expected trace the exact engine is chosen for.
    #[serde(default = "default_batch_max_events")]
    pub batch_max_events: u64,

    /// Size of the reference file, for coverage percentages.
    #[serde(default)]
    pub reference_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSection {
    #[serde(default = "default_schema")]
    pub schema: SchemaVersion,

    #[serde(default = "default_op_table")]
    pub op_table: String,

    /// Custom operation table file; overrides `op_table`.
    #[serde(default)]
    pub op_table_path: Option<PathBuf>,

    /// Routed experts expanded per expert tensor in disk access counts.
    #[serde(default = "default_heatmap_top_k")]
    pub heatmap_top_k: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub blk: BlkSection,
    #[serde(default)]
    pub extents: ExtentSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub tensor: TensorSection,
}

fn default_seq_threshold() -> u64 {
    256
}

fn default_true() -> bool {
    true
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_gap_small() -> u64 {
    256
}

fn default_gap_medium() -> u64 {
    2048
}

fn default_batch_max_events() -> u64 {
    5_000_000
}

fn default_schema() -> SchemaVersion {
    SchemaVersion::Wide
}

fn default_op_table() -> String {
    DEFAULT_OP_TABLE.into()
}

fn default_heatmap_top_k() -> usize {
    4
}

impl Default for BlkSection {
    fn default() -> Self {
        Self {
            seq_threshold_sectors: default_seq_threshold(),
            dispatched_reads_only: true,
            pid: None,
        }
    }
}

impl Default for ExtentSection {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            fine_grained: false,
        }
    }
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            gap_small_sectors: default_gap_small(),
            gap_medium_sectors: default_gap_medium(),
            batch_max_events: default_batch_max_events(),
            reference_size_bytes: None,
        }
    }
}

impl Default for TensorSection {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            op_table: default_op_table(),
            op_table_path: None,
            heatmap_top_k: default_heatmap_top_k(),
        }
    }
}

impl Config for BlkSection {}

impl Config for ExtentSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if sectors_per_block(self.block_size).is_none() {
            return Err(ConfigError::out_of_range(
                "extents.block_size",
                self.block_size,
                "must be a positive multiple of 512",
            ));
        }
        Ok(())
    }
}

impl Config for BatchSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.gap_small_sectors == 0 {
            return Err(ConfigError::out_of_range(
                "batch.gap_small_sectors",
                0,
                "must be positive",
            ));
        }
        if self.gap_small_sectors >= self.gap_medium_sectors {
            return Err(ConfigError::out_of_range(
                "batch.gap_small_sectors",
                self.gap_small_sectors,
                format!("must be below gap_medium_sectors ({})", self.gap_medium_sectors),
            ));
        }
        if self.reference_size_bytes == Some(0) {
            return Err(ConfigError::out_of_range(
                "batch.reference_size_bytes",
                0,
                "must be positive when set",
            ));
        }
        Ok(())
    }
}

impl Config for TensorSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.heatmap_top_k > MAX_EXPERTS {
            return Err(ConfigError::out_of_range(
                "tensor.heatmap_top_k",
                self.heatmap_top_k,
                format!("at most {} experts are recorded", MAX_EXPERTS),
            ));
        }
        Ok(())
    }
}

impl Config for AnalysisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.blk.validate()?;
        self.extents.validate()?;
        self.batch.validate()?;
        self.tensor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let value: toml::Value = toml::from_str("").unwrap();
        let config = AnalysisConfig::from_toml(&value).unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.blk.seq_threshold_sectors, 256);
        assert!(config.blk.dispatched_reads_only);
        assert_eq!(config.extents.block_size, 4096);
        assert_eq!(config.batch.gap_small_sectors, 256);
        assert_eq!(config.batch.gap_medium_sectors, 2048);
        assert_eq!(config.batch.batch_max_events, 5_000_000);
        assert_eq!(config.tensor.schema, SchemaVersion::Wide);
        assert_eq!(config.tensor.op_table, "ggml-78");
        assert_eq!(config.tensor.heatmap_top_k, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let value: toml::Value = toml::from_str(
            r#"
            [blk]
            pid = 4242
            seq_threshold_sectors = 0

            [tensor]
            schema = "wide-experts"
            "#,
        )
        .unwrap();
        let config = AnalysisConfig::from_toml(&value).unwrap();
        assert_eq!(config.blk.pid, Some(4242));
        assert_eq!(config.blk.seq_threshold_sectors, 0);
        assert_eq!(config.tensor.schema, SchemaVersion::WideExperts);
        assert_eq!(config.batch, BatchSection::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_block_size_must_be_sector_multiple() {
        let config = ExtentSection {
            block_size: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
        let config = ExtentSection {
            block_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gap_thresholds_ordered() {
        let config = BatchSection {
            gap_small_sectors: 2048,
            gap_medium_sectors: 2048,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gap_small_sectors"));
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let value: toml::Value = toml::from_str("[extents]\nblock_size = \"big\"").unwrap();
        assert!(matches!(
            AnalysisConfig::from_toml(&value),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_render_roundtrips() {
        let config = AnalysisConfig::default();
        let text = config.render().unwrap();
        let value: toml::Value = toml::from_str(&text).unwrap();
        assert_eq!(AnalysisConfig::from_toml(&value).unwrap(), config);
    }
}
