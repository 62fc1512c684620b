use std::path::Path;

use serde::{Deserialize, Serialize};

use iotrace_types::{make_error_msg, Result, Status, StatusCode, TraceCode};

/// Operation enumeration of the instrumented engine at the ggml revision with
/// 78 operations. Order is significant: the code in a record is an index.
const GGML_78: [&str; 78] = [
    "NONE",
    "DUP",
    "ADD",
    "MUL",
    "DIV",
    "SQR",
    "SQRT",
    "LOG",
    "SIN",
    "COS",
    "SUM",
    "SUM_ROWS",
    "MEAN",
    "ARGMAX",
    "COUNT_EQUAL",
    "REPEAT",
    "REPEAT_BACK",
    "CONCAT",
    "SILU_BACK",
    "NORM",
    "RMS_NORM",
    "RMS_NORM_BACK",
    "GROUP_NORM",
    "MUL_MAT",
    "MUL_MAT_ID",
    "OUT_PROD",
    "SCALE",
    "SET",
    "CPY",
    "CONT",
    "RESHAPE",
    "VIEW",
    "PERMUTE",
    "TRANSPOSE",
    "GET_ROWS",
    "GET_ROWS_BACK",
    "DIAG",
    "DIAG_MASK_INF",
    "DIAG_MASK_ZERO",
    "SOFT_MAX",
    "SOFT_MAX_BACK",
    "ROPE",
    "ROPE_BACK",
    "CLAMP",
    "CONV_TRANSPOSE_1D",
    "IM2COL",
    "IM2COL_BACK",
    "CONV_TRANSPOSE_2D",
    "POOL_1D",
    "POOL_2D",
    "POOL_2D_BACK",
    "UPSCALE",
    "PAD",
    "ARANGE",
    "TIMESTEP_EMBEDDING",
    "ARGSORT",
    "LEAKY_RELU",
    "FLASH_ATTN_EXT",
    "FLASH_ATTN_BACK",
    "SSM_CONV",
    "SSM_SCAN",
    "WIN_PART",
    "WIN_UNPART",
    "GET_REL_POS",
    "ADD_REL_POS",
    "RWKV_WKV6",
    "UNARY",
    "MAP_UNARY",
    "MAP_BINARY",
    "MAP_CUSTOM1_F32",
    "MAP_CUSTOM2_F32",
    "MAP_CUSTOM3_F32",
    "MAP_CUSTOM1",
    "MAP_CUSTOM2",
    "MAP_CUSTOM3",
    "CROSS_ENTROPY_LOSS",
    "CROSS_ENTROPY_LOSS_BACK",
    "OPT_STEP_ADAMW",
];

/// First-generation tracer codes. Code 0 was never assigned.
const LEGACY_3: [&str; 4] = ["", "MUL_MAT", "ADD", "ROPE"];

pub const DEFAULT_OP_TABLE: &str = "ggml-78";

/// Version-stamped operation name table.
///
/// Loaded once per run and passed explicitly; an empty name marks an
/// unassigned code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpTable {
    version: String,
    names: Vec<String>,
}

impl OpTable {
    pub fn builtin_versions() -> &'static [&'static str] {
        &["ggml-78", "legacy-3"]
    }

    pub fn builtin(version: &str) -> Result<OpTable> {
        let names: &[&str] = match version {
            "ggml-78" => &GGML_78,
            "legacy-3" => &LEGACY_3,
            other => {
                return make_error_msg(
                    TraceCode::UNKNOWN_OP_TABLE,
                    format!(
                        "no built-in operation table '{}' (known: {})",
                        other,
                        Self::builtin_versions().join(", ")
                    ),
                )
            }
        };
        Ok(OpTable {
            version: version.to_string(),
            names: names.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Parses a custom table: `version = "..."` and `names = [...]`.
    pub fn from_toml_str(text: &str) -> Result<OpTable> {
        let table: OpTable = toml::from_str(text).map_err(|e| {
            Status::with_message(StatusCode::INVALID_FORMAT, format!("operation table: {}", e))
        })?;
        if table.version.trim().is_empty() {
            return make_error_msg(StatusCode::INVALID_FORMAT, "operation table has no version");
        }
        if table.names.len() > usize::from(u8::MAX) + 1 {
            return make_error_msg(
                StatusCode::INVALID_FORMAT,
                format!("operation table lists {} names, codes are one byte", table.names.len()),
            );
        }
        Ok(table)
    }

    pub fn load_file(path: &Path) -> Result<OpTable> {
        let text = std::fs::read_to_string(path).map_err(|e| Status::input_not_found(path, e))?;
        let table = Self::from_toml_str(&text)?;
        tracing::debug!(version = %table.version, ops = table.names.len(), "loaded operation table");
        Ok(table)
    }

    /// Custom file when given, built-in table by name otherwise.
    pub fn resolve(version: &str, path: Option<&Path>) -> Result<OpTable> {
        match path {
            Some(p) => Self::load_file(p),
            None => Self::builtin(version),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, code: u8) -> Option<&str> {
        self.names
            .get(usize::from(code))
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
