use std::fmt;
use std::path::Path;

use crate::status_code::{self, StatusCode, TraceCode, status_code_t};

/// Outcome of an analysis step: a code plus an optional message.
///
/// Only a handful of codes abort a run (missing inputs, a file layout that
/// could not be established, bad configuration). Everything else the
/// analyzers encounter is counted in result metadata instead.
#[derive(Debug, Clone)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    /// An input file that could not be opened, as `"<path>: <cause>"`.
    pub fn input_not_found(path: &Path, cause: impl fmt::Display) -> Self {
        Self::with_message(
            TraceCode::INPUT_NOT_FOUND,
            format!("{}: {}", path.display(), cause),
        )
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Process exit code for a run that ended with this status.
    pub fn exit_code(&self) -> i32 {
        status_code::to_exit_code(self.code)
    }

    /// Human-readable form, e.g. `"Trace::NoExtents(4001) no extents in listing"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}

/// Read failures on an already opened input; opening is `input_not_found`.
impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        Self::with_message(StatusCode::IO_ERROR, err.to_string())
    }
}

/// Whole-document JSON failures. Per-line JSON errors are counted, not raised.
impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Self::with_message(StatusCode::INVALID_FORMAT, err.to_string())
    }
}
