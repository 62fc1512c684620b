/// Status code type alias.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INVALID_FORMAT: status_code_t = 33;
    pub const IO_ERROR: status_code_t = 35;
    pub const UNKNOWN: status_code_t = 999;
}

/// Trace analysis status codes (4000-4999).
pub mod TraceCode {
    use super::status_code_t;

    pub const INPUT_NOT_FOUND: status_code_t = 4000;
    pub const NO_EXTENTS: status_code_t = 4001;
    pub const RECORD_TRUNCATED: status_code_t = 4002;
    pub const UNSUPPORTED_SCHEMA: status_code_t = 4003;
    pub const UNKNOWN_OP_TABLE: status_code_t = 4004;
    pub const QUERY_FAILED: status_code_t = 4005;
    pub const EXPORT_FAILED: status_code_t = 4006;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeType {
    Invalid,
    Common,
    Trace,
}

pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        4000..=4999 => StatusCodeType::Trace,
        _ => StatusCodeType::Invalid,
    }
}

pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::IO_ERROR => "IoError",
        StatusCode::UNKNOWN => "Unknown",

        TraceCode::INPUT_NOT_FOUND => "Trace::InputNotFound",
        TraceCode::NO_EXTENTS => "Trace::NoExtents",
        TraceCode::RECORD_TRUNCATED => "Trace::RecordTruncated",
        TraceCode::UNSUPPORTED_SCHEMA => "Trace::UnsupportedSchema",
        TraceCode::UNKNOWN_OP_TABLE => "Trace::UnknownOpTable",
        TraceCode::QUERY_FAILED => "Trace::QueryFailed",
        TraceCode::EXPORT_FAILED => "Trace::ExportFailed",

        _ => "UnknownStatusCode",
    }
}

/// Process exit code for a status, so scripts can tell an aborted run
/// (missing input, bad config) from an analysis failure.
pub fn to_exit_code(code: status_code_t) -> i32 {
    match code {
        StatusCode::OK => 0,
        TraceCode::INPUT_NOT_FOUND => 2,
        StatusCode::INVALID_ARG | StatusCode::INVALID_CONFIG => 3,
        TraceCode::NO_EXTENTS => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::OK, 0);
        assert_eq!(StatusCode::UNKNOWN, 999);
        assert_eq!(TraceCode::INPUT_NOT_FOUND, 4000);
        assert_eq!(TraceCode::EXPORT_FAILED, 4006);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(type_of(StatusCode::OK), StatusCodeType::Common);
        assert_eq!(type_of(StatusCode::IO_ERROR), StatusCodeType::Common);
        assert_eq!(type_of(TraceCode::NO_EXTENTS), StatusCodeType::Trace);
        assert_eq!(type_of(2000), StatusCodeType::Invalid);
        assert_eq!(type_of(65535), StatusCodeType::Invalid);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(StatusCode::INVALID_ARG), "InvalidArg");
        assert_eq!(to_string(TraceCode::NO_EXTENTS), "Trace::NoExtents");
        assert_eq!(to_string(TraceCode::QUERY_FAILED), "Trace::QueryFailed");
        assert_eq!(to_string(12345), "UnknownStatusCode");
    }

    #[test]
    fn test_to_exit_code() {
        assert_eq!(to_exit_code(StatusCode::OK), 0);
        assert_eq!(to_exit_code(TraceCode::INPUT_NOT_FOUND), 2);
        assert_eq!(to_exit_code(StatusCode::INVALID_CONFIG), 3);
        assert_eq!(to_exit_code(TraceCode::QUERY_FAILED), 1);
    }
}
