use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// Tensor trace record layout.
///
/// Record lengths are not self-describing across capture revisions, so the
/// caller always names the layout explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaVersion {
    /// One named tensor per operation, 128-byte records.
    Compact,
    /// Destination name plus up to four source descriptors, 256-byte records.
    Wide,
    /// `Wide` followed by mixture-of-experts routing ids, 320-byte records.
    WideExperts,
}

impl SchemaVersion {
    pub const ALL: [SchemaVersion; 3] = [
        SchemaVersion::Compact,
        SchemaVersion::Wide,
        SchemaVersion::WideExperts,
    ];

    pub fn record_len(self) -> usize {
        match self {
            SchemaVersion::Compact => 128,
            SchemaVersion::Wide => 256,
            SchemaVersion::WideExperts => 320,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::Compact => "compact",
            SchemaVersion::Wide => "wide",
            SchemaVersion::WideExperts => "wide-experts",
        }
    }

    pub fn has_experts(self) -> bool {
        self == SchemaVersion::WideExperts
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaVersion::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WireError::UnknownSchema(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lengths() {
        assert_eq!(SchemaVersion::Compact.record_len(), 128);
        assert_eq!(SchemaVersion::Wide.record_len(), 256);
        assert_eq!(SchemaVersion::WideExperts.record_len(), 320);
    }

    #[test]
    fn test_parse_schema_names() {
        assert_eq!("wide".parse::<SchemaVersion>().unwrap(), SchemaVersion::Wide);
        assert_eq!(
            "Wide-Experts".parse::<SchemaVersion>().unwrap(),
            SchemaVersion::WideExperts
        );
        assert!(matches!(
            "v3".parse::<SchemaVersion>(),
            Err(WireError::UnknownSchema(_))
        ));
    }

    #[test]
    fn test_serde_names_match_display() {
        for v in SchemaVersion::ALL {
            let json = serde_json::to_string(&v).unwrap();
            assert_eq!(json, format!("\"{}\"", v));
        }
    }
}
