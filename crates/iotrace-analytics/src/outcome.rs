use serde::{Deserialize, Serialize};

/// Result of an analysis that may legitimately find nothing to measure.
///
/// `NoSignal` means the input was well formed but no event qualified after
/// filtering, e.g. a workload served entirely from resident memory. It is
/// distinct from a failed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum AnalysisOutcome<T> {
    Signal(T),
    NoSignal,
}

impl<T> AnalysisOutcome<T> {
    pub fn is_signal(&self) -> bool {
        matches!(self, AnalysisOutcome::Signal(_))
    }

    pub fn signal(self) -> Option<T> {
        match self {
            AnalysisOutcome::Signal(v) => Some(v),
            AnalysisOutcome::NoSignal => None,
        }
    }

    pub fn as_signal(&self) -> Option<&T> {
        match self {
            AnalysisOutcome::Signal(v) => Some(v),
            AnalysisOutcome::NoSignal => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AnalysisOutcome<U> {
        match self {
            AnalysisOutcome::Signal(v) => AnalysisOutcome::Signal(f(v)),
            AnalysisOutcome::NoSignal => AnalysisOutcome::NoSignal,
        }
    }
}

impl<T> From<Option<T>> for AnalysisOutcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => AnalysisOutcome::Signal(v),
            None => AnalysisOutcome::NoSignal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_string(&AnalysisOutcome::Signal(3)).unwrap();
        assert_eq!(json, r#"{"status":"signal","result":3}"#);
        let json = serde_json::to_string(&AnalysisOutcome::<u32>::NoSignal).unwrap();
        assert_eq!(json, r#"{"status":"no_signal"}"#);
    }

    #[test]
    fn test_map_and_signal() {
        let out = AnalysisOutcome::Signal(2).map(|v| v * 10);
        assert_eq!(out.as_signal(), Some(&20));
        assert!(AnalysisOutcome::<u8>::from(None).signal().is_none());
    }
}
