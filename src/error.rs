//! Error taxonomy for the normalizer and the statistical engine

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failure of an analysis request.
///
/// Malformed input lines are never errors on their own; the normalizer drops them and only
/// the aggregate "nothing survived" case is reported, as `InsufficientData` with zero rows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The matrix is too small to analyse. Also reported when no input line survived
    /// normalization.
    #[error("Insufficient data for PCA. Need at least 2 columns (ID + Feature) and 1 row, got {columns} column(s) and {rows} row(s)")]
    InsufficientData { rows: usize, columns: usize },

    /// A record's value count differs from the first record's.
    #[error("Record {index} has {found} feature value(s), expected {expected}")]
    InconsistentRecord {
        index: usize,
        expected: usize,
        found: usize,
    },

    /// The linear algebra backend failed.
    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    /// The engine configuration cannot be honoured.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Serialize for AnalysisError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// JSON-facing envelope: either the full result or a single `"error"` field.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisResponse<T> {
    Success(T),
    Failure { error: AnalysisError },
}

impl<T> AnalysisResponse<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisResponse::Failure { .. })
    }
}

impl<T> From<Result<T, AnalysisError>> for AnalysisResponse<T> {
    fn from(result: Result<T, AnalysisError>) -> Self {
        match result {
            Ok(value) => AnalysisResponse::Success(value),
            Err(error) => AnalysisResponse::Failure { error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_as_error_field() {
        let response: AnalysisResponse<u32> = Err(AnalysisError::InsufficientData { rows: 3, columns: 1 }).into();
        assert!(response.is_error());
        let json = serde_json::to_value(&response).unwrap();
        let message = json["error"].as_str().unwrap();
        assert!(message.starts_with("Insufficient data for PCA"));
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn success_serializes_transparently() {
        let response: AnalysisResponse<Vec<u32>> = Ok(vec![1, 2]).into();
        assert!(!response.is_error());
        assert_eq!(serde_json::to_string(&response).unwrap(), "[1,2]");
    }
}
