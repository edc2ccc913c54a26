//! Engine-wide error taxonomy.
//!
//! Every fallible engine call returns [`EngineError`]. Validation issues are
//! normally recovered locally (repair and warn), so a `Validation` error only
//! reaches the caller when no sane repaired result exists or the caller's
//! edit policy forbids repair. CRS and dimension mismatches are always
//! surfaced, never guessed.

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigFileError;
use crate::feature::FeatureId;
use crate::raster::StoreError;
use crate::validation::IssueKind;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by the spatial engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Geometry fails validity rules and cannot be used as supplied
    #[error("invalid geometry: {message} ({issues:?})")]
    Validation {
        message: String,
        issues: Vec<IssueKind>,
    },

    /// A CRS identifier could not be resolved to a known definition
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// Operands differ in geometry dimension or CRS
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A raster cell window reaches outside the grid extent
    #[error("point ({x}, {y}) is outside the raster extent")]
    OutOfBounds { x: f64, y: f64 },

    /// Operation was cancelled by the caller
    #[error("operation cancelled")]
    Canceled,

    /// A single-pass operation needed more tiles than the memory budget allows
    #[error("resource exhausted: {required} tiles required, budget allows {budget}")]
    ResourceExhausted { required: usize, budget: usize },

    /// Feature id does not exist in the dataset version
    #[error("feature {0} not found")]
    FeatureNotFound(FeatureId),

    /// Dataset id is not registered
    #[error("dataset {0} not found")]
    DatasetNotFound(u64),

    /// Analysis result id is not stored
    #[error("analysis result {0} not found")]
    ResultNotFound(u64),

    /// Attribute value type conflicts with the dataset schema
    #[error("attribute '{attribute}' expects {expected}, got {found}")]
    SchemaMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    /// A spatial index was used against a dataset version it was not built for
    #[error("spatial index for dataset {dataset} v{index_version} used with v{dataset_version}")]
    StaleIndex {
        dataset: u64,
        index_version: u64,
        dataset_version: u64,
    },

    /// Caller supplied inconsistent input (band sizes, degenerate transform, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Geometry encoding or decoding failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Chunk store failure
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigFileError),
}

impl EngineError {
    /// Shorthand for a validation error carrying the detected issues.
    pub fn validation(message: impl Into<String>, issues: Vec<IssueKind>) -> Self {
        Self::Validation {
            message: message.into(),
            issues,
        }
    }

    /// Returns true for errors caused by caller-side cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_lists_issues() {
        let err = EngineError::validation("ring too short", vec![IssueKind::EmptyGeometry]);
        let msg = err.to_string();
        assert!(msg.contains("ring too short"));
        assert!(msg.contains("EmptyGeometry"));
    }

    #[test]
    fn test_is_canceled() {
        assert!(EngineError::Canceled.is_canceled());
        assert!(!EngineError::UnsupportedCrs("EPSG:1".into()).is_canceled());
    }

    #[test]
    fn test_resource_exhausted_display() {
        let err = EngineError::ResourceExhausted {
            required: 40,
            budget: 16,
        };
        assert_eq!(
            err.to_string(),
            "resource exhausted: 40 tiles required, budget allows 16"
        );
    }
}
