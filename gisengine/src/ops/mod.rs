//! Geometry operations.
//!
//! Every operation is a pure function returning an [`OpOutput`]: the result
//! value, warnings about what the engine had to adjust, and metadata
//! describing how the result was produced.
//!
//! Inputs are validated first. An invalid operand is repaired and an
//! [`OpWarning::InputRepaired`] attached; an empty operand yields an empty
//! result of the operation's output type. Operands in different CRSs are
//! rejected with `DimensionMismatch`.

mod buffer;
mod dataset;
mod dissolve;
mod overlay;
mod simplify;
mod split;

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::crs::{builtin_definition, CrsId, CrsRegistry, Units};
use crate::error::{EngineError, Result};
use crate::feature::FeatureId;
use crate::geometry::{Geometry, Tolerance};
use crate::validation::{repair_with, validate_shape, IssueKind};

pub use buffer::{buffer, DEFAULT_QUADRANT_SEGMENTS};
pub use dataset::{run_dataset_operation, DatasetOpSettings, DatasetOperation};
pub use dissolve::{dissolve, DissolveGroup, Dissolved};
pub use overlay::{clip, intersection, merge, union};
pub use simplify::{simplify, DEFAULT_SIMPLIFY_ATTEMPTS};
pub use split::split;

/// Something an operation adjusted on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpWarning {
    /// Operand `operand` was invalid and has been repaired
    InputRepaired {
        operand: usize,
        issues: Vec<IssueKind>,
    },
    /// Simplification ran with a smaller tolerance than requested
    SimplifyTolerance { requested: f64, effective: f64 },
    /// No tolerance produced a valid result; the input was returned
    SimplifyFallback { requested: f64 },
    /// Attributes not carried into the output
    AttributesDropped { names: Vec<String> },
}

impl fmt::Display for OpWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpWarning::InputRepaired { operand, issues } => {
                write!(f, "operand {operand} was repaired ({issues:?})")
            }
            OpWarning::SimplifyTolerance {
                requested,
                effective,
            } => write!(
                f,
                "simplified with tolerance {effective} instead of {requested}"
            ),
            OpWarning::SimplifyFallback { requested } => write!(
                f,
                "no valid simplification at tolerance {requested} or below; input returned"
            ),
            OpWarning::AttributesDropped { names } => {
                write!(f, "attributes dropped: {}", names.join(", "))
            }
        }
    }
}

/// How a result was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub crs: CrsId,
    /// Linear unit of `crs`, when it is a known CRS
    pub units: Option<Units>,
    pub operation: String,
    pub source_feature_ids: Vec<FeatureId>,
    pub parameters: Value,
    pub description: Option<String>,
}

impl ResultMetadata {
    pub fn new(operation: impl Into<String>, crs: CrsId, parameters: Value) -> Self {
        let units = crs
            .epsg_code()
            .and_then(builtin_definition)
            .map(|def| def.units);
        Self {
            crs,
            units,
            operation: operation.into(),
            source_feature_ids: Vec::new(),
            parameters,
            description: None,
        }
    }

    pub fn with_sources(mut self, ids: Vec<FeatureId>) -> Self {
        self.source_feature_ids = ids;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fill in `units` from `registry`, which also knows registered
    /// definitions.
    pub fn resolve_units(mut self, registry: &CrsRegistry) -> Self {
        if self.units.is_none() {
            self.units = registry.units(&self.crs).ok();
        }
        self
    }
}

/// Result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutput<T> {
    pub value: T,
    pub warnings: Vec<OpWarning>,
    pub metadata: ResultMetadata,
}

impl<T> OpOutput<T> {
    pub fn new(value: T, metadata: ResultMetadata) -> Self {
        Self {
            value,
            warnings: Vec::new(),
            metadata,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<OpWarning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Resolve metadata units against `registry`.
    pub fn with_units_from(mut self, registry: &CrsRegistry) -> Self {
        self.metadata = self.metadata.resolve_units(registry);
        self
    }

    /// Transform the value, keeping warnings and metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OpOutput<U> {
        OpOutput {
            value: f(self.value),
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }
}

/// Validate an operand, repairing it when needed.
///
/// Returns the geometry to operate on and records a warning for a repair.
/// Empty operands pass through unchanged.
pub(crate) fn prepare(
    geometry: &Geometry,
    operand: usize,
    tol: Tolerance,
    warnings: &mut Vec<OpWarning>,
) -> Geometry {
    if geometry.is_empty() {
        return geometry.clone();
    }
    let report = validate_shape(&geometry.shape, tol);
    if report.valid {
        return geometry.clone();
    }
    let outcome = repair_with(geometry, tol);
    warnings.push(OpWarning::InputRepaired {
        operand,
        issues: outcome.issues,
    });
    outcome.geometry
}

/// All operands share one CRS.
pub(crate) fn require_same_crs<'a>(
    mut geometries: impl Iterator<Item = &'a Geometry>,
) -> Result<()> {
    let Some(first) = geometries.next() else {
        return Ok(());
    };
    for other in geometries {
        if other.crs != first.crs {
            return Err(EngineError::DimensionMismatch(format!(
                "operands in {} and {}",
                first.crs, other.crs
            )));
        }
    }
    Ok(())
}
