//! Edit-time geometry policy.

use super::repair::repair_with;
use super::{validate_shape, IssueKind};
use crate::error::{EngineError, Result};
use crate::geometry::{Geometry, GeometryType, Tolerance};

/// How feature edits treat incoming geometries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPolicy {
    /// Repair invalid geometries instead of rejecting them
    pub fix_topology: bool,
    /// Permitted geometry types; `None` allows every type
    pub allowed_types: Option<Vec<GeometryType>>,
}

impl Default for EditPolicy {
    fn default() -> Self {
        Self {
            fix_topology: true,
            allowed_types: None,
        }
    }
}

impl EditPolicy {
    /// Reject invalid geometries, allow all types.
    pub fn strict() -> Self {
        Self {
            fix_topology: false,
            allowed_types: None,
        }
    }

    /// Points, lines and polygons only.
    pub fn simple_features(fix_topology: bool) -> Self {
        Self {
            fix_topology,
            allowed_types: Some(vec![
                GeometryType::Point,
                GeometryType::LineString,
                GeometryType::Polygon,
            ]),
        }
    }

    pub fn with_fix_topology(mut self, fix_topology: bool) -> Self {
        self.fix_topology = fix_topology;
        self
    }

    pub fn with_allowed_types(mut self, types: Vec<GeometryType>) -> Self {
        self.allowed_types = Some(types);
        self
    }

    /// Geometry type passes the allow-list.
    pub fn permits(&self, kind: GeometryType) -> bool {
        self.allowed_types
            .as_ref()
            .map_or(true, |types| types.contains(&kind))
    }

    /// Check a geometry for an edit, repairing it when allowed.
    ///
    /// Returns the geometry to store and the issues that were repaired.
    ///
    /// # Errors
    ///
    /// `Validation` for empty input, a type outside the allow-list, an
    /// invalid geometry under `fix_topology = false`, or a repair that
    /// collapses the geometry.
    pub fn apply(&self, geometry: Geometry, tol: Tolerance) -> Result<(Geometry, Vec<IssueKind>)> {
        if geometry.is_empty() {
            return Err(EngineError::validation(
                "empty geometry",
                vec![IssueKind::EmptyGeometry],
            ));
        }
        let kind = geometry.geometry_type();
        if !self.permits(kind) {
            return Err(EngineError::validation(
                format!("geometry type {kind} is not allowed"),
                Vec::new(),
            ));
        }

        let report = validate_shape(&geometry.shape, tol);
        if report.valid {
            return Ok((geometry, Vec::new()));
        }
        if !self.fix_topology {
            return Err(EngineError::validation("invalid geometry", report.issues));
        }

        let outcome = repair_with(&geometry, tol);
        if outcome.geometry.is_empty() {
            return Err(EngineError::validation(
                "geometry collapsed during repair",
                outcome.issues,
            ));
        }
        let repaired_kind = outcome.geometry.geometry_type();
        if !self.permits(repaired_kind) {
            return Err(EngineError::validation(
                format!("repair produced {repaired_kind}, which is not allowed"),
                outcome.issues,
            ));
        }
        Ok((outcome.geometry, outcome.issues))
    }
}
