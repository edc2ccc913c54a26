//! Operations over the features of a dataset version.
//!
//! A [`DatasetOperation`] runs over every feature of a dataset, or over a
//! caller-chosen subset, and yields a new feature list. Per-feature
//! operations keep the source feature's id and attributes; `Union` and
//! `Dissolve` merge features and number their output from 1.

use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{json, Value};
use tracing::info;

use super::{buffer, clip, dissolve, simplify, union, OpOutput, OpWarning, ResultMetadata};
use crate::codec::to_wkt;
use crate::error::{EngineError, Result};
use crate::feature::{Attributes, Dataset, Feature, FeatureId};
use crate::geometry::{Geometry, Tolerance};

/// Operation applied to the features of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetOperation {
    /// Buffer every feature by `distance` CRS units
    Buffer { distance: f64 },
    /// Clip every feature to `mask`; features outside it are dropped
    Clip { mask: Geometry },
    /// Simplify every feature with at most `tolerance` deviation
    Simplify { tolerance: f64 },
    /// Merge all features into one
    Union,
    /// Merge features sharing a value of `attribute`
    Dissolve { attribute: String },
}

impl DatasetOperation {
    /// Operation name recorded in result metadata.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetOperation::Buffer { .. } => "buffer",
            DatasetOperation::Clip { .. } => "clip",
            DatasetOperation::Simplify { .. } => "simplify",
            DatasetOperation::Union => "union",
            DatasetOperation::Dissolve { .. } => "dissolve",
        }
    }

    fn parameters(&self, settings: &DatasetOpSettings) -> Value {
        match self {
            DatasetOperation::Buffer { distance } => json!({
                "distance": distance,
                "segments_per_quadrant": settings.quadrant_segments,
            }),
            DatasetOperation::Clip { mask } => json!({ "mask": to_wkt(&mask.shape) }),
            DatasetOperation::Simplify { tolerance } => json!({
                "tolerance": tolerance,
                "max_attempts": settings.simplify_attempts,
            }),
            DatasetOperation::Union => json!({}),
            DatasetOperation::Dissolve { attribute } => json!({ "attribute": attribute }),
        }
    }
}

/// Engine settings a dataset operation runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetOpSettings {
    pub quadrant_segments: u32,
    pub simplify_attempts: u32,
    pub tol: Tolerance,
}

/// Run `operation` over the features named by `ids` (all when `None`).
///
/// Metadata lists the selected source feature ids and carries
/// `description` when given.
///
/// # Errors
///
/// `FeatureNotFound` for an unknown id, `InvalidInput` when the selection
/// is empty, plus whatever the underlying operation reports.
pub fn run_dataset_operation(
    dataset: &Dataset,
    operation: &DatasetOperation,
    ids: Option<&[FeatureId]>,
    description: Option<&str>,
    settings: DatasetOpSettings,
) -> Result<OpOutput<Vec<Feature>>> {
    let selected = dataset.select(ids)?;
    if selected.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "{} on dataset {} selected no features",
            operation.name(),
            dataset.id()
        )));
    }
    let sources: Vec<FeatureId> = selected.iter().map(|f| f.id).collect();
    let tol = settings.tol;

    let (features, warnings) = match operation {
        DatasetOperation::Buffer { distance } => per_feature(&selected, |g| {
            buffer(g, *distance, settings.quadrant_segments, tol)
        })?,
        DatasetOperation::Simplify { tolerance } => per_feature(&selected, |g| {
            simplify(g, *tolerance, settings.simplify_attempts, tol)
        })?,
        DatasetOperation::Clip { mask } => {
            let (clipped, warnings) = per_feature(&selected, |g| clip(g, mask, tol))?;
            let kept = clipped
                .into_iter()
                .filter(|f| !f.geometry.is_empty())
                .collect();
            (kept, warnings)
        }
        DatasetOperation::Union => {
            let geometries: Vec<Geometry> =
                selected.iter().map(|f| f.geometry.clone()).collect();
            let merged = union(&geometries, tol)?;
            let mut warnings = merged.warnings;
            let dropped: Vec<String> = dataset
                .schema()
                .fields()
                .map(|(name, _)| name.to_string())
                .collect();
            if !dropped.is_empty() {
                warnings.push(OpWarning::AttributesDropped { names: dropped });
            }
            let feature = Feature::new(FeatureId::new(1), merged.value, Attributes::new());
            (vec![feature], warnings)
        }
        DatasetOperation::Dissolve { attribute } => {
            let view = dataset.subset(&sources)?;
            let dissolved = dissolve(&view, attribute, tol)?;
            (dissolved.value.features, dissolved.warnings)
        }
    };

    info!(
        dataset = dataset.id(),
        version = dataset.version(),
        operation = operation.name(),
        sources = sources.len(),
        features = features.len(),
        warnings = warnings.len(),
        "Dataset operation finished"
    );
    let mut metadata = ResultMetadata::new(
        operation.name(),
        dataset.crs().clone(),
        operation.parameters(&settings),
    )
    .with_sources(sources);
    if let Some(description) = description {
        metadata = metadata.with_description(description);
    }
    Ok(OpOutput::new(features, metadata).with_warnings(warnings))
}

/// Apply a single-geometry operation to each feature in parallel.
///
/// `InputRepaired` warnings are renumbered to the feature's position in
/// the selection.
fn per_feature<F>(selected: &[Arc<Feature>], op: F) -> Result<(Vec<Feature>, Vec<OpWarning>)>
where
    F: Fn(&Geometry) -> Result<OpOutput<Geometry>> + Sync,
{
    let outputs = selected
        .par_iter()
        .map(|feature| op(&feature.geometry))
        .collect::<Result<Vec<_>>>()?;
    let mut features = Vec::with_capacity(outputs.len());
    let mut warnings = Vec::new();
    for (position, (source, output)) in selected.iter().zip(outputs).enumerate() {
        warnings.extend(output.warnings.into_iter().map(|w| match w {
            OpWarning::InputRepaired { issues, .. } => OpWarning::InputRepaired {
                operand: position,
                issues,
            },
            other => other,
        }));
        features.push(Feature::new(
            source.id,
            output.value,
            source.attributes.clone(),
        ));
    }
    Ok((features, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::feature::AttributeValue;
    use crate::geometry::{area, Polygon, Shape};

    fn settings() -> DatasetOpSettings {
        DatasetOpSettings {
            quadrant_segments: 8,
            simplify_attempts: 4,
            tol: Tolerance::default(),
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Geometry {
        Geometry::new(
            Shape::Polygon(Polygon::rect(x, y, x + size, y + size)),
            CrsId::web_mercator(),
        )
    }

    fn parcels() -> Dataset {
        let feature = |id: u64, geometry: Geometry, zone: &str| {
            let mut attributes = Attributes::new();
            attributes.insert("zone".to_string(), AttributeValue::from(zone));
            Feature::new(FeatureId::new(id), geometry, attributes)
        };
        Dataset::from_features(
            5,
            "parcels",
            CrsId::web_mercator(),
            vec![
                feature(10, square(0.0, 0.0, 2.0), "a"),
                feature(20, square(1.0, 0.0, 2.0), "a"),
                feature(30, square(10.0, 10.0, 1.0), "b"),
            ],
        )
        .unwrap()
    }

    // =========================================================================
    // Per-feature operations
    // =========================================================================

    #[test]
    fn test_buffer_selected_features_keeps_ids() {
        let ds = parcels();
        let ids = [FeatureId::new(30)];
        let out = run_dataset_operation(
            &ds,
            &DatasetOperation::Buffer { distance: 1.0 },
            Some(&ids),
            None,
            settings(),
        )
        .unwrap();
        assert_eq!(out.value.len(), 1);
        assert_eq!(out.value[0].id, FeatureId::new(30));
        assert_eq!(out.value[0].attribute("zone"), &AttributeValue::from("b"));
        assert!(area(&out.value[0].geometry.shape) > 1.0);
        assert_eq!(out.metadata.operation, "buffer");
        assert_eq!(out.metadata.source_feature_ids, vec![FeatureId::new(30)]);
        assert_eq!(out.metadata.description, None);
    }

    #[test]
    fn test_clip_drops_features_outside_mask() {
        let ds = parcels();
        let out = run_dataset_operation(
            &ds,
            &DatasetOperation::Clip {
                mask: square(0.0, 0.0, 1.5),
            },
            None,
            Some("study area"),
            settings(),
        )
        .unwrap();
        let ids: Vec<FeatureId> = out.value.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![FeatureId::new(10), FeatureId::new(20)]);
        assert!((area(&out.value[0].geometry.shape) - 2.25).abs() < 1e-5);
        assert_eq!(out.metadata.source_feature_ids.len(), 3);
        assert_eq!(out.metadata.description.as_deref(), Some("study area"));
    }

    #[test]
    fn test_simplify_records_tolerance() {
        let ds = parcels();
        let out = run_dataset_operation(
            &ds,
            &DatasetOperation::Simplify { tolerance: 0.1 },
            None,
            Some("generalised"),
            settings(),
        )
        .unwrap();
        assert_eq!(out.value.len(), 3);
        assert_eq!(out.metadata.parameters["tolerance"], json!(0.1));
        assert_eq!(out.metadata.description.as_deref(), Some("generalised"));
    }

    // =========================================================================
    // Merging operations
    // =========================================================================

    #[test]
    fn test_union_of_selection() {
        let ds = parcels();
        let ids = [FeatureId::new(10), FeatureId::new(20)];
        let out = run_dataset_operation(&ds, &DatasetOperation::Union, Some(&ids), None, settings())
            .unwrap();
        assert_eq!(out.value.len(), 1);
        assert!((area(&out.value[0].geometry.shape) - 6.0).abs() < 1e-5);
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, OpWarning::AttributesDropped { names } if names == &["zone"])));
    }

    #[test]
    fn test_dissolve_selection_only() {
        let ds = parcels();
        let ids = [FeatureId::new(20), FeatureId::new(30)];
        let out = run_dataset_operation(
            &ds,
            &DatasetOperation::Dissolve {
                attribute: "zone".to_string(),
            },
            Some(&ids),
            Some("zones"),
            settings(),
        )
        .unwrap();
        assert_eq!(out.value.len(), 2);
        assert!((area(&out.value[0].geometry.shape) - 4.0).abs() < 1e-5);
        assert_eq!(out.metadata.source_feature_ids, ids.to_vec());
        assert_eq!(out.metadata.parameters, json!({ "attribute": "zone" }));
    }

    // =========================================================================
    // Selection errors
    // =========================================================================

    #[test]
    fn test_unknown_feature_rejected() {
        let ids = [FeatureId::new(99)];
        let err = run_dataset_operation(
            &parcels(),
            &DatasetOperation::Union,
            Some(&ids),
            None,
            settings(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::FeatureNotFound(id) if id.get() == 99));
    }

    #[test]
    fn test_empty_selection_rejected() {
        let err = run_dataset_operation(
            &parcels(),
            &DatasetOperation::Buffer { distance: 1.0 },
            Some(&[]),
            None,
            settings(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
