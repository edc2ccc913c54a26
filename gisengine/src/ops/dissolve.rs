//! Dissolve by attribute.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::json;
use tracing::info;

use super::{union, OpOutput, OpWarning, ResultMetadata};
use crate::error::Result;
use crate::feature::{AttributeKey, AttributeValue, Attributes, Dataset, Feature, FeatureId};
use crate::geometry::{Geometry, Tolerance};

/// Source features merged into one output feature.
#[derive(Debug, Clone, PartialEq)]
pub struct DissolveGroup {
    pub value: AttributeValue,
    pub source_ids: Vec<FeatureId>,
}

/// Output of [`dissolve`]: one feature per group, in group order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dissolved {
    pub features: Vec<Feature>,
    pub groups: Vec<DissolveGroup>,
    /// Schema attributes not carried into the output
    pub dropped_attributes: Vec<String>,
}

/// Group features by the value of `attribute` and union each group.
///
/// Features without the attribute fall into the `Null` group. Each output
/// feature carries only the grouping attribute, so the operation is lossy:
/// the result lists the dropped attribute names and the source ids per
/// group. Output ids are numbered from 1 in group order.
///
/// # Errors
///
/// `DimensionMismatch` when a group mixes dimensions.
pub fn dissolve(dataset: &Dataset, attribute: &str, tol: Tolerance) -> Result<OpOutput<Dissolved>> {
    let mut groups: BTreeMap<AttributeKey, Vec<&Arc<Feature>>> = BTreeMap::new();
    for feature in dataset.features() {
        groups
            .entry(feature.attribute(attribute).key())
            .or_default()
            .push(feature);
    }

    let unions = groups
        .par_iter()
        .map(|(_, members)| {
            let geometries: Vec<Geometry> = members.iter().map(|f| f.geometry.clone()).collect();
            union(&geometries, tol)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut warnings: Vec<OpWarning> = Vec::new();
    let mut features = Vec::with_capacity(unions.len());
    let mut summary = Vec::with_capacity(unions.len());
    for (i, ((key, members), merged)) in groups.iter().zip(unions).enumerate() {
        let value = key.to_value();
        let mut attributes = Attributes::new();
        attributes.insert(attribute.to_string(), value.clone());
        features.push(Feature::new(
            FeatureId::new(i as u64 + 1),
            merged.value,
            attributes,
        ));
        warnings.extend(merged.warnings);
        summary.push(DissolveGroup {
            value,
            source_ids: members.iter().map(|f| f.id).collect(),
        });
    }

    let dropped_attributes: Vec<String> = dataset
        .schema()
        .fields()
        .map(|(name, _)| name.to_string())
        .filter(|name| name != attribute)
        .collect();
    if !dropped_attributes.is_empty() {
        warnings.push(OpWarning::AttributesDropped {
            names: dropped_attributes.clone(),
        });
    }

    info!(
        dataset = dataset.id(),
        attribute,
        features = dataset.len(),
        groups = summary.len(),
        dropped = dropped_attributes.len(),
        "Dissolved dataset"
    );
    let metadata = ResultMetadata::new(
        "dissolve",
        dataset.crs().clone(),
        json!({ "attribute": attribute }),
    )
    .with_sources(dataset.features().iter().map(|f| f.id).collect());
    Ok(OpOutput::new(
        Dissolved {
            features,
            groups: summary,
            dropped_attributes,
        },
        metadata,
    )
    .with_warnings(warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::error::EngineError;
    use crate::geometry::{area, Polygon, Shape};

    fn feature(id: u64, rect: Polygon, zone: Option<&str>, owner: &str) -> Feature {
        let mut attributes = Attributes::new();
        if let Some(zone) = zone {
            attributes.insert("zone".to_string(), AttributeValue::from(zone));
        }
        attributes.insert("owner".to_string(), AttributeValue::from(owner));
        Feature::new(
            FeatureId::new(id),
            Geometry::new(Shape::Polygon(rect), CrsId::web_mercator()),
            attributes,
        )
    }

    fn parcels() -> Dataset {
        Dataset::from_features(
            1,
            "parcels",
            CrsId::web_mercator(),
            vec![
                feature(1, Polygon::rect(0.0, 0.0, 1.0, 1.0), Some("a"), "x"),
                feature(2, Polygon::rect(1.0, 0.0, 2.0, 1.0), Some("a"), "y"),
                feature(3, Polygon::rect(5.0, 5.0, 6.0, 6.0), Some("b"), "z"),
                feature(4, Polygon::rect(8.0, 8.0, 9.0, 9.0), None, "w"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_groups_and_lossy_report() {
        let out = dissolve(&parcels(), "zone", Tolerance::default()).unwrap();
        let dissolved = out.value;
        assert_eq!(dissolved.features.len(), 3);
        assert_eq!(dissolved.dropped_attributes, vec!["owner".to_string()]);

        // Null sorts first
        assert_eq!(dissolved.groups[0].value, AttributeValue::Null);
        assert_eq!(dissolved.groups[0].source_ids, vec![FeatureId::new(4)]);
        assert_eq!(dissolved.groups[1].value, AttributeValue::from("a"));
        assert_eq!(
            dissolved.groups[1].source_ids,
            vec![FeatureId::new(1), FeatureId::new(2)]
        );

        let merged = &dissolved.features[1];
        assert_eq!(merged.attributes.len(), 1);
        assert!((area(&merged.geometry.shape) - 2.0).abs() < 1e-9);
        assert_eq!(merged.geometry.geometry_type(), crate::geometry::GeometryType::Polygon);

        assert!(out
            .warnings
            .contains(&OpWarning::AttributesDropped { names: vec!["owner".to_string()] }));
        assert_eq!(out.metadata.source_feature_ids.len(), 4);
    }

    #[test]
    fn test_mixed_dimensions_in_group() {
        let mut features = vec![feature(1, Polygon::rect(0.0, 0.0, 1.0, 1.0), Some("a"), "x")];
        let mut attributes = Attributes::new();
        attributes.insert("zone".to_string(), AttributeValue::from("a"));
        features.push(Feature::new(
            FeatureId::new(2),
            Geometry::point(3.0, 3.0, CrsId::web_mercator()),
            attributes,
        ));
        let ds = Dataset::from_features(1, "mixed", CrsId::web_mercator(), features).unwrap();
        assert!(matches!(
            dissolve(&ds, "zone", Tolerance::default()),
            Err(EngineError::DimensionMismatch(_))
        ));
    }
}
