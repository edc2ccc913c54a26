//! Index-assisted spatial join.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::feature::{Dataset, FeatureId};
use crate::geometry::{bounding_box, evaluate, SpatialPredicate};

/// Whether unmatched left features appear in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinMode {
    #[default]
    Inner,
    /// Unmatched left features are emitted once with no right id
    Left,
}

/// One row of a join result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JoinPair {
    pub left: FeatureId,
    pub right: Option<FeatureId>,
}

/// Join two datasets on a spatial predicate evaluated as
/// `predicate(left, right)`.
///
/// The right dataset's index prunes candidates and the exact predicate
/// decides. Rows follow left feature order, then ascending right id.
///
/// # Errors
///
/// `DimensionMismatch` when the datasets have different CRSs.
pub fn spatial_join(
    left: &Dataset,
    right: &Dataset,
    predicate: SpatialPredicate,
    mode: JoinMode,
) -> Result<Vec<JoinPair>> {
    if left.crs() != right.crs() {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot join {} with {}",
            left.crs(),
            right.crs()
        )));
    }
    let index = right.spatial_index();
    let rows: Vec<Vec<JoinPair>> = left
        .features()
        .par_iter()
        .map(|feature| {
            let matches: Vec<JoinPair> = bounding_box(&feature.geometry.shape)
                .map(|bbox| index.query_bbox(&bbox))
                .unwrap_or_default()
                .into_iter()
                .filter(|rid| {
                    right.get(*rid).is_some_and(|other| {
                        evaluate(predicate, &feature.geometry.shape, &other.geometry.shape)
                    })
                })
                .map(|rid| JoinPair {
                    left: feature.id,
                    right: Some(rid),
                })
                .collect();
            if matches.is_empty() && mode == JoinMode::Left {
                vec![JoinPair {
                    left: feature.id,
                    right: None,
                }]
            } else {
                matches
            }
        })
        .collect();
    let pairs: Vec<JoinPair> = rows.into_iter().flatten().collect();
    debug!(
        left = left.id(),
        right = right.id(),
        ?predicate,
        ?mode,
        rows = pairs.len(),
        "Spatial join"
    );
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::feature::{Attributes, Feature};
    use crate::geometry::{Coord, Geometry, Polygon, Shape};

    fn dataset(id: u64, shapes: Vec<(u64, Shape)>, crs: CrsId) -> Dataset {
        let features = shapes
            .into_iter()
            .map(|(fid, shape)| {
                Feature::new(FeatureId::new(fid), Geometry::new(shape, crs.clone()), Attributes::new())
            })
            .collect();
        Dataset::from_features(id, "test", crs, features).unwrap()
    }

    fn pt(x: f64, y: f64) -> Shape {
        Shape::Point(Some(Coord { x, y }))
    }

    fn points() -> Dataset {
        dataset(1, vec![(1, pt(1.0, 1.0)), (2, pt(10.0, 10.0))], CrsId::wgs84())
    }

    fn squares() -> Dataset {
        dataset(
            2,
            vec![
                (7, Shape::Polygon(Polygon::rect(0.0, 0.0, 2.0, 2.0))),
                (8, Shape::Polygon(Polygon::rect(20.0, 20.0, 22.0, 22.0))),
            ],
            CrsId::wgs84(),
        )
    }

    #[test]
    fn test_inner_join_single_pair() {
        let pairs = spatial_join(&points(), &squares(), SpatialPredicate::Intersects, JoinMode::Inner)
            .unwrap();
        assert_eq!(
            pairs,
            vec![JoinPair {
                left: FeatureId::new(1),
                right: Some(FeatureId::new(7))
            }]
        );
    }

    #[test]
    fn test_left_join_keeps_unmatched_once() {
        let pairs = spatial_join(&points(), &squares(), SpatialPredicate::Within, JoinMode::Left)
            .unwrap();
        assert_eq!(
            pairs,
            vec![
                JoinPair {
                    left: FeatureId::new(1),
                    right: Some(FeatureId::new(7))
                },
                JoinPair {
                    left: FeatureId::new(2),
                    right: None
                },
            ]
        );
    }

    #[test]
    fn test_contains_direction() {
        let pairs = spatial_join(&squares(), &points(), SpatialPredicate::Contains, JoinMode::Inner)
            .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].left, FeatureId::new(7));
        // Points never contain polygons
        assert!(spatial_join(&points(), &squares(), SpatialPredicate::Contains, JoinMode::Inner)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_crs_mismatch() {
        let other = dataset(3, vec![(1, pt(0.0, 0.0))], CrsId::web_mercator());
        let err = spatial_join(&points(), &other, SpatialPredicate::Intersects, JoinMode::Inner)
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch(_)));
    }
}
