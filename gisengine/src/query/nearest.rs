//! k-nearest-neighbour search.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::crs::{utm_zone_for, CrsId, CrsRegistry, CrsTransformer, Units};
use crate::error::{EngineError, Result};
use crate::feature::{Dataset, FeatureId};
use crate::geometry::{distance_to_coord, Coord};

/// A feature and its distance from the query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: FeatureId,
    pub distance: f64,
}

/// Neighbours with the unit their distances are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricNeighbors {
    pub neighbors: Vec<Neighbor>,
    /// CRS the distances were measured in
    pub crs: CrsId,
    pub units: Units,
}

fn by_distance_then_id(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Up to `k` features closest to `point`, by true geometric distance.
///
/// `point` is in the dataset CRS. Results are ordered by ascending distance,
/// ties by ascending id. The spatial index only prunes: candidates are taken
/// in bbox-distance order until the next bbox is farther than the current
/// k-th distance.
pub fn nearest_neighbors(dataset: &Dataset, point: Coord, k: usize) -> Vec<Neighbor> {
    if k == 0 {
        return Vec::new();
    }
    let index = dataset.spatial_index();
    let mut best: Vec<Neighbor> = Vec::with_capacity(k + 1);
    let mut examined = 0usize;

    for (entry, bbox_distance) in index.nearest_iter(point) {
        if best.len() == k && bbox_distance > best[k - 1].distance {
            break;
        }
        examined += 1;
        let Some(feature) = dataset.get(entry.id) else {
            continue;
        };
        let Some(distance) = distance_to_coord(&feature.geometry.shape, point) else {
            continue;
        };
        let candidate = Neighbor {
            id: entry.id,
            distance,
        };
        let at = best
            .binary_search_by(|probe| by_distance_then_id(probe, &candidate))
            .unwrap_or_else(|i| i);
        if at < k {
            best.insert(at, candidate);
            best.truncate(k);
        }
    }
    debug!(
        dataset = dataset.id(),
        k,
        examined,
        found = best.len(),
        "Nearest neighbours"
    );
    best
}

/// Nearest neighbours with distances in metres.
///
/// The query point and every feature are reprojected into `metric_crs`, or
/// into the UTM zone of the query point when none is given. `point` is in
/// the dataset CRS.
///
/// # Errors
///
/// `UnsupportedCrs` when either CRS is unknown, `InvalidInput` when the
/// chosen CRS is not metric or a coordinate has no image in it.
pub fn nearest_neighbors_metric(
    registry: &CrsRegistry,
    dataset: &Dataset,
    point: Coord,
    k: usize,
    metric_crs: Option<&CrsId>,
) -> Result<MetricNeighbors> {
    let target = match metric_crs {
        Some(crs) => crs.clone(),
        None => {
            let to_lonlat = CrsTransformer::new(registry, dataset.crs(), &CrsId::wgs84())?;
            let lonlat = to_lonlat.transform(point)?;
            utm_zone_for(lonlat.x, lonlat.y)
        }
    };
    let units = registry.units(&target)?;
    if units != Units::Metres {
        return Err(EngineError::InvalidInput(format!(
            "{target} is not a metric CRS"
        )));
    }

    let transformer = CrsTransformer::new(registry, dataset.crs(), &target)?;
    let origin = transformer.transform(point)?;
    let mut neighbors = dataset
        .features()
        .par_iter()
        .map_init(
            || CrsTransformer::new(registry, dataset.crs(), &target),
            |transformer, feature| -> Result<Option<Neighbor>> {
                let transformer = transformer
                    .as_ref()
                    .map_err(|e| EngineError::UnsupportedCrs(e.to_string()))?;
                let projected = transformer.transform_geometry(&feature.geometry)?;
                Ok(distance_to_coord(&projected.shape, origin).map(|distance| Neighbor {
                    id: feature.id,
                    distance,
                }))
            },
        )
        .filter_map(|r| r.transpose())
        .collect::<Result<Vec<_>>>()?;
    neighbors.sort_by(by_distance_then_id);
    neighbors.truncate(k);
    Ok(MetricNeighbors {
        neighbors,
        crs: target,
        units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Attributes, Feature};
    use crate::geometry::{Geometry, Polygon, Shape};

    fn dataset(shapes: Vec<(u64, Shape)>, crs: CrsId) -> Dataset {
        let features = shapes
            .into_iter()
            .map(|(id, shape)| {
                Feature::new(FeatureId::new(id), Geometry::new(shape, crs.clone()), Attributes::new())
            })
            .collect();
        Dataset::from_features(1, "test", crs, features).unwrap()
    }

    fn pt(x: f64, y: f64) -> Shape {
        Shape::Point(Some(Coord { x, y }))
    }

    fn ids(neighbors: &[Neighbor]) -> Vec<u64> {
        neighbors.iter().map(|n| n.id.get()).collect()
    }

    #[test]
    fn test_true_distance_beats_bbox_distance() {
        // Diagonal line has a bbox containing the query point but lies far
        // from it; the point feature is closer in true distance.
        let diagonal = Shape::LineString(vec![Coord { x: 0.0, y: 10.0 }, Coord { x: 10.0, y: 0.0 }]);
        let ds = dataset(vec![(1, diagonal), (2, pt(1.5, 1.5))], CrsId::epsg(3857));
        let result = nearest_neighbors(&ds, Coord { x: 1.0, y: 1.0 }, 1);
        assert_eq!(ids(&result), vec![2]);
    }

    #[test]
    fn test_ties_by_id() {
        let ds = dataset(
            vec![(5, pt(1.0, 0.0)), (3, pt(-1.0, 0.0)), (4, pt(0.0, 3.0))],
            CrsId::epsg(3857),
        );
        let result = nearest_neighbors(&ds, Coord { x: 0.0, y: 0.0 }, 2);
        assert_eq!(ids(&result), vec![3, 5]);
        assert_eq!(result[0].distance, 1.0);
    }

    #[test]
    fn test_inside_polygon_distance_zero() {
        let ds = dataset(
            vec![
                (1, Shape::Polygon(Polygon::rect(0.0, 0.0, 4.0, 4.0))),
                (2, pt(2.5, 2.0)),
            ],
            CrsId::epsg(3857),
        );
        let result = nearest_neighbors(&ds, Coord { x: 2.0, y: 2.0 }, 5);
        assert_eq!(ids(&result), vec![1, 2]);
        assert_eq!(result[0].distance, 0.0);
    }

    #[test]
    fn test_k_larger_than_dataset() {
        let ds = dataset(vec![(1, pt(0.0, 0.0))], CrsId::epsg(3857));
        assert_eq!(nearest_neighbors(&ds, Coord { x: 9.0, y: 9.0 }, 10).len(), 1);
        assert!(nearest_neighbors(&ds, Coord { x: 9.0, y: 9.0 }, 0).is_empty());
    }

    #[test]
    fn test_metric_distances_in_metres() {
        // 0.01 degrees of longitude at the equator is about 1113 m
        let ds = dataset(vec![(1, pt(10.01, 0.0)), (2, pt(10.1, 0.0))], CrsId::wgs84());
        let registry = CrsRegistry::new();
        let result =
            nearest_neighbors_metric(&registry, &ds, Coord { x: 10.0, y: 0.0 }, 1, None).unwrap();
        assert_eq!(result.units, Units::Metres);
        assert_eq!(result.crs, CrsId::epsg(32632));
        assert_eq!(ids(&result.neighbors), vec![1]);
        assert!((result.neighbors[0].distance - 1113.0).abs() < 10.0);
    }

    #[test]
    fn test_metric_rejects_geographic_target() {
        let ds = dataset(vec![(1, pt(0.0, 0.0))], CrsId::wgs84());
        let err = nearest_neighbors_metric(
            &CrsRegistry::new(),
            &ds,
            Coord { x: 0.0, y: 0.0 },
            1,
            Some(&CrsId::epsg(4258)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
