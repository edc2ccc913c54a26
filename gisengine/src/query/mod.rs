//! Spatial queries over dataset versions.
//!
//! Every query runs against one immutable dataset version and its spatial
//! index, built on demand. The index narrows candidates by bounding box; exact
//! geometry decides.

mod join;
mod nearest;

pub use join::{spatial_join, JoinMode, JoinPair};
pub use nearest::{nearest_neighbors, nearest_neighbors_metric, MetricNeighbors, Neighbor};

use crate::error::Result;
use crate::feature::{Dataset, FeatureId};
use crate::geometry::BoundingBox;
use crate::index::SpatialIndex;

/// Ids of features whose bounding box intersects `rect`, ascending.
///
/// May include features whose geometry does not itself touch `rect`, never
/// misses one that does.
pub fn bbox_query(dataset: &Dataset, rect: &BoundingBox) -> Vec<FeatureId> {
    dataset.spatial_index().query_bbox(rect)
}

/// [`bbox_query`] through an index the caller holds.
///
/// # Errors
///
/// `StaleIndex` when `index` was built from another dataset version.
pub fn bbox_query_with(
    dataset: &Dataset,
    index: &SpatialIndex,
    rect: &BoundingBox,
) -> Result<Vec<FeatureId>> {
    index.check_fresh(dataset)?;
    Ok(index.query_bbox(rect))
}
