//! R-tree over the feature bounding boxes of one dataset version.
//!
//! The index is a snapshot: it is bulk loaded once from every feature of a
//! dataset version and never patched. An edit produces a new dataset version
//! whose index starts unbuilt, and any attempt to use an index against a
//! version it was not built from fails with `StaleIndex`.
//!
//! # Example
//!
//! ```ignore
//! let index = dataset.spatial_index();
//! let hits = index.query_bbox(&BoundingBox::new(0.0, 0.0, 10.0, 10.0));
//! ```

use std::time::Instant;

use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::feature::{Dataset, DatasetId, FeatureId};
use crate::geometry::{bounding_box, BoundingBox, Coord};

/// One indexed feature: its id and bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub id: FeatureId,
    pub bbox: BoundingBox,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min_x, self.bbox.min_y],
            [self.bbox.max_x, self.bbox.max_y],
        )
    }
}

impl PointDistance for IndexEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope().distance_2(point)
    }
}

/// Bounding-box R-tree tied to one `(dataset, version)`.
#[derive(Debug)]
pub struct SpatialIndex {
    dataset: DatasetId,
    version: u64,
    tree: RTree<IndexEntry>,
}

impl SpatialIndex {
    /// Bulk load an index from `(id, bbox)` pairs.
    pub fn build(
        dataset: DatasetId,
        version: u64,
        entries: impl IntoIterator<Item = IndexEntry>,
    ) -> Self {
        let tree = RTree::bulk_load(entries.into_iter().collect());
        Self {
            dataset,
            version,
            tree,
        }
    }

    /// Index every non-empty feature of a dataset version.
    pub fn for_dataset(dataset: &Dataset) -> Self {
        let start = Instant::now();
        let entries: Vec<IndexEntry> = dataset
            .features()
            .par_iter()
            .filter_map(|f| {
                bounding_box(&f.geometry.shape).map(|bbox| IndexEntry { id: f.id, bbox })
            })
            .collect();
        let index = Self::build(dataset.id(), dataset.version(), entries);
        debug!(
            dataset = dataset.id(),
            version = dataset.version(),
            entries = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Spatial index built"
        );
        index
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Fail unless this index was built from exactly this dataset version.
    pub fn check_fresh(&self, dataset: &Dataset) -> Result<()> {
        if self.dataset != dataset.id() || self.version != dataset.version() {
            return Err(EngineError::StaleIndex {
                dataset: dataset.id(),
                index_version: self.version,
                dataset_version: dataset.version(),
            });
        }
        Ok(())
    }

    /// Ids of all features whose bbox intersects `rect`, ascending.
    pub fn query_bbox(&self, rect: &BoundingBox) -> Vec<FeatureId> {
        let envelope = AABB::from_corners([rect.min_x, rect.min_y], [rect.max_x, rect.max_y]);
        let mut ids: Vec<FeatureId> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Entries in ascending bbox distance from `point`, with that distance.
    ///
    /// Bbox distance is a lower bound on the true geometric distance, which
    /// is what nearest-neighbour search uses to stop early.
    pub fn nearest_iter(&self, point: Coord) -> impl Iterator<Item = (&IndexEntry, f64)> + '_ {
        let query = [point.x, point.y];
        self.tree
            .nearest_neighbor_iter(&query)
            .map(move |e| (e, e.distance_2(&query).sqrt()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.tree.iter()
    }
}
