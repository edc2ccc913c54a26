//! Async engine facade.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pool::RequestPool;
use super::results::{AnalysisRecord, AnalysisResults, ResultFilter, ResultId};
use crate::cache::{CacheKey, CacheStatistics, Fingerprint, ResultCache};
use crate::codec::{features_to_geojson, read_feature_collection};
use crate::config::EngineConfig;
use crate::crs::{reproject, CrsId, CrsRegistry};
use crate::error::Result;
use crate::feature::{
    Attributes, Dataset, DatasetHandle, DatasetId, DatasetRegistry, FeatureId, FeatureUpdate,
};
use crate::geometry::{BoundingBox, Coord, Geometry, SpatialPredicate, Tolerance};
use crate::ops::{self, DatasetOpSettings, DatasetOperation, Dissolved, OpOutput};
use crate::query::{self, JoinMode, JoinPair, MetricNeighbors, Neighbor};
use crate::raster::{
    self, BandStatistics, ChunkStore, ColorRamp, DiskChunkStore, HillshadeParams, HistogramSpec,
    MemoryChunkStore, RasterGrid, RasterImport, ReprojectOptions, Resampling, Sample,
};
use crate::validation::{self, EditPolicy, IssueKind, RepairOutcome, ValidationReport};

/// Outcome of importing a feature collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub dataset: DatasetId,
    pub crs: CrsId,
    pub features: usize,
    /// Features whose geometry was repaired on the way in
    pub repaired: Vec<(FeatureId, Vec<IssueKind>)>,
}

/// Outcome of a feature add or update.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEdit {
    pub feature: FeatureId,
    /// Dataset version published by the edit
    pub version: u64,
    pub repaired: Vec<IssueKind>,
}

/// Entry point for callers of the spatial engine.
///
/// Owns the dataset registry, CRS registry, result cache, stored analysis
/// results and raster chunk store. Every request runs on the blocking pool under a concurrency
/// limit; parallelism inside a request comes from rayon.
///
/// # Thread Safety
///
/// - All methods take `&self`; the engine can be shared behind an `Arc`.
/// - Dataset edits publish a new version atomically and invalidate cached
///   results scoped to that dataset before returning.
///
/// # Example
///
/// ```
/// use gisengine::config::EngineConfig;
/// use gisengine::crs::CrsId;
/// use gisengine::geometry::Geometry;
/// use gisengine::service::SpatialEngine;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let engine = SpatialEngine::new(EngineConfig::default()).unwrap();
/// let square = Geometry::polygon_from_tuples(
///     &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
///     CrsId::epsg(3857),
/// );
/// let eroded = engine.buffer(square, -5.0).await.unwrap();
/// assert!(eroded.value.is_empty());
/// # });
/// ```
pub struct SpatialEngine {
    config: EngineConfig,
    pool: RequestPool,
    cache: Arc<ResultCache>,
    datasets: Arc<DatasetRegistry>,
    results: AnalysisResults,
    crs: CrsRegistry,
    chunks: Arc<dyn ChunkStore>,
}

impl std::fmt::Debug for SpatialEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialEngine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .field("datasets", &self.datasets.len())
            .field("results", &self.results.len())
            .field("chunks", &self.chunks.chunk_count())
            .finish()
    }
}

impl SpatialEngine {
    /// Build an engine from configuration.
    ///
    /// # Errors
    ///
    /// `Storage` when the configured chunk directory cannot be created.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let chunks: Arc<dyn ChunkStore> = match &config.raster.chunk_directory {
            Some(dir) => Arc::new(DiskChunkStore::new(dir)?),
            None => Arc::new(MemoryChunkStore::new()),
        };
        Ok(Self::with_chunk_store(config, chunks))
    }

    /// Build an engine over a caller-supplied chunk store.
    pub fn with_chunk_store(config: EngineConfig, chunks: Arc<dyn ChunkStore>) -> Self {
        let cache = if config.cache.enabled {
            ResultCache::new(config.cache.capacity)
        } else {
            ResultCache::disabled()
        };
        let datasets =
            DatasetRegistry::new().with_index_prebuild(config.workers.index_prebuild);
        info!(
            max_concurrent = config.workers.max_concurrent,
            cache_enabled = config.cache.enabled,
            cache_capacity = config.cache.capacity,
            tile_size = config.raster.tile_size,
            "Spatial engine started"
        );
        Self {
            pool: RequestPool::new(config.workers.max_concurrent),
            cache: Arc::new(cache),
            datasets: Arc::new(datasets),
            results: AnalysisResults::new(),
            crs: CrsRegistry::new(),
            chunks,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn crs_registry(&self) -> &CrsRegistry {
        &self.crs
    }

    pub fn datasets(&self) -> &DatasetRegistry {
        &self.datasets
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    fn tolerance(&self) -> Tolerance {
        self.config.geometry.tolerance()
    }

    /// Histogram over `[min, max]` with the configured bucket count.
    pub fn histogram_spec(&self, min: f64, max: f64) -> Result<HistogramSpec> {
        HistogramSpec::new(min, max, self.config.raster.histogram_buckets)
    }

    /// Run a geometry operation through the result cache.
    async fn cached<T, F>(&self, operation: &'static str, key: CacheKey, work: F) -> Result<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        self.pool
            .run(operation, move || cache.get_or_compute(key, work))
            .await
    }

    /// Run an operation through the result cache, resolving metadata units
    /// against the CRS registry.
    async fn cached_op<T, F>(
        &self,
        operation: &'static str,
        key: CacheKey,
        work: F,
    ) -> Result<Arc<OpOutput<T>>>
    where
        T: std::any::Any + Send + Sync,
        F: FnOnce() -> Result<OpOutput<T>> + Send + 'static,
    {
        let registry = self.crs.clone();
        self.cached(operation, key, move || {
            Ok(work()?.with_units_from(&registry))
        })
        .await
    }

    fn dataset_op_settings(&self) -> DatasetOpSettings {
        DatasetOpSettings {
            quadrant_segments: self.config.geometry.quadrant_segments,
            simplify_attempts: self.config.geometry.simplify_attempts,
            tol: self.tolerance(),
        }
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub async fn validate(&self, geometry: Geometry) -> Result<ValidationReport> {
        let tol = self.tolerance();
        self.pool
            .run("validate", move || {
                Ok(validation::validate_shape(&geometry.shape, tol))
            })
            .await
    }

    pub async fn repair(&self, geometry: Geometry) -> Result<RepairOutcome> {
        let tol = self.tolerance();
        self.pool
            .run("repair", move || Ok(validation::repair_with(&geometry, tol)))
            .await
    }

    /// Buffer by `distance` CRS units with the configured arc segments.
    pub async fn buffer(&self, geometry: Geometry, distance: f64) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let segments = self.config.geometry.quadrant_segments;
        let key = CacheKey::new(
            Fingerprint::builder("buffer")
                .geometry(&geometry)
                .param("distance", distance)
                .param("segments", segments)
                .param("epsilon", tol.0)
                .finish(),
        );
        self.cached_op("buffer", key, move || {
            ops::buffer(&geometry, distance, segments, tol)
        })
        .await
    }

    pub async fn simplify(&self, geometry: Geometry, tolerance: f64) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let attempts = self.config.geometry.simplify_attempts;
        let key = CacheKey::new(
            Fingerprint::builder("simplify")
                .geometry(&geometry)
                .param("tolerance", tolerance)
                .param("attempts", attempts)
                .param("epsilon", tol.0)
                .finish(),
        );
        self.cached_op("simplify", key, move || {
            ops::simplify(&geometry, tolerance, attempts, tol)
        })
        .await
    }

    pub async fn union(&self, geometries: Vec<Geometry>) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let key = CacheKey::new(
            geometries
                .iter()
                .fold(Fingerprint::builder("union"), |b, g| b.geometry(g))
                .param("epsilon", tol.0)
                .finish(),
        );
        self.cached_op("union", key, move || ops::union(&geometries, tol))
            .await
    }

    pub async fn intersection(&self, a: Geometry, b: Geometry) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let key = pair_key("intersection", &a, &b, tol);
        self.cached_op("intersection", key, move || ops::intersection(&a, &b, tol))
            .await
    }

    pub async fn clip(&self, geometry: Geometry, mask: Geometry) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let key = pair_key("clip", &geometry, &mask, tol);
        self.cached_op("clip", key, move || ops::clip(&geometry, &mask, tol))
            .await
    }

    pub async fn merge(&self, a: Geometry, b: Geometry) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let key = pair_key("merge", &a, &b, tol);
        self.cached_op("merge", key, move || ops::merge(&a, &b, tol))
            .await
    }

    pub async fn split(&self, geometry: Geometry, splitter: Geometry) -> Result<Arc<OpOutput<Geometry>>> {
        let tol = self.tolerance();
        let key = pair_key("split", &geometry, &splitter, tol);
        self.cached_op("split", key, move || ops::split(&geometry, &splitter, tol))
            .await
    }

    /// Reproject a geometry into `target`.
    pub async fn reproject(&self, geometry: Geometry, target: CrsId) -> Result<Arc<Geometry>> {
        let registry = self.crs.clone();
        let key = CacheKey::new(
            Fingerprint::builder("reproject")
                .geometry(&geometry)
                .param("target", target.as_str())
                .finish(),
        );
        self.cached("reproject", key, move || {
            reproject(&registry, &geometry, &target)
        })
        .await
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Register an empty dataset.
    pub fn create_dataset(&self, name: &str, crs: CrsId) -> DatasetId {
        self.datasets.create(name, crs).id()
    }

    /// Import a GeoJSON feature collection as a new dataset.
    ///
    /// The CRS is `declared`, else the collection's `crs` member, else
    /// detected from the coordinate range.
    pub async fn import_geojson(
        &self,
        name: String,
        text: String,
        declared: Option<CrsId>,
        policy: EditPolicy,
    ) -> Result<ImportReport> {
        let tol = self.tolerance();
        let datasets = Arc::clone(&self.datasets);
        self.pool
            .run("import", move || {
                let collection = read_feature_collection(&text, declared)?;
                let (handle, repaired) = datasets.import(name, collection, &policy, tol)?;
                let snapshot = handle.snapshot();
                Ok(ImportReport {
                    dataset: snapshot.id(),
                    crs: snapshot.crs().clone(),
                    features: snapshot.len(),
                    repaired,
                })
            })
            .await
    }

    /// Latest version of a dataset.
    pub fn dataset(&self, id: DatasetId) -> Result<Arc<Dataset>> {
        Ok(self.datasets.get(id)?.snapshot())
    }

    /// Latest version of a dataset as a GeoJSON FeatureCollection.
    pub async fn export_geojson(&self, id: DatasetId) -> Result<serde_json::Value> {
        let dataset = self.dataset(id)?;
        self.pool
            .run("export", move || {
                Ok(features_to_geojson(dataset.features().iter().map(|f| f.as_ref())))
            })
            .await
    }

    async fn edit<T, F>(&self, operation: &'static str, id: DatasetId, edit: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DatasetHandle) -> Result<T> + Send + 'static,
    {
        let handle = self.datasets.get(id)?;
        let cache = Arc::clone(&self.cache);
        self.pool
            .run(operation, move || {
                let value = edit(&handle)?;
                cache.invalidate_scope(id);
                Ok(value)
            })
            .await
    }

    pub async fn add_feature(
        &self,
        id: DatasetId,
        geometry: Geometry,
        attributes: Attributes,
        policy: EditPolicy,
    ) -> Result<FeatureEdit> {
        let tol = self.tolerance();
        self.edit("add_feature", id, move |handle| {
            handle.edit(|current| {
                let outcome = current.add_feature(geometry, attributes, &policy, tol)?;
                let edit = FeatureEdit {
                    feature: outcome.feature_id,
                    version: outcome.dataset.version(),
                    repaired: outcome.repaired,
                };
                Ok((outcome.dataset, edit))
            })
        })
        .await
    }

    pub async fn update_feature(
        &self,
        id: DatasetId,
        feature: FeatureId,
        update: FeatureUpdate,
        policy: EditPolicy,
    ) -> Result<FeatureEdit> {
        let tol = self.tolerance();
        self.edit("update_feature", id, move |handle| {
            handle.edit(|current| {
                let outcome = current.update_feature(feature, update, &policy, tol)?;
                let edit = FeatureEdit {
                    feature: outcome.feature_id,
                    version: outcome.dataset.version(),
                    repaired: outcome.repaired,
                };
                Ok((outcome.dataset, edit))
            })
        })
        .await
    }

    /// Delete a feature; returns the published version.
    pub async fn delete_feature(&self, id: DatasetId, feature: FeatureId) -> Result<u64> {
        self.edit("delete_feature", id, move |handle| {
            handle.edit(|current| {
                let next = current.delete_feature(feature)?;
                let version = next.version();
                Ok((next, version))
            })
        })
        .await
    }

    /// Reproject every feature of a dataset into `target`; returns the
    /// published version.
    ///
    /// # Errors
    ///
    /// `UnsupportedCrs` when either CRS is unknown. A failed reprojection
    /// publishes nothing.
    pub async fn reproject_dataset(&self, id: DatasetId, target: CrsId) -> Result<u64> {
        let registry = self.crs.clone();
        self.edit("reproject_dataset", id, move |handle| {
            handle.edit(|current| {
                let next = current.transformed(target.clone(), |geometry| {
                    reproject(&registry, geometry, &target)
                })?;
                let version = next.version();
                Ok((next, version))
            })
        })
        .await
    }

    /// Drop a dataset and everything cached for it.
    pub fn drop_dataset(&self, id: DatasetId) -> Result<()> {
        self.datasets.drop_dataset(id)?;
        self.cache.invalidate_scope(id);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn bbox_query(&self, id: DatasetId, rect: BoundingBox) -> Result<Vec<FeatureId>> {
        let dataset = self.dataset(id)?;
        self.pool
            .run("bbox_query", move || Ok(query::bbox_query(&dataset, &rect)))
            .await
    }

    pub async fn nearest(&self, id: DatasetId, point: Coord, k: usize) -> Result<Vec<Neighbor>> {
        let dataset = self.dataset(id)?;
        self.pool
            .run("nearest", move || {
                Ok(query::nearest_neighbors(&dataset, point, k))
            })
            .await
    }

    /// Nearest neighbours with distances in metres.
    pub async fn nearest_metric(
        &self,
        id: DatasetId,
        point: Coord,
        k: usize,
        metric_crs: Option<CrsId>,
    ) -> Result<MetricNeighbors> {
        let dataset = self.dataset(id)?;
        let registry = self.crs.clone();
        self.pool
            .run("nearest_metric", move || {
                query::nearest_neighbors_metric(&registry, &dataset, point, k, metric_crs.as_ref())
            })
            .await
    }

    pub async fn spatial_join(
        &self,
        left: DatasetId,
        right: DatasetId,
        predicate: SpatialPredicate,
        mode: JoinMode,
    ) -> Result<Vec<JoinPair>> {
        let left = self.dataset(left)?;
        let right = self.dataset(right)?;
        self.pool
            .run("spatial_join", move || {
                query::spatial_join(&left, &right, predicate, mode)
            })
            .await
    }

    /// Dissolve the latest dataset version by `attribute`, over the
    /// features named by `features` (all when `None`).
    pub async fn dissolve(
        &self,
        id: DatasetId,
        attribute: String,
        features: Option<Vec<FeatureId>>,
    ) -> Result<Arc<OpOutput<Dissolved>>> {
        let dataset = self.dataset(id)?;
        let tol = self.tolerance();
        let key = CacheKey::scoped(
            id,
            Fingerprint::builder("dissolve")
                .dataset(&dataset)
                .param("attribute", &attribute)
                .param("features", &features)
                .param("epsilon", tol.0)
                .finish(),
        );
        self.cached_op("dissolve", key, move || match features {
            Some(ids) => ops::dissolve(&dataset.subset(&ids)?, &attribute, tol),
            None => ops::dissolve(&dataset, &attribute, tol),
        })
        .await
    }

    // =========================================================================
    // Stored analyses
    // =========================================================================

    /// Run `operation` over the latest version of a dataset and store the
    /// result.
    ///
    /// `features` limits the operation to those ids (all features when
    /// `None`); `description` is kept in the result metadata.
    ///
    /// # Errors
    ///
    /// `DatasetNotFound`, `FeatureNotFound` for an unknown feature id,
    /// `InvalidInput` for an empty selection, plus whatever the operation
    /// itself reports. Nothing is stored on error.
    pub async fn analyze(
        &self,
        id: DatasetId,
        operation: DatasetOperation,
        features: Option<Vec<FeatureId>>,
        description: Option<String>,
    ) -> Result<Arc<AnalysisRecord>> {
        let dataset = self.dataset(id)?;
        let settings = self.dataset_op_settings();
        let registry = self.crs.clone();
        let version = dataset.version();
        let output = self
            .pool
            .run(operation.name(), move || {
                let output = ops::run_dataset_operation(
                    &dataset,
                    &operation,
                    features.as_deref(),
                    description.as_deref(),
                    settings,
                )?;
                Ok(output.with_units_from(&registry))
            })
            .await?;
        Ok(self.results.insert(id, version, output))
    }

    /// Stored analysis result by id.
    pub fn analysis_result(&self, id: ResultId) -> Result<Arc<AnalysisRecord>> {
        self.results.get(id)
    }

    /// Stored analysis results matching `filter`, newest first.
    pub fn analysis_results(&self, filter: &ResultFilter) -> Vec<Arc<AnalysisRecord>> {
        self.results.list(filter)
    }

    /// Delete a stored analysis result. Returns false for unknown ids.
    pub fn delete_analysis_result(&self, id: ResultId) -> bool {
        self.results.delete(id)
    }

    // =========================================================================
    // Rasters
    // =========================================================================

    /// Tile a decoded raster into the engine's chunk store.
    pub async fn import_raster(&self, raster: RasterImport) -> Result<RasterGrid> {
        let store = Arc::clone(&self.chunks);
        let tile_size = self.config.raster.tile_size;
        self.pool
            .run("import_raster", move || {
                RasterGrid::import(store, raster, tile_size)
            })
            .await
    }

    pub async fn sample(&self, grid: RasterGrid, point: Coord, band: usize) -> Result<Sample> {
        self.pool
            .run("sample", move || raster::sample(&grid, point, band))
            .await
    }

    pub async fn raster_statistics(
        &self,
        grid: RasterGrid,
        band: usize,
        histogram: Option<HistogramSpec>,
        cancel: CancellationToken,
    ) -> Result<Arc<BandStatistics>> {
        let key = CacheKey::new(
            Fingerprint::builder("statistics")
                .input(grid.content_hash())
                .param("band", band)
                .param("histogram", histogram)
                .finish(),
        );
        self.cached("statistics", key, move || {
            raster::statistics(&grid, band, histogram, &cancel)
        })
        .await
    }

    pub async fn clip_raster(
        &self,
        grid: RasterGrid,
        mask: Geometry,
        cancel: CancellationToken,
    ) -> Result<RasterGrid> {
        self.pool
            .run("clip_raster", move || {
                raster::clip_to_mask(&grid, &mask, &cancel)
            })
            .await
    }

    pub async fn hillshade(
        &self,
        grid: RasterGrid,
        band: usize,
        params: HillshadeParams,
        cancel: CancellationToken,
    ) -> Result<Arc<RasterGrid>> {
        let key = CacheKey::new(
            Fingerprint::builder("hillshade")
                .input(grid.content_hash())
                .param("band", band)
                .param("azimuth", params.azimuth)
                .param("altitude", params.altitude)
                .param("z_factor", params.z_factor)
                .finish(),
        );
        self.cached("hillshade", key, move || {
            raster::hillshade(&grid, band, params, &cancel)
        })
        .await
    }

    pub async fn color_ramp(
        &self,
        grid: RasterGrid,
        band: usize,
        ramp: ColorRamp,
        cancel: CancellationToken,
    ) -> Result<RasterGrid> {
        self.pool
            .run("color_ramp", move || {
                raster::color_ramp(&grid, band, &ramp, &cancel)
            })
            .await
    }

    /// Reproject a raster within the configured memory budget.
    pub async fn reproject_raster(
        &self,
        grid: RasterGrid,
        target: CrsId,
        resampling: Option<Resampling>,
        cancel: CancellationToken,
    ) -> Result<RasterGrid> {
        let registry = self.crs.clone();
        let mut options = ReprojectOptions::new(self.config.raster.budget_tiles());
        if let Some(resampling) = resampling {
            options = options.with_resampling(resampling);
        }
        debug!(grid = grid.id(), target = %target, budget_tiles = options.budget_tiles, "Raster reprojection requested");
        self.pool
            .run("reproject_raster", move || {
                raster::reproject_raster(&registry, &grid, &target, options, &cancel)
            })
            .await
    }
}

fn pair_key(operation: &str, a: &Geometry, b: &Geometry, tol: Tolerance) -> CacheKey {
    CacheKey::new(
        Fingerprint::builder(operation)
            .geometry(a)
            .geometry(b)
            .param("epsilon", tol.0)
            .finish(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, RasterSettings};
    use crate::crs::Units;
    use crate::error::EngineError;
    use crate::feature::AttributeValue;
    use crate::geometry::area;
    use crate::raster::{AffineTransform, BandData, BandInfo};

    fn engine() -> SpatialEngine {
        SpatialEngine::new(EngineConfig::default()).unwrap()
    }

    fn square(x0: f64, y0: f64, size: f64) -> Geometry {
        Geometry::polygon_from_tuples(
            &[
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ],
            CrsId::web_mercator(),
        )
    }

    const SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"zone": "a"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"zone": "a"},
             "geometry": {"type": "Polygon", "coordinates": [[[1,0],[2,0],[2,1],[1,1],[1,0]]]}},
            {"type": "Feature", "properties": {"zone": "b"},
             "geometry": {"type": "Polygon", "coordinates": [[[5,5],[6,5],[6,6],[5,6],[5,5]]]}}
        ]
    }"#;

    // =========================================================================
    // Geometry requests
    // =========================================================================

    #[tokio::test]
    async fn test_buffer_is_cached() {
        let engine = engine();
        let first = engine.buffer(square(0.0, 0.0, 4.0), 1.0).await.unwrap();
        let second = engine.buffer(square(0.0, 0.0, 4.0), 1.0).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = engine.cache_statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_gives_same_result() {
        let config = EngineConfig::default().with_cache(CacheSettings::default().with_enabled(false));
        let engine = SpatialEngine::new(config).unwrap();
        let first = engine.buffer(square(0.0, 0.0, 4.0), 1.0).await.unwrap();
        let second = engine.buffer(square(0.0, 0.0, 4.0), 1.0).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_negative_buffer_erodes_to_empty() {
        let eroded = engine().buffer(square(0.0, 0.0, 4.0), -5.0).await.unwrap();
        assert!(eroded.value.is_empty());
    }

    #[tokio::test]
    async fn test_union_of_overlapping_squares() {
        let merged = engine()
            .union(vec![square(0.0, 0.0, 1.0), square(0.5, 0.5, 1.0)])
            .await
            .unwrap();
        assert!((area(&merged.value.shape) - 1.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_validate_and_repair() {
        let engine = engine();
        let clockwise = Geometry::polygon_from_tuples(
            &[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)],
            CrsId::wgs84(),
        );
        let report = engine.validate(clockwise.clone()).await.unwrap();
        assert!(!report.valid);
        let repaired = engine.repair(clockwise).await.unwrap();
        assert!(repaired.changed);
        assert!(engine.validate(repaired.geometry).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_reproject_unknown_crs() {
        let result = engine()
            .reproject(square(0.0, 0.0, 1.0), CrsId::parse("EPSG:999999"))
            .await;
        assert!(matches!(result, Err(EngineError::UnsupportedCrs(_))));
    }

    // =========================================================================
    // Dataset requests
    // =========================================================================

    #[tokio::test]
    async fn test_import_edit_and_query() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.features, 3);
        assert_eq!(report.crs, CrsId::wgs84());

        let hits = engine
            .bbox_query(report.dataset, BoundingBox::new(4.0, 4.0, 7.0, 7.0))
            .await
            .unwrap();
        assert_eq!(hits, vec![FeatureId::new(3)]);

        let mut attributes = Attributes::new();
        attributes.insert("zone".into(), AttributeValue::String("b".into()));
        let edit = engine
            .add_feature(
                report.dataset,
                Geometry::polygon_from_tuples(
                    &[(6.0, 5.0), (7.0, 5.0), (7.0, 6.0), (6.0, 6.0), (6.0, 5.0)],
                    CrsId::wgs84(),
                ),
                attributes,
                EditPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(edit.feature, FeatureId::new(4));
        assert_eq!(edit.version, 2);

        let nearest = engine
            .nearest(report.dataset, Coord { x: 6.9, y: 5.5 }, 1)
            .await
            .unwrap();
        assert_eq!(nearest[0].id, FeatureId::new(4));

        let version = engine
            .delete_feature(report.dataset, FeatureId::new(1))
            .await
            .unwrap();
        assert_eq!(version, 3);
        assert_eq!(engine.dataset(report.dataset).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_edit_invalidates_dissolve() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let first = engine.dissolve(report.dataset, "zone".into(), None).await.unwrap();
        assert_eq!(first.value.features.len(), 2);

        engine
            .delete_feature(report.dataset, FeatureId::new(3))
            .await
            .unwrap();
        let second = engine.dissolve(report.dataset, "zone".into(), None).await.unwrap();
        assert_eq!(second.value.features.len(), 1);
        assert_eq!(engine.cache_statistics().invalidations, 1);
    }

    #[tokio::test]
    async fn test_dropped_dataset_not_found() {
        let engine = engine();
        let id = engine.create_dataset("empty", CrsId::wgs84());
        engine.drop_dataset(id).unwrap();
        assert!(matches!(
            engine.bbox_query(id, BoundingBox::new(0.0, 0.0, 1.0, 1.0)).await,
            Err(EngineError::DatasetNotFound(_))
        ));
        assert!(matches!(
            engine.drop_dataset(id),
            Err(EngineError::DatasetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_export_geojson() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let exported = engine.export_geojson(report.dataset).await.unwrap();
        assert_eq!(exported["type"], "FeatureCollection");
        assert_eq!(exported["features"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_export_keeps_imported_ids() {
        let engine = engine();
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 40, "properties": {"zone": "a"},
                 "geometry": {"type": "Point", "coordinates": [1, 1]}},
                {"type": "Feature", "properties": {"zone": "b"},
                 "geometry": {"type": "Point", "coordinates": [2, 2]}}
            ]
        }"#;
        let report = engine
            .import_geojson("sites".into(), text.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let exported = engine.export_geojson(report.dataset).await.unwrap();
        let ids: Vec<u64> = exported["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![40, 41]);

        engine
            .delete_feature(report.dataset, FeatureId::new(41))
            .await
            .unwrap();
        let edit = engine
            .add_feature(
                report.dataset,
                Geometry::point(3.0, 3.0, CrsId::wgs84()),
                Attributes::new(),
                EditPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(edit.feature, FeatureId::new(42));
    }

    #[tokio::test]
    async fn test_result_units_from_registered_crs() {
        let engine = engine();
        let site = CrsId::parse("LOCAL:7");
        engine.crs_registry().register_proj4(
            site.clone(),
            "Site grid",
            "+proj=tmerc +lat_0=0 +lon_0=9 +k=1 +x_0=0 +y_0=0 +ellps=WGS84 +units=m +no_defs",
            Units::Metres,
        );
        let geometry = Geometry::new(square(0.0, 0.0, 2.0).shape, site);
        let buffered = engine.buffer(geometry, 1.0).await.unwrap();
        assert_eq!(buffered.metadata.units, Some(Units::Metres));
    }

    // =========================================================================
    // Dataset operations and stored results
    // =========================================================================

    #[tokio::test]
    async fn test_dissolve_selected_features() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let selected = engine
            .dissolve(
                report.dataset,
                "zone".into(),
                Some(vec![FeatureId::new(1), FeatureId::new(3)]),
            )
            .await
            .unwrap();
        assert_eq!(selected.value.features.len(), 2);
        assert_eq!(
            selected.metadata.source_feature_ids,
            vec![FeatureId::new(1), FeatureId::new(3)]
        );
        let all = engine.dissolve(report.dataset, "zone".into(), None).await.unwrap();
        assert_eq!(all.metadata.source_feature_ids.len(), 3);
        assert!(!Arc::ptr_eq(&selected, &all));
    }

    #[tokio::test]
    async fn test_analyze_stores_results() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let buffered = engine
            .analyze(
                report.dataset,
                DatasetOperation::Buffer { distance: 0.1 },
                Some(vec![FeatureId::new(2)]),
                Some("road margin".into()),
            )
            .await
            .unwrap();
        assert_eq!(buffered.feature_count(), 1);
        assert_eq!(buffered.features[0].id, FeatureId::new(2));
        assert_eq!(buffered.metadata.description.as_deref(), Some("road margin"));
        assert_eq!(buffered.metadata.units, Some(Units::Degrees));
        assert_eq!(buffered.dataset_version, 1);

        let merged = engine
            .analyze(report.dataset, DatasetOperation::Union, None, None)
            .await
            .unwrap();
        assert!((area(&merged.features[0].geometry.shape) - 3.0).abs() < 1e-5);

        let listed = engine.analysis_results(&ResultFilter::default());
        let ids: Vec<ResultId> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![merged.id, buffered.id]);
        let buffers = engine.analysis_results(&ResultFilter::default().operation("buffer"));
        assert_eq!(buffers.len(), 1);

        assert!(engine.delete_analysis_result(buffered.id));
        assert!(matches!(
            engine.analysis_result(buffered.id),
            Err(EngineError::ResultNotFound(_))
        ));
        assert!(!engine.delete_analysis_result(buffered.id));
    }

    #[tokio::test]
    async fn test_failed_analysis_stores_nothing() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        let result = engine
            .analyze(
                report.dataset,
                DatasetOperation::Simplify { tolerance: 0.1 },
                Some(vec![FeatureId::new(9)]),
                None,
            )
            .await;
        assert!(matches!(result, Err(EngineError::FeatureNotFound(_))));
        assert!(engine.analysis_results(&ResultFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn test_reproject_dataset_publishes_version() {
        let engine = engine();
        let report = engine
            .import_geojson("zones".into(), SQUARES.into(), None, EditPolicy::default())
            .await
            .unwrap();
        engine.dissolve(report.dataset, "zone".into(), None).await.unwrap();

        let version = engine
            .reproject_dataset(report.dataset, CrsId::web_mercator())
            .await
            .unwrap();
        assert_eq!(version, 2);
        let dataset = engine.dataset(report.dataset).unwrap();
        assert_eq!(dataset.crs(), &CrsId::web_mercator());
        assert_eq!(dataset.len(), 3);
        let moved = dataset.feature(FeatureId::new(3)).unwrap();
        assert_eq!(moved.attribute("zone"), &AttributeValue::from("b"));
        let bounds = crate::geometry::bounding_box(&moved.geometry.shape).unwrap();
        assert!((bounds.min_x - 556_597.45).abs() < 1.0);
        assert_eq!(engine.cache_statistics().invalidations, 1);

        let err = engine
            .reproject_dataset(report.dataset, CrsId::parse("EPSG:999999"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedCrs(_)));
        assert_eq!(engine.dataset(report.dataset).unwrap().version(), 2);
    }

    // =========================================================================
    // Raster requests
    // =========================================================================

    fn ramp(width: usize, height: usize) -> RasterImport {
        RasterImport {
            width,
            height,
            transform: AffineTransform::north_up(0.0, height as f64, 1.0, 1.0),
            crs: CrsId::web_mercator(),
            bands: vec![BandData {
                info: BandInfo::continuous("elevation", Some(-1.0)),
                cells: (0..width * height).map(|i| i as f64).collect(),
            }],
        }
    }

    #[tokio::test]
    async fn test_raster_statistics_cached_by_content() {
        let config = EngineConfig::default()
            .with_raster(RasterSettings::default().with_tile_size(16));
        let engine = SpatialEngine::new(config).unwrap();
        let grid = engine.import_raster(ramp(40, 30)).await.unwrap();
        let again = engine.import_raster(ramp(40, 30)).await.unwrap();
        assert_ne!(grid.id(), again.id());

        let spec = engine.histogram_spec(0.0, 1200.0).unwrap();
        let a = engine
            .raster_statistics(grid, 0, Some(spec), CancellationToken::new())
            .await
            .unwrap();
        let b = engine
            .raster_statistics(again, 0, Some(spec), CancellationToken::new())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.count, 1200);
        assert_eq!(a.histogram.as_ref().unwrap().counts.len(), 64);
    }

    #[tokio::test]
    async fn test_cancelled_statistics_not_cached() {
        let engine = engine();
        let grid = engine.import_raster(ramp(10, 10)).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine
            .raster_statistics(grid.clone(), 0, None, cancel)
            .await;
        assert!(matches!(result, Err(EngineError::Canceled)));
        let stats = engine
            .raster_statistics(grid, 0, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.count, 100);
    }

    #[tokio::test]
    async fn test_disk_chunk_store_from_config() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::default().with_raster(
            RasterSettings::default()
                .with_tile_size(16)
                .with_chunk_directory(temp.path().join("chunks")),
        );
        let engine = SpatialEngine::new(config).unwrap();
        let grid = engine.import_raster(ramp(20, 20)).await.unwrap();
        assert_eq!(engine.chunk_store().chunk_count(), 4);
        let value = engine
            .sample(grid, Coord { x: 0.5, y: 19.5 }, 0)
            .await
            .unwrap();
        assert_eq!(value, Sample::Value(0.0));
    }
}
