//! End-to-end scenarios through the async engine facade.
//!
//! These tests verify complete request flows:
//! - Geometry operations with caching and repair warnings
//! - Dataset import, versioned edits and spatial queries
//! - Raster import, analysis and reprojection under a memory budget
//! - Configuration files driving engine construction

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gisengine::codec::{parse_wkt, to_wkt};
use gisengine::config::{EngineConfig, RasterSettings, WorkerSettings};
use gisengine::crs::{CrsId, Units};
use gisengine::error::EngineError;
use gisengine::feature::{FeatureId, FeatureUpdate};
use gisengine::geometry::{area, BoundingBox, Coord, Geometry, SpatialPredicate};
use gisengine::ops::{DatasetOperation, OpWarning};
use gisengine::query::{JoinMode, JoinPair};
use gisengine::raster::{
    AffineTransform, BandData, BandInfo, HillshadeParams, RasterImport, Sample,
};
use gisengine::service::{ResultFilter, SpatialEngine};
use gisengine::validation::EditPolicy;

// =============================================================================
// Test Helpers
// =============================================================================

fn engine() -> SpatialEngine {
    SpatialEngine::new(EngineConfig::default()).unwrap()
}

fn wkt(text: &str, crs: CrsId) -> Geometry {
    Geometry::new(parse_wkt(text).unwrap(), crs)
}

const POINTS: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "properties": {"name": "inside"},
         "geometry": {"type": "Point", "coordinates": [0.5, 0.5]}},
        {"type": "Feature", "properties": {"name": "outside"},
         "geometry": {"type": "Point", "coordinates": [3.0, 3.0]}}
    ]
}"#;

const PARCELS: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "properties": {"owner": "city"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}
    ]
}"#;

const ZONES: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": 10, "properties": {"zone": "res"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]]]}},
        {"type": "Feature", "id": 20, "properties": {"zone": "res"},
         "geometry": {"type": "Polygon", "coordinates": [[[2,0],[4,0],[4,2],[2,2],[2,0]]]}},
        {"type": "Feature", "id": 30, "properties": {"zone": "ind"},
         "geometry": {"type": "Polygon", "coordinates": [[[8,8],[9,8],[9,9],[8,9],[8,8]]]}}
    ]
}"#;

fn dem(width: usize, height: usize) -> RasterImport {
    RasterImport {
        width,
        height,
        transform: AffineTransform::north_up(1000.0, 2000.0, 10.0, 10.0),
        crs: CrsId::web_mercator(),
        bands: vec![BandData {
            info: BandInfo::continuous("elevation", Some(-9999.0)),
            cells: (0..width * height)
                .map(|i| ((i % width) + (i / width)) as f64)
                .collect(),
        }],
    }
}

// =============================================================================
// Geometry scenarios
// =============================================================================

#[tokio::test]
async fn test_negative_buffer_of_small_square_is_empty() {
    let square = wkt("POLYGON((0 0,4 0,4 4,0 4,0 0))", CrsId::web_mercator());
    let result = engine().buffer(square, -5.0).await.unwrap();
    assert!(result.value.is_empty());
    assert_eq!(result.metadata.operation, "buffer");
}

#[tokio::test]
async fn test_union_of_overlapping_unit_squares() {
    let a = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))", CrsId::web_mercator());
    let b = wkt("POLYGON((0.5 0.5,1.5 0.5,1.5 1.5,0.5 1.5,0.5 0.5))", CrsId::web_mercator());
    let result = engine().union(vec![a, b]).await.unwrap();
    assert!(to_wkt(&result.value.shape).starts_with("POLYGON"));
    assert!((area(&result.value.shape) - 1.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_invalid_operand_is_repaired_with_warning() {
    let clockwise = wkt("POLYGON((0 0,0 2,2 2,2 0,0 0))", CrsId::web_mercator());
    let result = engine().buffer(clockwise, 1.0).await.unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, OpWarning::InputRepaired { operand: 0, .. })));
    assert!(area(&result.value.shape) > 4.0);
}

#[tokio::test]
async fn test_crs_mismatch_surfaces() {
    let a = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))", CrsId::wgs84());
    let b = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))", CrsId::web_mercator());
    assert!(matches!(
        engine().intersection(a, b).await,
        Err(EngineError::DimensionMismatch(_))
    ));
}

#[tokio::test]
async fn test_reproject_round_trip() {
    let engine = engine();
    let point = Geometry::point(13.4, 52.5, CrsId::wgs84());
    let projected = engine.reproject(point, CrsId::web_mercator()).await.unwrap();
    let back = engine
        .reproject((*projected).clone(), CrsId::wgs84())
        .await
        .unwrap();
    let coords = back.shape.points();
    assert!((coords[0].x - 13.4).abs() < 1e-9);
    assert!((coords[0].y - 52.5).abs() < 1e-9);
}

// =============================================================================
// Dataset scenarios
// =============================================================================

#[tokio::test]
async fn test_point_polygon_join_gives_one_pair() {
    let engine = engine();
    let points = engine
        .import_geojson("points".into(), POINTS.into(), None, EditPolicy::default())
        .await
        .unwrap();
    let parcels = engine
        .import_geojson("parcels".into(), PARCELS.into(), None, EditPolicy::default())
        .await
        .unwrap();

    let pairs = engine
        .spatial_join(
            points.dataset,
            parcels.dataset,
            SpatialPredicate::Intersects,
            JoinMode::Inner,
        )
        .await
        .unwrap();
    assert_eq!(
        pairs,
        vec![JoinPair {
            left: FeatureId::new(1),
            right: Some(FeatureId::new(1)),
        }]
    );
}

#[tokio::test]
async fn test_snapshot_survives_edits() {
    let engine = engine();
    let parcels = engine
        .import_geojson("parcels".into(), PARCELS.into(), None, EditPolicy::default())
        .await
        .unwrap();
    let before = engine.dataset(parcels.dataset).unwrap();

    let moved = wkt("POLYGON((10 10,11 10,11 11,10 11,10 10))", CrsId::wgs84());
    let edit = engine
        .update_feature(
            parcels.dataset,
            FeatureId::new(1),
            FeatureUpdate::geometry(moved),
            EditPolicy::default(),
        )
        .await
        .unwrap();
    assert_eq!(edit.version, 2);

    assert_eq!(before.version(), 1);
    let old = before.feature(FeatureId::new(1)).unwrap();
    assert!((area(&old.geometry.shape) - 1.0).abs() < 1e-12);
    let after = engine.dataset(parcels.dataset).unwrap();
    assert_eq!(after.version(), 2);
    assert!(!after.is_indexed() || after.spatial_index().version() == 2);
}

#[tokio::test]
async fn test_strict_policy_rejects_invalid_geometry() {
    let engine = engine();
    let id = engine.create_dataset("strict", CrsId::wgs84());
    let bowtie = wkt("POLYGON((0 0,2 2,2 0,0 2,0 0))", CrsId::wgs84());
    let result = engine
        .add_feature(id, bowtie, Default::default(), EditPolicy::strict())
        .await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));
    assert_eq!(engine.dataset(id).unwrap().version(), 1);
}

#[tokio::test]
async fn test_unknown_feature_update() {
    let engine = engine();
    let id = engine.create_dataset("empty", CrsId::wgs84());
    let result = engine
        .update_feature(
            id,
            FeatureId::new(7),
            FeatureUpdate::default(),
            EditPolicy::default(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::FeatureNotFound(_))));
}

// =============================================================================
// Dataset Analyses
// =============================================================================

#[tokio::test]
async fn test_reproject_dataset_then_query_in_metres() {
    let engine = engine();
    let parcels = engine
        .import_geojson("parcels".into(), PARCELS.into(), None, EditPolicy::default())
        .await
        .unwrap();
    let before = engine.dataset(parcels.dataset).unwrap();

    let version = engine
        .reproject_dataset(parcels.dataset, CrsId::web_mercator())
        .await
        .unwrap();
    assert_eq!(version, 2);
    // Snapshot taken before the reprojection is unchanged
    assert_eq!(before.crs(), &CrsId::wgs84());

    let hits = engine
        .bbox_query(
            parcels.dataset,
            BoundingBox::new(50_000.0, 50_000.0, 60_000.0, 60_000.0),
        )
        .await
        .unwrap();
    assert_eq!(hits, vec![FeatureId::new(1)]);

    let record = engine
        .analyze(
            parcels.dataset,
            DatasetOperation::Buffer { distance: 100.0 },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(record.metadata.units, Some(Units::Metres));
    assert_eq!(record.dataset_version, 2);
}

#[tokio::test]
async fn test_clip_selected_features_is_stored() {
    let engine = engine();
    let zones = engine
        .import_geojson("zones".into(), ZONES.into(), None, EditPolicy::default())
        .await
        .unwrap();
    let mask = wkt("POLYGON((1 0,3 0,3 2,1 2,1 0))", CrsId::wgs84());
    let record = engine
        .analyze(
            zones.dataset,
            DatasetOperation::Clip { mask },
            Some(vec![FeatureId::new(20), FeatureId::new(30)]),
            Some("corridor".into()),
        )
        .await
        .unwrap();
    // Feature 30 lies outside the mask and is dropped
    assert_eq!(record.feature_count(), 1);
    assert_eq!(record.features[0].id, FeatureId::new(20));
    assert!((area(&record.features[0].geometry.shape) - 2.0).abs() < 1e-5);
    assert_eq!(
        record.metadata.source_feature_ids,
        vec![FeatureId::new(20), FeatureId::new(30)]
    );
    assert_eq!(record.metadata.description.as_deref(), Some("corridor"));
    assert_eq!(record.to_geojson()["features"][0]["id"], 20);

    let dissolved = engine
        .analyze(
            zones.dataset,
            DatasetOperation::Dissolve {
                attribute: "zone".into(),
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(dissolved.feature_count(), 2);

    let clips = engine.analysis_results(&ResultFilter::default().operation("clip"));
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].id, record.id);
    let scoped = engine.analysis_results(&ResultFilter::default().dataset(zones.dataset));
    assert_eq!(scoped.len(), 2);
    assert_eq!(scoped[0].id, dissolved.id);

    assert!(engine.delete_analysis_result(record.id));
    assert!(engine
        .analysis_results(&ResultFilter::default().operation("clip"))
        .is_empty());
    // Stored results outlive the dataset
    engine.drop_dataset(zones.dataset).unwrap();
    assert!(engine.analysis_result(dissolved.id).is_ok());
}

// =============================================================================
// Raster scenarios
// =============================================================================

#[tokio::test]
async fn test_raster_pipeline() {
    let config = EngineConfig::default()
        .with_raster(RasterSettings::default().with_tile_size(16))
        .with_workers(WorkerSettings::default().with_max_concurrent(2));
    let engine = SpatialEngine::new(config).unwrap();
    let grid = engine.import_raster(dem(50, 40)).await.unwrap();

    let value = engine
        .sample(grid.clone(), Coord { x: 1005.0, y: 1995.0 }, 0)
        .await
        .unwrap();
    assert_eq!(value, Sample::Value(0.0));
    assert_eq!(
        engine
            .sample(grid.clone(), Coord { x: 0.0, y: 0.0 }, 0)
            .await
            .unwrap(),
        Sample::NoData
    );

    let stats = engine
        .raster_statistics(grid.clone(), 0, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.count, 2000);
    assert_eq!(stats.min, Some(0.0));
    assert_eq!(stats.max, Some(88.0));

    let shaded = engine
        .hillshade(grid.clone(), 0, HillshadeParams::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(shaded.width(), 50);
    assert_eq!(shaded.height(), 40);

    let mask = wkt(
        "POLYGON((1000 1800,1200 1800,1200 2000,1000 2000,1000 1800))",
        CrsId::web_mercator(),
    );
    let clipped = engine
        .clip_raster(grid, mask, CancellationToken::new())
        .await
        .unwrap();
    assert!(clipped.width() <= 32);
    assert!(clipped.height() <= 32);
}

#[tokio::test]
async fn test_raster_reprojection_budget_exhausted() {
    let config = EngineConfig::default().with_raster(
        RasterSettings::default()
            .with_tile_size(16)
            .with_memory_budget(16 * 16 * 8),
    );
    let engine = SpatialEngine::new(config).unwrap();
    let mut raster = dem(64, 64);
    raster.transform = AffineTransform::north_up(1000.0, 2000.0, 10.0, 20.0);
    let grid = engine.import_raster(raster).await.unwrap();
    let before = engine.chunk_store().chunk_count();

    let result = engine
        .reproject_raster(grid, CrsId::wgs84(), None, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(EngineError::ResourceExhausted { .. })));
    assert_eq!(engine.chunk_store().chunk_count(), before);
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_engine_from_config_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("config.ini");
    std::fs::write(
        &path,
        "[cache]\nenabled = false\n[workers]\nmax_concurrent = 1\n",
    )
    .unwrap();

    let config = EngineConfig::load_from(&path).unwrap();
    let engine = Arc::new(SpatialEngine::new(config).unwrap());
    assert!(!engine.config().cache.enabled);

    let square = wkt("POLYGON((0 0,1 0,1 1,0 1,0 0))", CrsId::web_mercator());
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let square = square.clone();
        tasks.push(tokio::spawn(async move { engine.buffer(square, 0.5).await }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(engine.cache_statistics().misses, 4);
}
