//! gisengine - Spatial data engine for GIS editing services
//!
//! Validates, repairs, transforms, indexes and analyzes vector geometries
//! and tiled raster grids. Callers hand the engine decoded values and get
//! back new immutable results with metadata (CRS, units, warnings).
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides an async facade:
//!
//! ```ignore
//! use gisengine::config::EngineConfig;
//! use gisengine::service::SpatialEngine;
//!
//! let engine = SpatialEngine::new(EngineConfig::load()?)?;
//! let report = engine.import_geojson("parcels".into(), text, None, Default::default()).await?;
//! let hits = engine.bbox_query(report.dataset, rect).await?;
//! ```
//!
//! The modules underneath are usable directly and are synchronous:
//! [`geometry`], [`validation`], [`ops`], [`feature`], [`index`], [`query`],
//! [`crs`], [`raster`], [`cache`] and [`codec`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod crs;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod index;
pub mod logging;
pub mod ops;
pub mod query;
pub mod raster;
pub mod service;
pub mod validation;

pub use error::{EngineError, Result};

/// Version of the gisengine library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
