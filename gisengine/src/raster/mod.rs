//! Tiled raster engine.
//!
//! Grids are split into fixed-size tiles kept in a [`ChunkStore`], so every
//! operation here runs tile by tile and never needs the whole grid in
//! memory:
//!
//! - [`sample`] and [`statistics`] read tiles
//! - [`clip_to_mask`], [`hillshade`] and [`color_ramp`] derive new grids
//! - [`reproject_raster`] and [`read_window`] read source windows under a
//!   tile residency budget
//!
//! Operations producing a grid stage their tiles under a fresh grid id and
//! publish only on success. Cancellation is checked between tiles.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gisengine::crs::CrsId;
//! use gisengine::geometry::Coord;
//! use gisengine::raster::{
//!     sample, AffineTransform, BandData, BandInfo, MemoryChunkStore, RasterGrid, RasterImport,
//!     Sample,
//! };
//!
//! let grid = RasterGrid::import(
//!     Arc::new(MemoryChunkStore::new()),
//!     RasterImport {
//!         width: 2,
//!         height: 2,
//!         transform: AffineTransform::north_up(0.0, 2.0, 1.0, 1.0),
//!         crs: CrsId::web_mercator(),
//!         bands: vec![BandData {
//!             info: BandInfo::continuous("elevation", Some(-1.0)),
//!             cells: vec![10.0, 20.0, -1.0, 40.0],
//!         }],
//!     },
//!     256,
//! )
//! .unwrap();
//!
//! assert_eq!(sample(&grid, Coord { x: 1.5, y: 1.5 }, 0).unwrap(), Sample::Value(20.0));
//! assert_eq!(sample(&grid, Coord { x: 0.5, y: 0.5 }, 0).unwrap(), Sample::NoData);
//! ```

mod analysis;
mod derive;
mod grid;
mod store;
mod warp;

pub use analysis::{sample, statistics, BandStatistics, Histogram, HistogramSpec, Sample};
pub use derive::{clip_to_mask, color_ramp, hillshade, ColorRamp, ColorStop, HillshadeParams};
pub use grid::{
    AffineTransform, BandData, BandInfo, BandKind, RasterGrid, RasterImport, TileExtent,
    TileIndex, TileLayout, DEFAULT_NODATA, DEFAULT_TILE_SIZE,
};
pub use store::{ChunkKey, ChunkStore, DiskChunkStore, MemoryChunkStore, StoreError};
pub use warp::{
    read_window, reproject_raster, tiles_for_budget, CellWindow, ReprojectOptions, Resampling,
};
