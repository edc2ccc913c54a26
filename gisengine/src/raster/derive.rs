//! Tile-wise derived products: mask clipping, hillshade, colour ramps.

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::grid::{
    check_canceled, BandInfo, RasterGrid, StagedGrid, TileExtent, TileIndex, TileLayout,
    DEFAULT_NODATA,
};
use super::warp::TileWindow;
use crate::error::{EngineError, Result};
use crate::geometry::{bounding_box, point_in_polygons, BoundingBox, Geometry, Location, Tolerance};

fn tile_bbox(grid: &RasterGrid, ext: &TileExtent) -> BoundingBox {
    let t = grid.transform();
    let (c0, r0) = (ext.col0 as f64, ext.row0 as f64);
    let (c1, r1) = (c0 + ext.width as f64, r0 + ext.height as f64);
    let mut bbox = BoundingBox::from_coord(t.apply(c0, r0));
    for (c, r) in [(c1, r0), (c0, r1), (c1, r1)] {
        bbox.expand(t.apply(c, r));
    }
    bbox
}

// =============================================================================
// Clip
// =============================================================================

/// Mask a grid with a polygon.
///
/// Cells whose centre lies outside the mask become nodata. Tiles without a
/// single in-mask cell are dropped, and the output extent shrinks to the
/// tile-aligned block covering the remaining tiles. A mask missing the grid
/// entirely gives a 0x0 grid.
///
/// # Errors
///
/// `DimensionMismatch` when the mask is not areal or its CRS differs from
/// the grid's; `Canceled` between tiles.
pub fn clip_to_mask(
    grid: &RasterGrid,
    mask: &Geometry,
    cancel: &CancellationToken,
) -> Result<RasterGrid> {
    if mask.shape.dimension() != 2 {
        return Err(EngineError::DimensionMismatch(format!(
            "raster mask must be areal, got {}",
            mask.geometry_type()
        )));
    }
    if &mask.crs != grid.crs() {
        return Err(EngineError::DimensionMismatch(format!(
            "mask CRS {} differs from raster CRS {}",
            mask.crs,
            grid.crs()
        )));
    }
    let polygons = mask.shape.polygons();
    let mask_bbox = bounding_box(&mask.shape);
    let tol = Tolerance::default();
    let layout = grid.layout();
    let transform = *grid.transform();

    let inside = |col: usize, row: usize| {
        point_in_polygons(transform.cell_center(col, row), &polygons, tol) != Location::Outside
    };
    let touches = |tile: TileIndex| {
        let ext = layout.extent(tile);
        if !mask_bbox.is_some_and(|b| b.intersects(&tile_bbox(grid, &ext))) {
            return false;
        }
        (ext.row0..ext.row0 + ext.height)
            .any(|row| (ext.col0..ext.col0 + ext.width).any(|col| inside(col, row)))
    };

    let kept: Vec<TileIndex> = layout
        .tiles()
        .into_par_iter()
        .map(|tile| {
            check_canceled(cancel)?;
            Ok(touches(tile).then_some(tile))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    let bands: Vec<BandInfo> = grid
        .bands()
        .iter()
        .map(|b| BandInfo {
            nodata: Some(b.nodata.unwrap_or(DEFAULT_NODATA)),
            ..b.clone()
        })
        .collect();
    let (Some(row_min), Some(col_min)) = (
        kept.iter().map(|t| t.row).min(),
        kept.iter().map(|t| t.col).min(),
    ) else {
        let empty = StagedGrid::new(grid.store().clone(), TileLayout::new(0, 0, layout.tile_size)?);
        debug!(grid = grid.id(), "Mask misses raster, clipped to empty grid");
        return empty.commit(transform, grid.crs().clone(), bands);
    };
    let row_max = kept.iter().map(|t| t.row).max().unwrap_or(row_min);
    let col_max = kept.iter().map(|t| t.col).max().unwrap_or(col_min);
    let ts = layout.tile_size;
    let (col0, row0) = (col_min as usize * ts, row_min as usize * ts);
    let out_layout = TileLayout::new(
        layout.width.min((col_max as usize + 1) * ts) - col0,
        layout.height.min((row_max as usize + 1) * ts) - row0,
        ts,
    )?;
    let staged = StagedGrid::new(grid.store().clone(), out_layout);

    kept.par_iter().try_for_each(|&tile| {
        check_canceled(cancel)?;
        let ext = layout.extent(tile);
        let target = TileIndex::new(tile.row - row_min, tile.col - col_min);
        for (band, info) in bands.iter().enumerate() {
            let source = &grid.bands()[band];
            let mut cells = grid.read_tile(band, tile)?;
            for (i, cell) in cells.iter_mut().enumerate() {
                let (col, row) = (ext.col0 + i % ext.width, ext.row0 + i / ext.width);
                if source.is_nodata(*cell) || !inside(col, row) {
                    *cell = info.fill_value();
                }
            }
            staged.write_tile(band as u32, target, &cells)?;
        }
        Ok::<(), EngineError>(())
    })?;

    let out = staged.commit(transform.shifted(col0, row0), grid.crs().clone(), bands)?;
    info!(
        grid = grid.id(),
        clipped = out.id(),
        tiles = kept.len(),
        dropped = layout.tile_count() - kept.len(),
        "Clipped raster to mask"
    );
    Ok(out)
}

// =============================================================================
// Hillshade
// =============================================================================

/// Illumination parameters for [`hillshade`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HillshadeParams {
    /// Light direction, degrees clockwise from north
    pub azimuth: f64,
    /// Light elevation above the horizon, degrees
    pub altitude: f64,
    /// Vertical exaggeration
    pub z_factor: f64,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuth: 315.0,
            altitude: 45.0,
            z_factor: 1.0,
        }
    }
}

/// Shaded relief of an elevation band using Horn's gradient.
///
/// Output is one continuous band in `[0, 255]`. Cells whose elevation is
/// nodata stay nodata; nodata neighbours are replaced by the centre value
/// and the grid edge is extended outward.
///
/// # Errors
///
/// `Canceled` between tiles.
pub fn hillshade(
    grid: &RasterGrid,
    band: usize,
    params: HillshadeParams,
    cancel: &CancellationToken,
) -> Result<RasterGrid> {
    let info = grid.band(band)?.clone();
    let layout = grid.layout();
    let (dx, dy) = grid.transform().cell_size();
    let zenith = (90.0 - params.altitude).to_radians();
    let azimuth = (360.0 - params.azimuth + 90.0).rem_euclid(360.0).to_radians();
    let out_info = BandInfo::continuous("hillshade", Some(DEFAULT_NODATA));
    let staged = StagedGrid::new(grid.store().clone(), layout);

    layout.tiles().into_par_iter().try_for_each(|tile| {
        check_canceled(cancel)?;
        let ext = layout.extent(tile);
        let lo = (ext.col0.saturating_sub(1), ext.row0.saturating_sub(1));
        let hi = (
            (ext.col0 + ext.width).min(layout.width - 1),
            (ext.row0 + ext.height).min(layout.height - 1),
        );
        let window = TileWindow::load(grid, band, lo, hi, 9)?;
        let mut cells = Vec::with_capacity(ext.cell_count());
        for row in ext.row0..ext.row0 + ext.height {
            for col in ext.col0..ext.col0 + ext.width {
                let (c, r) = (col as isize, row as isize);
                let e = window.get(c, r);
                if info.is_nodata(e) {
                    cells.push(DEFAULT_NODATA);
                    continue;
                }
                let z = |dc: isize, dr: isize| {
                    let v = window.get(c + dc, r + dr);
                    if info.is_nodata(v) {
                        e
                    } else {
                        v
                    }
                };
                let (a, b, cc) = (z(-1, -1), z(0, -1), z(1, -1));
                let (d, f) = (z(-1, 0), z(1, 0));
                let (g, h, i) = (z(-1, 1), z(0, 1), z(1, 1));
                let dzdx = ((cc + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * dx);
                let dzdy = ((g + 2.0 * h + i) - (a + 2.0 * b + cc)) / (8.0 * dy);
                let slope = (params.z_factor * dzdx.hypot(dzdy)).atan();
                let aspect = dzdy.atan2(-dzdx);
                let shade = zenith.cos() * slope.cos()
                    + zenith.sin() * slope.sin() * (azimuth - aspect).cos();
                cells.push((255.0 * shade).clamp(0.0, 255.0));
            }
        }
        staged.write_tile(0, tile, &cells)
    })?;

    let out = staged.commit(*grid.transform(), grid.crs().clone(), vec![out_info])?;
    debug!(grid = grid.id(), hillshade = out.id(), "Computed hillshade");
    Ok(out)
}

// =============================================================================
// Colour ramp
// =============================================================================

/// Value-to-colour anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub value: f64,
    /// RGBA
    pub color: [u8; 4],
}

/// Piecewise-linear colour ramp.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRamp {
    stops: Vec<ColorStop>,
}

impl ColorRamp {
    /// # Errors
    ///
    /// `InvalidInput` for no stops or a non-finite stop value.
    pub fn new(mut stops: Vec<ColorStop>) -> Result<Self> {
        if stops.is_empty() || stops.iter().any(|s| !s.value.is_finite()) {
            return Err(EngineError::InvalidInput(
                "colour ramp needs at least one finite stop".into(),
            ));
        }
        stops.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(Self { stops })
    }

    /// Black to white between `min` and `max`.
    pub fn grayscale(min: f64, max: f64) -> Result<Self> {
        Self::new(vec![
            ColorStop { value: min, color: [0, 0, 0, 255] },
            ColorStop { value: max, color: [255, 255, 255, 255] },
        ])
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Colour for a value, clamped to the end stops.
    pub fn color_at(&self, value: f64) -> [u8; 4] {
        let upper = self.stops.partition_point(|s| s.value <= value);
        if upper == 0 {
            return self.stops[0].color;
        }
        if upper == self.stops.len() {
            return self.stops[upper - 1].color;
        }
        let (lo, hi) = (self.stops[upper - 1], self.stops[upper]);
        let t = (value - lo.value) / (hi.value - lo.value);
        let mut out = [0u8; 4];
        for (k, channel) in out.iter_mut().enumerate() {
            let (a, b) = (lo.color[k] as f64, hi.color[k] as f64);
            *channel = (a + (b - a) * t).round() as u8;
        }
        out
    }
}

/// Colourise a band into four RGBA bands. Nodata cells become fully
/// transparent black.
///
/// # Errors
///
/// `Canceled` between tiles.
pub fn color_ramp(
    grid: &RasterGrid,
    band: usize,
    ramp: &ColorRamp,
    cancel: &CancellationToken,
) -> Result<RasterGrid> {
    let info = grid.band(band)?.clone();
    let layout = grid.layout();
    let staged = StagedGrid::new(grid.store().clone(), layout);

    layout.tiles().into_par_iter().try_for_each(|tile| {
        check_canceled(cancel)?;
        let source = grid.read_tile(band, tile)?;
        let mut channels = vec![Vec::with_capacity(source.len()); 4];
        for v in source {
            let rgba = if info.is_nodata(v) {
                [0; 4]
            } else {
                ramp.color_at(v)
            };
            for (k, channel) in channels.iter_mut().enumerate() {
                channel.push(rgba[k] as f64);
            }
        }
        for (k, channel) in channels.iter().enumerate() {
            staged.write_tile(k as u32, tile, channel)?;
        }
        Ok::<(), EngineError>(())
    })?;

    let bands = ["red", "green", "blue", "alpha"]
        .into_iter()
        .map(|name| BandInfo::continuous(name, None))
        .collect();
    let out = staged.commit(*grid.transform(), grid.crs().clone(), bands)?;
    debug!(grid = grid.id(), rgba = out.id(), stops = ramp.stops().len(), "Applied colour ramp");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::geometry::{Coord, Polygon, Shape};
    use crate::raster::{
        sample, AffineTransform, BandData, ChunkStore, MemoryChunkStore, RasterImport, Sample,
    };
    use std::sync::Arc;

    fn grid_from(store: Arc<MemoryChunkStore>, cells: Vec<f64>, width: usize, tile_size: usize) -> RasterGrid {
        let height = cells.len() / width;
        RasterGrid::import(
            store,
            RasterImport {
                width,
                height,
                transform: AffineTransform::north_up(0.0, height as f64, 1.0, 1.0),
                crs: CrsId::web_mercator(),
                bands: vec![BandData {
                    info: BandInfo::continuous("elevation", None),
                    cells,
                }],
            },
            tile_size,
        )
        .unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::new(Shape::Polygon(Polygon::rect(x0, y0, x1, y1)), CrsId::web_mercator())
    }

    // =========================================================================
    // Clip
    // =========================================================================

    #[test]
    fn test_clip_drops_tiles_outside_mask() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, (0..64).map(|i| i as f64).collect(), 8, 4);
        // Covers cells with centres x in {0.5, 1.5}, y in {6.5, 7.5}: top-left tile only
        let out = clip_to_mask(&grid, &rect(0.0, 6.0, 2.0, 8.0), &CancellationToken::new()).unwrap();
        assert_eq!((out.width(), out.height()), (4, 4));
        assert_eq!(out.layout().tile_count(), 1);
        assert_eq!(
            sample(&out, Coord { x: 1.5, y: 7.5 }, 0).unwrap(),
            Sample::Value(1.0)
        );
        assert_eq!(sample(&out, Coord { x: 3.5, y: 7.5 }, 0).unwrap(), Sample::NoData);
        assert_eq!(sample(&out, Coord { x: 5.5, y: 7.5 }, 0).unwrap(), Sample::NoData);
    }

    #[test]
    fn test_clip_keeps_tile_aligned_extent() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, (0..64).map(|i| i as f64).collect(), 8, 4);
        // Lower-right tile only
        let out = clip_to_mask(&grid, &rect(6.0, 0.0, 8.0, 2.0), &CancellationToken::new()).unwrap();
        assert_eq!(out.extent(), BoundingBox::new(4.0, 0.0, 8.0, 4.0));
        assert_eq!(sample(&out, Coord { x: 7.5, y: 0.5 }, 0).unwrap(), Sample::Value(63.0));
    }

    #[test]
    fn test_clip_mask_missing_grid_is_empty() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, vec![1.0; 16], 4, 2);
        let out = clip_to_mask(&grid, &rect(10.0, 10.0, 11.0, 11.0), &CancellationToken::new()).unwrap();
        assert_eq!((out.width(), out.height()), (0, 0));
        assert_eq!(sample(&out, Coord { x: 0.5, y: 3.5 }, 0).unwrap(), Sample::NoData);
    }

    #[test]
    fn test_clip_rejects_line_mask() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, vec![1.0; 16], 4, 2);
        let line = Geometry::new(
            Shape::LineString(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }]),
            CrsId::web_mercator(),
        );
        assert!(matches!(
            clip_to_mask(&grid, &line, &CancellationToken::new()),
            Err(EngineError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_clip_canceled_leaves_no_chunks() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store.clone(), vec![1.0; 16], 4, 2);
        let before = store.chunk_count();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(clip_to_mask(&grid, &rect(0.0, 0.0, 4.0, 4.0), &cancel)
            .unwrap_err()
            .is_canceled());
        assert_eq!(store.chunk_count(), before);
    }

    // =========================================================================
    // Hillshade
    // =========================================================================

    #[test]
    fn test_flat_surface_shade() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, vec![100.0; 36], 6, 4);
        let out = hillshade(&grid, 0, HillshadeParams::default(), &CancellationToken::new()).unwrap();
        let expected = 255.0 * 45f64.to_radians().cos();
        for tile in out.layout().tiles() {
            for v in out.read_tile(0, tile).unwrap() {
                assert!((v - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_slope_facing_light_is_brighter() {
        let store = Arc::new(MemoryChunkStore::new());
        // Elevation rises to the east, so slopes face west
        let cells: Vec<f64> = (0..36).map(|i| (i % 6) as f64).collect();
        let grid = grid_from(store, cells, 6, 4);
        let cancel = CancellationToken::new();
        let from_west = HillshadeParams { azimuth: 270.0, ..Default::default() };
        let from_east = HillshadeParams { azimuth: 90.0, ..Default::default() };
        let west = hillshade(&grid, 0, from_west, &cancel).unwrap();
        let east = hillshade(&grid, 0, from_east, &cancel).unwrap();
        let p = Coord { x: 2.5, y: 2.5 };
        let lit = sample(&west, p, 0).unwrap().value().unwrap();
        let dark = sample(&east, p, 0).unwrap().value().unwrap();
        assert!(lit > dark, "lit {lit} dark {dark}");
    }

    // =========================================================================
    // Colour ramp
    // =========================================================================

    #[test]
    fn test_color_at_interpolates_and_clamps() {
        let ramp = ColorRamp::grayscale(0.0, 10.0).unwrap();
        assert_eq!(ramp.color_at(-5.0), [0, 0, 0, 255]);
        assert_eq!(ramp.color_at(5.0), [128, 128, 128, 255]);
        assert_eq!(ramp.color_at(50.0), [255, 255, 255, 255]);
    }

    #[test]
    fn test_color_ramp_bands_and_nodata() {
        let store = Arc::new(MemoryChunkStore::new());
        let grid = grid_from(store, vec![0.0, 10.0, f64::NAN, 5.0], 2, 2);
        let ramp = ColorRamp::grayscale(0.0, 10.0).unwrap();
        let out = color_ramp(&grid, 0, &ramp, &CancellationToken::new()).unwrap();
        assert_eq!(out.band_count(), 4);
        let red = out.read_tile(0, TileIndex::new(0, 0)).unwrap();
        let alpha = out.read_tile(3, TileIndex::new(0, 0)).unwrap();
        assert_eq!(red, vec![0.0, 255.0, 0.0, 128.0]);
        assert_eq!(alpha, vec![255.0, 255.0, 0.0, 255.0]);
    }

    #[test]
    fn test_empty_ramp_rejected() {
        assert!(ColorRamp::new(Vec::new()).is_err());
    }
}
