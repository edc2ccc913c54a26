//! Windowed reads and raster reprojection.
//!
//! Both work under a tile residency budget: a single-pass read that would
//! need more source tiles in memory than the budget allows fails with
//! `ResourceExhausted` instead of growing without bound.

use std::collections::HashMap;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::grid::{
    check_canceled, AffineTransform, BandInfo, BandKind, RasterGrid, StagedGrid, TileIndex,
    TileLayout, DEFAULT_NODATA,
};
use crate::crs::{CrsId, CrsRegistry, CrsTransformer};
use crate::error::{EngineError, Result};
use crate::geometry::BoundingBox;

/// Border samples per grid edge when estimating the reprojected extent.
const EDGE_SAMPLES: usize = 32;

/// Number of tiles of `tile_size` cells that fit in `budget_bytes`.
pub fn tiles_for_budget(budget_bytes: u64, tile_size: usize) -> usize {
    let tile_bytes = (tile_size * tile_size * std::mem::size_of::<f64>()).max(1) as u64;
    ((budget_bytes / tile_bytes) as usize).max(1)
}

/// Source tiles resident for one pass.
pub(crate) struct TileWindow<'a> {
    grid: &'a RasterGrid,
    layout: TileLayout,
    tiles: HashMap<TileIndex, Vec<f64>>,
    fill: f64,
}

impl<'a> TileWindow<'a> {
    /// Load every tile touching the inclusive cell range.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when more than `budget` tiles are needed.
    pub(crate) fn load(
        grid: &'a RasterGrid,
        band: usize,
        (col0, row0): (usize, usize),
        (col1, row1): (usize, usize),
        budget: usize,
    ) -> Result<Self> {
        let layout = grid.layout();
        let needed = layout.tiles_covering(col0, row0, col1, row1);
        if needed.len() > budget {
            return Err(EngineError::ResourceExhausted {
                required: needed.len(),
                budget,
            });
        }
        let mut tiles = HashMap::with_capacity(needed.len());
        for tile in needed {
            tiles.insert(tile, grid.read_tile(band, tile)?);
        }
        Ok(Self {
            grid,
            layout,
            tiles,
            fill: grid.band(band)?.fill_value(),
        })
    }

    /// Cell value, clamping the position to the grid edge.
    pub(crate) fn get(&self, col: isize, row: isize) -> f64 {
        let col = col.clamp(0, self.grid.width() as isize - 1) as usize;
        let row = row.clamp(0, self.grid.height() as isize - 1) as usize;
        let tile = self.layout.tile_containing(col, row);
        let ext = self.layout.extent(tile);
        self.tiles
            .get(&tile)
            .map_or(self.fill, |cells| cells[(row - ext.row0) * ext.width + (col - ext.col0)])
    }
}

// =============================================================================
// Window reads
// =============================================================================

/// Rectangular block of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWindow {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

/// Read a block of cells in one pass, row-major.
///
/// # Errors
///
/// `InvalidInput` for an empty window; `OutOfBounds` (at the window's far
/// corner) for one reaching past the grid; `ResourceExhausted` when the
/// window spans more than `budget_tiles`.
pub fn read_window(
    grid: &RasterGrid,
    band: usize,
    window: CellWindow,
    budget_tiles: usize,
) -> Result<Vec<f64>> {
    if window.width == 0 || window.height == 0 {
        return Err(EngineError::InvalidInput(format!("empty window {window:?}")));
    }
    if window.col + window.width > grid.width() || window.row + window.height > grid.height() {
        let corner = grid.transform().apply(
            (window.col + window.width) as f64,
            (window.row + window.height) as f64,
        );
        return Err(EngineError::OutOfBounds {
            x: corner.x,
            y: corner.y,
        });
    }
    let last = (
        window.col + window.width - 1,
        window.row + window.height - 1,
    );
    let tiles = TileWindow::load(grid, band, (window.col, window.row), last, budget_tiles)?;
    let mut cells = Vec::with_capacity(window.width * window.height);
    for row in window.row..window.row + window.height {
        for col in window.col..window.col + window.width {
            cells.push(tiles.get(col as isize, row as isize));
        }
    }
    Ok(cells)
}

// =============================================================================
// Reprojection
// =============================================================================

/// Cell interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    Bilinear,
}

impl Resampling {
    /// Nearest for class codes, bilinear for measurements.
    pub fn for_band(kind: BandKind) -> Self {
        match kind {
            BandKind::Categorical => Resampling::Nearest,
            BandKind::Continuous => Resampling::Bilinear,
        }
    }
}

/// Options for [`reproject_raster`].
#[derive(Debug, Clone, Copy)]
pub struct ReprojectOptions {
    /// Source tiles one output tile may keep resident
    pub budget_tiles: usize,
    /// Override the per-band default resampling
    pub resampling: Option<Resampling>,
    /// Output tile size, defaults to the source's
    pub tile_size: Option<usize>,
}

impl ReprojectOptions {
    pub fn new(budget_tiles: usize) -> Self {
        Self {
            budget_tiles,
            resampling: None,
            tile_size: None,
        }
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = Some(resampling);
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = Some(tile_size);
        self
    }
}

fn resample(window: &TileWindow<'_>, info: &BandInfo, method: Resampling, col: f64, row: f64, fill: f64) -> f64 {
    let nearest = || {
        let v = window.get(col.floor() as isize, row.floor() as isize);
        if info.is_nodata(v) {
            fill
        } else {
            v
        }
    };
    match method {
        Resampling::Nearest => nearest(),
        Resampling::Bilinear => {
            let (x, y) = (col - 0.5, row - 0.5);
            let (c0, r0) = (x.floor(), y.floor());
            let (fx, fy) = (x - c0, y - r0);
            let (c0, r0) = (c0 as isize, r0 as isize);
            let q = [
                window.get(c0, r0),
                window.get(c0 + 1, r0),
                window.get(c0, r0 + 1),
                window.get(c0 + 1, r0 + 1),
            ];
            if q.iter().any(|&v| info.is_nodata(v)) {
                return nearest();
            }
            let top = q[0] * (1.0 - fx) + q[1] * fx;
            let bottom = q[2] * (1.0 - fx) + q[3] * fx;
            top * (1.0 - fy) + bottom * fy
        }
    }
}

/// Target extent and resolution: the bounding box of the transformed grid
/// border, with square cells keeping roughly the source cell count.
fn target_grid(grid: &RasterGrid, forward: &CrsTransformer) -> Result<(AffineTransform, usize, usize)> {
    let (w, h) = (grid.width() as f64, grid.height() as f64);
    let mut bbox: Option<BoundingBox> = None;
    for i in 0..=EDGE_SAMPLES {
        let t = i as f64 / EDGE_SAMPLES as f64;
        for (col, row) in [(t * w, 0.0), (t * w, h), (0.0, t * h), (w, t * h)] {
            if let Ok(c) = forward.transform(grid.transform().apply(col, row)) {
                match bbox.as_mut() {
                    Some(b) => b.expand(c),
                    None => bbox = Some(BoundingBox::from_coord(c)),
                }
            }
        }
    }
    let bbox = bbox.ok_or_else(|| {
        EngineError::InvalidInput(format!(
            "raster extent has no image in {}",
            forward.target()
        ))
    })?;
    let (bw, bh) = (bbox.max_x - bbox.min_x, bbox.max_y - bbox.min_y);
    let cell = (bw * bh / (w * h)).sqrt();
    if !(cell.is_finite() && cell > 0.0) {
        return Err(EngineError::InvalidInput(
            "reprojected raster extent is degenerate".into(),
        ));
    }
    let width = ((bw / cell).ceil() as usize).max(1);
    let height = ((bh / cell).ceil() as usize).max(1);
    Ok((
        AffineTransform::north_up(bbox.min_x, bbox.max_y, cell, cell),
        width,
        height,
    ))
}

/// Reproject a raster into `target`.
///
/// Each output tile maps its cell centres back into the source, loads the
/// source tiles under them (at most `budget_tiles`), and resamples. Output
/// tiles are written to the source's store and published only when every
/// tile succeeded.
///
/// # Errors
///
/// `UnsupportedCrs` for unknown identifiers, `ResourceExhausted` when an
/// output tile needs too many source tiles, `Canceled` between tiles.
pub fn reproject_raster(
    registry: &CrsRegistry,
    grid: &RasterGrid,
    target: &CrsId,
    options: ReprojectOptions,
    cancel: &CancellationToken,
) -> Result<RasterGrid> {
    if grid.crs() == target {
        return Ok(grid.clone());
    }
    let forward = CrsTransformer::new(registry, grid.crs(), target)?;
    // Resolve the reverse direction once up front so workers cannot fail on it
    CrsTransformer::new(registry, target, grid.crs())?;
    let (transform, width, height) = target_grid(grid, &forward)?;
    let layout = TileLayout::new(
        width,
        height,
        options.tile_size.unwrap_or(grid.layout().tile_size),
    )?;
    let bands: Vec<BandInfo> = grid
        .bands()
        .iter()
        .map(|b| BandInfo {
            nodata: Some(b.nodata.unwrap_or(DEFAULT_NODATA)),
            ..b.clone()
        })
        .collect();
    let budget = options.budget_tiles.max(1);
    let staged = StagedGrid::new(grid.store().clone(), layout);

    layout.tiles().into_par_iter().try_for_each_init(
        || CrsTransformer::new(registry, target, grid.crs()),
        |inverse, tile| {
            check_canceled(cancel)?;
            let inverse = inverse
                .as_ref()
                .map_err(|_| EngineError::UnsupportedCrs(grid.crs().to_string()))?;
            let ext = layout.extent(tile);
            let positions: Vec<Option<(f64, f64)>> = (ext.row0..ext.row0 + ext.height)
                .flat_map(|row| (ext.col0..ext.col0 + ext.width).map(move |col| (col, row)))
                .map(|(col, row)| {
                    let source = inverse.transform(transform.cell_center(col, row)).ok()?;
                    let (c, r) = grid.crs_to_cell(source);
                    let inside = c >= 0.0
                        && r >= 0.0
                        && c < grid.width() as f64
                        && r < grid.height() as f64;
                    inside.then_some((c, r))
                })
                .collect();

            let mut window: Option<(f64, f64, f64, f64)> = None;
            for &(c, r) in positions.iter().flatten() {
                window = Some(match window {
                    None => (c, r, c, r),
                    Some((c0, r0, c1, r1)) => (c0.min(c), r0.min(r), c1.max(c), r1.max(r)),
                });
            }
            let Some((c0, r0, c1, r1)) = window else {
                // Entirely outside the source: leave the tile absent (nodata)
                return Ok(());
            };
            let max_col = grid.width() - 1;
            let max_row = grid.height() - 1;
            let lo = (
                ((c0 - 0.5).floor().max(0.0) as usize).min(max_col),
                ((r0 - 0.5).floor().max(0.0) as usize).min(max_row),
            );
            let hi = (
                (((c1 + 0.5).floor()) as usize).min(max_col),
                (((r1 + 0.5).floor()) as usize).min(max_row),
            );

            for (band, info) in grid.bands().iter().enumerate() {
                let method = options
                    .resampling
                    .unwrap_or_else(|| Resampling::for_band(info.kind));
                let source = TileWindow::load(grid, band, lo, hi, budget)?;
                let fill = bands[band].fill_value();
                let cells: Vec<f64> = positions
                    .iter()
                    .map(|p| match p {
                        Some((c, r)) => resample(&source, info, method, *c, *r, fill),
                        None => fill,
                    })
                    .collect();
                staged.write_tile(band as u32, tile, &cells)?;
            }
            Ok::<(), EngineError>(())
        },
    )?;

    let out = staged.commit(transform, target.clone(), bands)?;
    info!(
        source = grid.id(),
        grid = out.id(),
        from = %grid.crs(),
        to = %target,
        width,
        height,
        "Reprojected raster"
    );
    debug!(budget_tiles = budget, tiles = layout.tile_count(), "Reprojection tile plan");
    Ok(out)
}
