//! Tiled raster grids.
//!
//! A [`RasterGrid`] is metadata (size, affine transform, CRS, band
//! descriptions) plus a handle to the [`ChunkStore`] holding its tiles.
//! Tiles are fixed-size squares in row-major tile order; edge tiles are
//! truncated to the grid. A tile that is absent from the store reads as
//! all nodata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{ChunkKey, ChunkStore, StoreError};
use crate::crs::CrsId;
use crate::error::{EngineError, Result};
use crate::geometry::{BoundingBox, Coord};

/// Default tile edge length in cells.
pub const DEFAULT_TILE_SIZE: usize = 256;

/// Nodata sentinel used for derived bands when the source band has none.
pub const DEFAULT_NODATA: f64 = -9999.0;

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(1);

fn next_grid_id() -> u64 {
    NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed)
}

/// Return `Canceled` if the token has fired.
pub(crate) fn check_canceled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Canceled)
    } else {
        Ok(())
    }
}

// =============================================================================
// Affine transform
// =============================================================================

/// Cell-to-CRS affine transform, in GDAL geotransform order.
///
/// `x = origin_x + col * pixel_width + row * row_rotation`
/// `y = origin_y + col * column_rotation + row * pixel_height`
///
/// Cell `(col, row)` covers `[col, col + 1) x [row, row + 1)` in cell space,
/// so its centre is at `(col + 0.5, row + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_height: f64,
}

impl AffineTransform {
    /// North-up transform with the top-left corner at `(origin_x, origin_y)`.
    pub fn north_up(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width: cell_width,
            row_rotation: 0.0,
            origin_y,
            column_rotation: 0.0,
            pixel_height: -cell_height,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.row_rotation * self.column_rotation
    }

    /// Map cell-space coordinates to the CRS.
    pub fn apply(&self, col: f64, row: f64) -> Coord {
        Coord {
            x: self.origin_x + col * self.pixel_width + row * self.row_rotation,
            y: self.origin_y + col * self.column_rotation + row * self.pixel_height,
        }
    }

    /// CRS position of a cell centre.
    pub fn cell_center(&self, col: usize, row: usize) -> Coord {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Inverse transform (CRS to cell space).
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the transform is singular or not finite.
    pub fn invert(&self) -> Result<AffineTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "affine transform is not invertible (determinant {det})"
            )));
        }
        let pixel_width = self.pixel_height / det;
        let row_rotation = -self.row_rotation / det;
        let column_rotation = -self.column_rotation / det;
        let pixel_height = self.pixel_width / det;
        Ok(AffineTransform {
            origin_x: -(pixel_width * self.origin_x + row_rotation * self.origin_y),
            pixel_width,
            row_rotation,
            origin_y: -(column_rotation * self.origin_x + pixel_height * self.origin_y),
            column_rotation,
            pixel_height,
        })
    }

    /// Same transform with its origin moved to cell `(col, row)`.
    pub fn shifted(&self, col: usize, row: usize) -> AffineTransform {
        let origin = self.apply(col as f64, row as f64);
        AffineTransform {
            origin_x: origin.x,
            origin_y: origin.y,
            ..*self
        }
    }

    /// Ground size of one cell along columns and rows.
    pub fn cell_size(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.column_rotation),
            self.row_rotation.hypot(self.pixel_height),
        )
    }
}

// =============================================================================
// Bands and tile layout
// =============================================================================

/// How a band's values may be interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandKind {
    /// Class codes; resampled with nearest neighbour
    Categorical,
    /// Measurements; resampled bilinearly
    #[default]
    Continuous,
}

/// Description of one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,
    pub kind: BandKind,
    /// Sentinel marking missing cells
    pub nodata: Option<f64>,
}

impl BandInfo {
    pub fn continuous(name: impl Into<String>, nodata: Option<f64>) -> Self {
        Self {
            name: name.into(),
            kind: BandKind::Continuous,
            nodata,
        }
    }

    pub fn categorical(name: impl Into<String>, nodata: Option<f64>) -> Self {
        Self {
            name: name.into(),
            kind: BandKind::Categorical,
            nodata,
        }
    }

    /// Nodata test. Non-finite values are always treated as missing.
    pub fn is_nodata(&self, value: f64) -> bool {
        !value.is_finite() || self.nodata.is_some_and(|n| value == n)
    }

    /// Value written into cells that have no data.
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(f64::NAN)
    }
}

/// Position of a tile in the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub row: u32,
    pub col: u32,
}

impl TileIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Cell range covered by one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileExtent {
    pub col0: usize,
    pub row0: usize,
    pub width: usize,
    pub height: usize,
}

impl TileExtent {
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }
}

/// Grid dimensions and tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub width: usize,
    pub height: usize,
    pub tile_size: usize,
}

impl TileLayout {
    /// # Errors
    ///
    /// `InvalidInput` for a zero tile size.
    pub fn new(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(EngineError::InvalidInput("tile size must be positive".into()));
        }
        Ok(Self {
            width,
            height,
            tile_size,
        })
    }

    pub fn tile_cols(&self) -> usize {
        self.width.div_ceil(self.tile_size)
    }

    pub fn tile_rows(&self) -> usize {
        self.height.div_ceil(self.tile_size)
    }

    pub fn tile_count(&self) -> usize {
        self.tile_cols() * self.tile_rows()
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> Vec<TileIndex> {
        let cols = self.tile_cols() as u32;
        (0..self.tile_rows() as u32)
            .flat_map(|row| (0..cols).map(move |col| TileIndex::new(row, col)))
            .collect()
    }

    pub fn extent(&self, tile: TileIndex) -> TileExtent {
        let col0 = tile.col as usize * self.tile_size;
        let row0 = tile.row as usize * self.tile_size;
        TileExtent {
            col0,
            row0,
            width: self.tile_size.min(self.width.saturating_sub(col0)),
            height: self.tile_size.min(self.height.saturating_sub(row0)),
        }
    }

    pub fn tile_containing(&self, col: usize, row: usize) -> TileIndex {
        TileIndex::new(
            (row / self.tile_size) as u32,
            (col / self.tile_size) as u32,
        )
    }

    /// Tiles touching the inclusive cell range.
    pub fn tiles_covering(&self, col0: usize, row0: usize, col1: usize, row1: usize) -> Vec<TileIndex> {
        let first = self.tile_containing(col0, row0);
        let last = self.tile_containing(col1, row1);
        (first.row..=last.row)
            .flat_map(|row| (first.col..=last.col).map(move |col| TileIndex::new(row, col)))
            .collect()
    }
}

// =============================================================================
// Tile encoding
// =============================================================================

pub(crate) fn encode_tile(cells: &[f64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(cells.len() * 8);
    for &v in cells {
        buf.put_f64_le(v);
    }
    buf.freeze()
}

pub(crate) fn decode_tile(key: &ChunkKey, data: &[u8], expected: usize) -> Result<Vec<f64>> {
    if data.len() != expected * 8 {
        return Err(StoreError::Corrupt {
            key: *key,
            reason: format!("expected {} bytes, found {}", expected * 8, data.len()),
        }
        .into());
    }
    Ok(data
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

// =============================================================================
// Grid
// =============================================================================

/// A raster grid: metadata plus tiles held in a chunk store.
///
/// # Thread Safety
///
/// - Cloning shares the store handle; tiles are never mutated after the
///   grid is published
/// - Tile reads from many rayon workers are safe, every op that produces
///   a new grid writes under a fresh grid id
#[derive(Clone)]
pub struct RasterGrid {
    id: u64,
    layout: TileLayout,
    transform: AffineTransform,
    inverse: AffineTransform,
    crs: CrsId,
    bands: Vec<BandInfo>,
    content_hash: String,
    store: Arc<dyn ChunkStore>,
}

impl fmt::Debug for RasterGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterGrid")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("transform", &self.transform)
            .field("crs", &self.crs)
            .field("bands", &self.bands)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// One band of caller-decoded cells, row-major.
#[derive(Debug, Clone)]
pub struct BandData {
    pub info: BandInfo,
    pub cells: Vec<f64>,
}

/// Decoded raster handed to [`RasterGrid::import`].
#[derive(Debug, Clone)]
pub struct RasterImport {
    pub width: usize,
    pub height: usize,
    pub transform: AffineTransform,
    pub crs: CrsId,
    pub bands: Vec<BandData>,
}

impl RasterGrid {
    /// Tile caller-decoded bands into `store`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a singular transform, no bands, or a band whose
    /// cell count differs from `width * height`.
    pub fn import(store: Arc<dyn ChunkStore>, raster: RasterImport, tile_size: usize) -> Result<Self> {
        let layout = TileLayout::new(raster.width, raster.height, tile_size)?;
        raster.transform.invert()?;
        if raster.bands.is_empty() {
            return Err(EngineError::InvalidInput("raster has no bands".into()));
        }
        let expected = raster.width * raster.height;
        for (i, band) in raster.bands.iter().enumerate() {
            if band.cells.len() != expected {
                return Err(EngineError::InvalidInput(format!(
                    "band {i} has {} cells, expected {expected}",
                    band.cells.len()
                )));
            }
        }

        let staged = StagedGrid::new(store, layout);
        let jobs: Vec<(u32, TileIndex)> = (0..raster.bands.len() as u32)
            .flat_map(|b| layout.tiles().into_iter().map(move |t| (b, t)))
            .collect();
        jobs.par_iter().try_for_each(|&(band, tile)| {
            let ext = layout.extent(tile);
            let source = &raster.bands[band as usize].cells;
            let mut cells = Vec::with_capacity(ext.cell_count());
            for row in ext.row0..ext.row0 + ext.height {
                let start = row * raster.width + ext.col0;
                cells.extend_from_slice(&source[start..start + ext.width]);
            }
            staged.write_tile(band, tile, &cells)
        })?;

        let bands = raster.bands.into_iter().map(|b| b.info).collect();
        let grid = staged.commit(raster.transform, raster.crs, bands)?;
        info!(
            grid = grid.id,
            width = grid.width(),
            height = grid.height(),
            bands = grid.band_count(),
            tiles = grid.layout.tile_count(),
            "Imported raster"
        );
        Ok(grid)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> usize {
        self.layout.width
    }

    pub fn height(&self) -> usize {
        self.layout.height
    }

    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    pub fn crs(&self) -> &CrsId {
        &self.crs
    }

    pub fn bands(&self) -> &[BandInfo] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// SHA-256 of the grid header and every tile, hex encoded.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Band description, checking the index.
    pub fn band(&self, band: usize) -> Result<&BandInfo> {
        self.bands.get(band).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "band {band} out of range (grid has {})",
                self.bands.len()
            ))
        })
    }

    /// Continuous cell-space position of a CRS coordinate.
    pub fn crs_to_cell(&self, c: Coord) -> (f64, f64) {
        let cell = self.inverse.apply(c.x, c.y);
        (cell.x, cell.y)
    }

    /// Bounding box of the grid in its CRS.
    pub fn extent(&self) -> BoundingBox {
        let (w, h) = (self.width() as f64, self.height() as f64);
        let mut bbox = BoundingBox::from_coord(self.transform.apply(0.0, 0.0));
        for (col, row) in [(w, 0.0), (0.0, h), (w, h)] {
            bbox.expand(self.transform.apply(col, row));
        }
        bbox
    }

    pub(crate) fn chunk_key(&self, band: usize, tile: TileIndex) -> ChunkKey {
        ChunkKey::new(self.id, band as u32, tile.row, tile.col)
    }

    /// Whether a tile is stored (absent tiles read as nodata).
    pub fn has_tile(&self, band: usize, tile: TileIndex) -> Result<bool> {
        Ok(self.store.get(&self.chunk_key(band, tile))?.is_some())
    }

    /// Cells of one tile, row-major. Absent tiles come back filled with
    /// the band's nodata value.
    pub fn read_tile(&self, band: usize, tile: TileIndex) -> Result<Vec<f64>> {
        let info = self.band(band)?;
        let ext = self.layout.extent(tile);
        let key = self.chunk_key(band, tile);
        match self.store.get(&key)? {
            Some(data) => decode_tile(&key, &data, ext.cell_count()),
            None => Ok(vec![info.fill_value(); ext.cell_count()]),
        }
    }

    /// Delete every chunk belonging to this grid from its store.
    pub fn release(&self) -> Result<usize> {
        let mut removed = 0;
        for band in 0..self.bands.len() {
            for tile in self.layout.tiles() {
                if self.store.delete(&self.chunk_key(band, tile))? {
                    removed += 1;
                }
            }
        }
        debug!(grid = self.id, chunks = removed, "Released raster chunks");
        Ok(removed)
    }
}

// =============================================================================
// Staged output
// =============================================================================

/// Output grid under construction.
///
/// Tiles are written under a fresh grid id as they are produced. Nothing
/// references them until [`StagedGrid::commit`]; dropping an uncommitted
/// stage deletes every chunk it wrote, so a failed or cancelled operation
/// leaves the store as it found it.
pub(crate) struct StagedGrid {
    store: Arc<dyn ChunkStore>,
    id: u64,
    layout: TileLayout,
    written: Mutex<BTreeMap<ChunkKey, [u8; 32]>>,
    committed: bool,
}

impl StagedGrid {
    pub(crate) fn new(store: Arc<dyn ChunkStore>, layout: TileLayout) -> Self {
        Self {
            store,
            id: next_grid_id(),
            layout,
            written: Mutex::new(BTreeMap::new()),
            committed: false,
        }
    }

    pub(crate) fn write_tile(&self, band: u32, tile: TileIndex, cells: &[f64]) -> Result<()> {
        let key = ChunkKey::new(self.id, band, tile.row, tile.col);
        let data = encode_tile(cells);
        let digest: [u8; 32] = Sha256::digest(&data).into();
        self.store.put(key, data)?;
        self.written.lock().insert(key, digest);
        Ok(())
    }

    /// Publish the staged tiles as a grid.
    pub(crate) fn commit(
        mut self,
        transform: AffineTransform,
        crs: CrsId,
        bands: Vec<BandInfo>,
    ) -> Result<RasterGrid> {
        let inverse = transform.invert()?;
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}x{}/{}|{:?}|{}|",
            self.layout.width, self.layout.height, self.layout.tile_size, transform, crs
        ));
        for band in &bands {
            hasher.update(format!("{:?}:{:?};", band.kind, band.nodata.map(f64::to_bits)));
        }
        for (key, digest) in self.written.lock().iter() {
            hasher.update(key.band.to_le_bytes());
            hasher.update(key.tile_row.to_le_bytes());
            hasher.update(key.tile_col.to_le_bytes());
            hasher.update(digest);
        }
        let content_hash = format!("{:x}", hasher.finalize());
        self.committed = true;
        Ok(RasterGrid {
            id: self.id,
            layout: self.layout,
            transform,
            inverse,
            crs,
            bands,
            content_hash,
            store: Arc::clone(&self.store),
        })
    }
}

impl Drop for StagedGrid {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let written = std::mem::take(&mut *self.written.lock());
        for key in written.keys() {
            if let Err(e) = self.store.delete(key) {
                warn!(chunk = %key, error = %e, "Failed to release staged chunk");
            }
        }
        debug!(grid = self.id, chunks = written.len(), "Discarded staged raster output");
    }
}
