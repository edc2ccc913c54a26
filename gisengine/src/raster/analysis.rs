//! Point sampling and band statistics.

use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::grid::{check_canceled, RasterGrid};
use crate::error::{EngineError, Result};
use crate::geometry::Coord;

/// Value of a band at a location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Sample {
    Value(f64),
    NoData,
}

impl Sample {
    pub fn value(self) -> Option<f64> {
        match self {
            Sample::Value(v) => Some(v),
            Sample::NoData => None,
        }
    }
}

/// Read the cell under `point` (in the grid's CRS).
///
/// A point outside the grid extent, on a dropped tile or on a nodata cell
/// all sample as [`Sample::NoData`].
///
/// # Errors
///
/// `InvalidInput` for an unknown band.
pub fn sample(grid: &RasterGrid, point: Coord, band: usize) -> Result<Sample> {
    let info = grid.band(band)?;
    let (col, row) = grid.crs_to_cell(point);
    if !(col >= 0.0 && row >= 0.0 && col < grid.width() as f64 && row < grid.height() as f64) {
        debug!(x = point.x, y = point.y, "Sample outside raster extent");
        return Ok(Sample::NoData);
    }
    let (col, row) = (col as usize, row as usize);
    let layout = grid.layout();
    let tile = layout.tile_containing(col, row);
    let ext = layout.extent(tile);
    let cells = grid.read_tile(band, tile)?;
    let value = cells[(row - ext.row0) * ext.width + (col - ext.col0)];
    Ok(if info.is_nodata(value) {
        Sample::NoData
    } else {
        Sample::Value(value)
    })
}

// =============================================================================
// Exact summation
// =============================================================================

/// Error-free floating point accumulator.
///
/// Keeps the running sum as a list of non-overlapping partials (Shewchuk's
/// algorithm), so the rounded total is the correctly rounded exact sum no
/// matter the order values arrive in or how partial sums are merged.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExactSum {
    partials: Vec<f64>,
}

impl ExactSum {
    pub(crate) fn add(&mut self, value: f64) {
        let mut x = value;
        let mut kept = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        self.partials.truncate(kept);
        self.partials.push(x);
    }

    pub(crate) fn merge(&mut self, other: &ExactSum) {
        for &p in &other.partials {
            self.add(p);
        }
    }

    pub(crate) fn value(&self) -> f64 {
        let p = &self.partials;
        let Some(mut n) = p.len().checked_sub(1) else {
            return 0.0;
        };
        let mut hi = p[n];
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = p[n];
            hi = x + y;
            let yr = hi - x;
            lo = y - yr;
            if lo != 0.0 {
                break;
            }
        }
        // Round half-even correction when the remaining partials push the
        // total across a rounding boundary
        if n > 0 && ((lo < 0.0 && p[n - 1] < 0.0) || (lo > 0.0 && p[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Fixed-bucket histogram definition over `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSpec {
    pub min: f64,
    pub max: f64,
    pub buckets: usize,
}

impl HistogramSpec {
    /// # Errors
    ///
    /// `InvalidInput` unless `min < max`, both finite, and `buckets > 0`.
    pub fn new(min: f64, max: f64, buckets: usize) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && min < max) || buckets == 0 {
            return Err(EngineError::InvalidInput(format!(
                "histogram range [{min}, {max}] with {buckets} buckets"
            )));
        }
        Ok(Self { min, max, buckets })
    }

    /// Bucket for a value; `max` itself falls into the last bucket.
    fn bucket(&self, value: f64) -> Option<usize> {
        if value < self.min || value > self.max {
            return None;
        }
        let position = (value - self.min) / (self.max - self.min) * self.buckets as f64;
        Some((position as usize).min(self.buckets - 1))
    }
}

/// Histogram counts; values outside the range are tallied separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub spec: HistogramSpec,
    pub counts: Vec<u64>,
    pub below: u64,
    pub above: u64,
}

/// Summary of one band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandStatistics {
    pub count: u64,
    pub nodata_count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub mean: Option<f64>,
    /// Population variance
    pub variance: Option<f64>,
    pub histogram: Option<Histogram>,
}

#[derive(Debug, Clone)]
struct Accumulator {
    count: u64,
    nodata: u64,
    min: f64,
    max: f64,
    sum: ExactSum,
    squares: ExactSum,
    counts: Vec<u64>,
    below: u64,
    above: u64,
}

impl Accumulator {
    fn new(histogram: Option<&HistogramSpec>) -> Self {
        Self {
            count: 0,
            nodata: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: ExactSum::default(),
            squares: ExactSum::default(),
            counts: vec![0; histogram.map_or(0, |h| h.buckets)],
            below: 0,
            above: 0,
        }
    }

    fn push(&mut self, value: f64, histogram: Option<&HistogramSpec>) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum.add(value);
        self.squares.add(value * value);
        if let Some(spec) = histogram {
            match spec.bucket(value) {
                Some(i) => self.counts[i] += 1,
                None if value < spec.min => self.below += 1,
                None => self.above += 1,
            }
        }
    }

    fn merge(mut self, other: &Accumulator) -> Self {
        self.count += other.count;
        self.nodata += other.nodata;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum.merge(&other.sum);
        self.squares.merge(&other.squares);
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.below += other.below;
        self.above += other.above;
        self
    }
}

/// Streaming statistics of one band, skipping nodata.
///
/// Tiles are summarised in parallel and merged. Sums are exact, so the
/// result is identical for any tile size or traversal order.
///
/// # Errors
///
/// `Canceled` when the token fires between tiles.
pub fn statistics(
    grid: &RasterGrid,
    band: usize,
    histogram: Option<HistogramSpec>,
    cancel: &CancellationToken,
) -> Result<BandStatistics> {
    let info = grid.band(band)?;
    let spec = histogram.as_ref();
    let layout = grid.layout();
    let partials = layout
        .tiles()
        .into_par_iter()
        .map(|tile| {
            check_canceled(cancel)?;
            let mut acc = Accumulator::new(spec);
            for value in grid.read_tile(band, tile)? {
                if info.is_nodata(value) {
                    acc.nodata += 1;
                } else {
                    acc.push(value, spec);
                }
            }
            Ok(acc)
        })
        .collect::<Result<Vec<_>>>()?;
    let total = partials
        .iter()
        .fold(Accumulator::new(spec), |acc, part| acc.merge(part));

    let sum = total.sum.value();
    let sum_of_squares = total.squares.value();
    let (mean, variance) = if total.count > 0 {
        let n = total.count as f64;
        let mean = sum / n;
        (Some(mean), Some(((sum_of_squares - sum * mean) / n).max(0.0)))
    } else {
        (None, None)
    };
    debug!(
        grid = grid.id(),
        band,
        count = total.count,
        nodata = total.nodata,
        "Computed band statistics"
    );
    Ok(BandStatistics {
        count: total.count,
        nodata_count: total.nodata,
        min: (total.count > 0).then_some(total.min),
        max: (total.count > 0).then_some(total.max),
        sum,
        sum_of_squares,
        mean,
        variance,
        histogram: histogram.map(|spec| Histogram {
            spec,
            counts: total.counts,
            below: total.below,
            above: total.above,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::raster::{AffineTransform, BandData, BandInfo, MemoryChunkStore, RasterImport};
    use std::sync::Arc;

    fn grid(cells: Vec<f64>, width: usize, tile_size: usize) -> RasterGrid {
        let height = cells.len() / width;
        RasterGrid::import(
            Arc::new(MemoryChunkStore::new()),
            RasterImport {
                width,
                height,
                transform: AffineTransform::north_up(0.0, height as f64, 1.0, 1.0),
                crs: CrsId::web_mercator(),
                bands: vec![BandData {
                    info: BandInfo::continuous("v", Some(-1.0)),
                    cells,
                }],
            },
            tile_size,
        )
        .unwrap()
    }

    // =========================================================================
    // Sampling
    // =========================================================================

    #[test]
    fn test_sample_value_and_nodata() {
        let g = grid(vec![1.0, 2.0, -1.0, 4.0], 2, 1);
        // Row 0 is the top row (y in [1, 2])
        assert_eq!(sample(&g, Coord { x: 0.5, y: 1.5 }, 0).unwrap(), Sample::Value(1.0));
        assert_eq!(sample(&g, Coord { x: 1.5, y: 0.5 }, 0).unwrap(), Sample::Value(4.0));
        assert_eq!(sample(&g, Coord { x: 0.5, y: 0.5 }, 0).unwrap(), Sample::NoData);
        assert!(matches!(
            sample(&g, Coord { x: 0.5, y: 0.5 }, 3),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sample_outside_extent_is_nodata() {
        let g = grid(vec![1.0, 2.0, -1.0, 4.0], 2, 1);
        assert_eq!(sample(&g, Coord { x: 2.5, y: 0.5 }, 0).unwrap(), Sample::NoData);
        assert_eq!(sample(&g, Coord { x: -0.5, y: 1.5 }, 0).unwrap(), Sample::NoData);
        assert_eq!(sample(&g, Coord { x: 0.5, y: 9.0 }, 0).unwrap(), Sample::NoData);
    }

    // =========================================================================
    // Exact summation
    // =========================================================================

    #[test]
    fn test_exact_sum_is_order_independent() {
        let values = [1e16, 1.0, -1e16, 1.0, 0.1, 0.2, 0.3];
        let mut forward = ExactSum::default();
        values.iter().for_each(|&v| forward.add(v));
        let mut backward = ExactSum::default();
        values.iter().rev().for_each(|&v| backward.add(v));
        assert_eq!(forward.value(), backward.value());
        assert!((forward.value() - 2.6).abs() < 1e-15);
    }

    #[test]
    fn test_exact_sum_merge() {
        let mut a = ExactSum::default();
        a.add(1e100);
        a.add(1.0);
        let mut b = ExactSum::default();
        b.add(-1e100);
        a.merge(&b);
        assert_eq!(a.value(), 1.0);
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    #[test]
    fn test_statistics_skip_nodata() {
        let g = grid(vec![1.0, 2.0, -1.0, 3.0, f64::NAN, 6.0], 3, 2);
        let spec = HistogramSpec::new(0.0, 4.0, 2).unwrap();
        let stats = statistics(&g, 0, Some(spec), &CancellationToken::new()).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.nodata_count, 2);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(6.0));
        assert_eq!(stats.sum, 12.0);
        assert_eq!(stats.mean, Some(3.0));
        // (1 + 4 + 9 + 36) / 4 - 9
        assert_eq!(stats.variance, Some(3.5));
        let h = stats.histogram.unwrap();
        assert_eq!(h.counts, vec![1, 2]);
        assert_eq!(h.above, 1);
        assert_eq!(h.below, 0);
    }

    #[test]
    fn test_statistics_invariant_to_tile_size() {
        let cells: Vec<f64> = (0..90).map(|i| (i as f64 * 0.37).sin() * 1e6 + 0.1).collect();
        let reference = statistics(&grid(cells.clone(), 9, 9), 0, None, &CancellationToken::new())
            .unwrap();
        for tile_size in [1, 2, 4, 7] {
            let stats = statistics(&grid(cells.clone(), 9, tile_size), 0, None, &CancellationToken::new())
                .unwrap();
            assert_eq!(stats, reference, "tile size {tile_size}");
        }
    }

    #[test]
    fn test_all_nodata_band() {
        let g = grid(vec![-1.0; 4], 2, 2);
        let stats = statistics(&g, 0, None, &CancellationToken::new()).unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.min, None);
    }

    #[test]
    fn test_statistics_canceled() {
        let g = grid(vec![1.0; 16], 4, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            statistics(&g, 0, None, &cancel),
            Err(EngineError::Canceled)
        ));
    }

    #[test]
    fn test_histogram_spec_validation() {
        assert!(HistogramSpec::new(1.0, 1.0, 4).is_err());
        assert!(HistogramSpec::new(0.0, 1.0, 0).is_err());
        assert!(HistogramSpec::new(0.0, f64::INFINITY, 2).is_err());
    }
}
