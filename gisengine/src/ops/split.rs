//! Split polygons and lines with a cutting line.

use geo::BooleanOps;
use rayon::prelude::*;
use serde_json::json;
use tracing::debug;

use super::{prepare, require_same_crs, OpOutput, ResultMetadata};
use crate::error::{EngineError, Result};
use crate::geometry::{
    coords_eq, from_geo_multi_polygon, polygon_area, segment_intersection, to_geo_multi_polygon,
    Coord, Geometry, GeometryType, Polygon, SegmentIntersection, Shape, Tolerance,
};
use crate::validation::Arrangement;

type Segment = (Coord, Coord);

fn segments_of<'a>(paths: impl IntoIterator<Item = &'a Vec<Coord>>) -> Vec<Segment> {
    paths
        .into_iter()
        .flat_map(|p| p.windows(2).map(|w| (w[0], w[1])))
        .collect()
}

/// Planar polygonization: the faces of the polygon boundary noded with the
/// splitter, each clipped back to the polygon so holes survive.
fn split_polygons(polys: &[Polygon], cutter: &[Segment], tol: Tolerance) -> Vec<Polygon> {
    let mut segments = segments_of(polys.iter().flat_map(|p| p.rings()));
    segments.extend_from_slice(cutter);
    let faces = Arrangement::new(&segments, tol).faces();
    let area = to_geo_multi_polygon(polys);
    let mut pieces: Vec<Polygon> = faces
        .par_iter()
        .flat_map_iter(|face| {
            let face = geo::MultiPolygon::new(vec![geo::Polygon::new(
                geo::LineString::new(face.clone()),
                Vec::new(),
            )]);
            from_geo_multi_polygon(&face.intersection(&area))
        })
        .filter(|p| polygon_area(p) > tol.0)
        .collect();
    pieces.sort_by(|a, b| {
        let (ca, cb) = (a.exterior[0], b.exterior[0]);
        ca.x.total_cmp(&cb.x).then(ca.y.total_cmp(&cb.y))
    });
    pieces
}

fn param(a: Coord, b: Coord, p: Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    ((p.x - a.x) * dx + (p.y - a.y) * dy) / (dx * dx + dy * dy).max(f64::MIN_POSITIVE)
}

/// Cut a line wherever it meets the cutter.
fn split_line(line: &[Coord], cutter: &[Segment], tol: Tolerance) -> Vec<Vec<Coord>> {
    let Some(&start) = line.first() else {
        return Vec::new();
    };
    let mut pieces = Vec::new();
    let mut current = vec![start];
    for w in line.windows(2) {
        let (a, b) = (w[0], w[1]);
        let mut cuts: Vec<(f64, Coord)> = cutter
            .iter()
            .flat_map(|&(c, d)| match segment_intersection(a, b, c, d, tol) {
                SegmentIntersection::None => Vec::new(),
                SegmentIntersection::Point(p) => vec![p],
                SegmentIntersection::Overlap(p, q) => vec![p, q],
            })
            .map(|p| (param(a, b, p), p))
            .collect();
        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));

        for (_, p) in cuts {
            let at_last = current.last().is_some_and(|last| coords_eq(*last, p, tol));
            if !at_last {
                current.push(p);
            }
            if current.len() > 1 {
                pieces.push(std::mem::replace(&mut current, vec![p]));
            }
        }
        if current.last().is_some_and(|last| !coords_eq(*last, b, tol)) {
            current.push(b);
        }
    }
    if current.len() > 1 {
        pieces.push(current);
    }
    pieces
}

/// Split a polygon or line with a splitter line.
///
/// Polygons are polygonized along the splitter; a splitter that does not
/// cross the polygon leaves it whole. Lines are cut at every crossing. The
/// result is always a multi geometry of the input dimension.
///
/// # Errors
///
/// `DimensionMismatch` when the splitter is not a line, the input is a
/// point, or the CRSs differ.
pub fn split(geometry: &Geometry, splitter: &Geometry, tol: Tolerance) -> Result<OpOutput<Geometry>> {
    require_same_crs([geometry, splitter].into_iter())?;
    if splitter.shape.dimension() != 1 {
        return Err(EngineError::DimensionMismatch(format!(
            "splitter must be a line, got {}",
            splitter.geometry_type()
        )));
    }
    if geometry.shape.dimension() == 0 {
        return Err(EngineError::DimensionMismatch(
            "points cannot be split".to_string(),
        ));
    }
    let metadata = ResultMetadata::new(
        "split",
        geometry.crs.clone(),
        json!({ "splitter_type": splitter.geometry_type().geojson_name() }),
    );
    let mut warnings = Vec::new();
    let input = prepare(geometry, 0, tol, &mut warnings);
    let splitter = prepare(splitter, 1, tol, &mut warnings);
    let cutter_lines = splitter.shape.lines();
    let cutter = segments_of(&cutter_lines);

    let shape = if input.shape.dimension() == 2 {
        Shape::MultiPolygon(split_polygons(&input.shape.polygons(), &cutter, tol))
    } else {
        Shape::MultiLineString(
            input
                .shape
                .lines()
                .iter()
                .flat_map(|l| split_line(l, &cutter, tol))
                .collect(),
        )
    };
    let shape = if shape.is_empty() {
        Shape::empty(GeometryType::multi_for_dimension(input.shape.dimension()))
    } else {
        shape
    };
    debug!(
        kind = %input.geometry_type(),
        pieces = match &shape {
            Shape::MultiPolygon(p) => p.len(),
            Shape::MultiLineString(l) => l.len(),
            _ => 0,
        },
        "Split geometry"
    );
    Ok(OpOutput::new(input.with_shape(shape), metadata).with_warnings(warnings))
}
