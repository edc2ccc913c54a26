//! Node-and-rebuild for self-intersecting polygons.
//!
//! Each ring is handled on its own: its segments are split at their mutual
//! intersections, vertices closer than the tolerance are merged, dangling
//! edges are pruned and the bounded faces of the resulting planar graph are
//! traced. Faces whose interior point lies inside the ring (even-odd rule)
//! form the ring's interior. The polygon is the exterior's interior minus
//! the union of the holes' interiors.

use std::collections::{HashMap, HashSet};

use geo::BooleanOps;
use rayon::prelude::*;
use tracing::trace;

use super::ring_segments;
use crate::geometry::{
    coords_eq, from_geo_multi_polygon, interior_point, point_in_ring, segment_intersection,
    signed_area, Coord, Location, Polygon, Ring, SegmentIntersection, Tolerance,
};

/// Index pairs of segments whose bounding boxes overlap.
///
/// Sweeps segments sorted by minimum x, so only pairs that share an x range
/// are compared.
pub(crate) fn candidate_pairs(segments: &[(Coord, Coord)]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..segments.len()).collect();
    let min_x = |i: usize| segments[i].0.x.min(segments[i].1.x);
    order.sort_by(|&a, &b| min_x(a).total_cmp(&min_x(b)));

    let mut pairs = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        let (a1, a2) = segments[i];
        let max_x = a1.x.max(a2.x);
        let (lo_y, hi_y) = (a1.y.min(a2.y), a1.y.max(a2.y));
        for &j in &order[pos + 1..] {
            if min_x(j) > max_x {
                break;
            }
            let (b1, b2) = segments[j];
            if b1.y.max(b2.y) < lo_y || b1.y.min(b2.y) > hi_y {
                continue;
            }
            pairs.push((i.min(j), i.max(j)));
        }
    }
    pairs
}

/// Vertex registry merging coordinates within tolerance.
struct VertexPool {
    coords: Vec<Coord>,
    grid: HashMap<(i64, i64), Vec<usize>>,
    cell: f64,
    tol: Tolerance,
}

impl VertexPool {
    fn new(tol: Tolerance) -> Self {
        Self {
            coords: Vec::new(),
            grid: HashMap::new(),
            cell: tol.0.max(1e-12),
            tol,
        }
    }

    fn key(&self, c: Coord) -> (i64, i64) {
        ((c.x / self.cell).floor() as i64, (c.y / self.cell).floor() as i64)
    }

    fn intern(&mut self, c: Coord) -> usize {
        let (kx, ky) = self.key(c);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(ids) = self.grid.get(&(kx + dx, ky + dy)) {
                    if let Some(&id) = ids.iter().find(|&&id| coords_eq(self.coords[id], c, self.tol)) {
                        return id;
                    }
                }
            }
        }
        let id = self.coords.len();
        self.coords.push(c);
        self.grid.entry((kx, ky)).or_default().push(id);
        id
    }
}

fn param_on(a: Coord, b: Coord, p: Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return 0.0;
    }
    (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0)
}

/// Split every segment at all intersection points and return the noded,
/// deduplicated edge list over interned vertices.
fn node_edges(segments: &[(Coord, Coord)], pool: &mut VertexPool) -> Vec<(usize, usize)> {
    let mut splits: Vec<Vec<(f64, Coord)>> = segments
        .iter()
        .map(|&(a, b)| vec![(0.0, a), (1.0, b)])
        .collect();

    for (i, j) in candidate_pairs(segments) {
        let (a1, a2) = segments[i];
        let (b1, b2) = segments[j];
        let points = match segment_intersection(a1, a2, b1, b2, pool.tol) {
            SegmentIntersection::None => continue,
            SegmentIntersection::Point(p) => vec![p],
            SegmentIntersection::Overlap(p, q) => vec![p, q],
        };
        for p in points {
            splits[i].push((param_on(a1, a2, p), p));
            splits[j].push((param_on(b1, b2, p), p));
        }
    }

    let mut edges = HashSet::new();
    for mut cuts in splits {
        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));
        let ids: Vec<usize> = cuts.iter().map(|&(_, c)| pool.intern(c)).collect();
        for w in ids.windows(2) {
            if w[0] != w[1] {
                edges.insert((w[0].min(w[1]), w[0].max(w[1])));
            }
        }
    }
    let mut edges: Vec<_> = edges.into_iter().collect();
    edges.sort_unstable();
    edges
}

/// Repeatedly drop edges ending in a degree-one vertex.
fn prune_dangles(edges: Vec<(usize, usize)>, vertex_count: usize) -> Vec<(usize, usize)> {
    let mut degree = vec![0usize; vertex_count];
    for &(a, b) in &edges {
        degree[a] += 1;
        degree[b] += 1;
    }
    let mut alive = vec![true; edges.len()];
    loop {
        let mut changed = false;
        for (k, &(a, b)) in edges.iter().enumerate() {
            if alive[k] && (degree[a] < 2 || degree[b] < 2) {
                alive[k] = false;
                degree[a] -= 1;
                degree[b] -= 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    edges
        .into_iter()
        .zip(alive)
        .filter_map(|(e, keep)| keep.then_some(e))
        .collect()
}

/// Trace the bounded faces of a planar graph as counter-clockwise rings.
fn trace_faces(edges: &[(usize, usize)], coords: &[Coord]) -> Vec<Vec<Coord>> {
    // Half-edge 2k runs a -> b, 2k + 1 runs b -> a
    let origin = |he: usize| {
        let (a, b) = edges[he / 2];
        if he % 2 == 0 {
            a
        } else {
            b
        }
    };
    let half_edges = edges.len() * 2;

    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); coords.len()];
    for he in 0..half_edges {
        outgoing[origin(he)].push(he);
    }
    let angle = |he: usize| {
        let from = coords[origin(he)];
        let to = coords[origin(he ^ 1)];
        (to.y - from.y).atan2(to.x - from.x)
    };
    let mut position = vec![0usize; half_edges];
    for list in &mut outgoing {
        list.sort_by(|&a, &b| angle(a).total_cmp(&angle(b)));
        for (k, &he) in list.iter().enumerate() {
            position[he] = k;
        }
    }
    // Next half-edge around the face on the left: at the destination, take
    // the outgoing edge just clockwise of the twin.
    let next = |he: usize| {
        let twin = he ^ 1;
        let list = &outgoing[origin(twin)];
        let k = position[twin];
        list[(k + list.len() - 1) % list.len()]
    };

    let mut visited = vec![false; half_edges];
    let mut faces = Vec::new();
    for start in 0..half_edges {
        if visited[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut he = start;
        let mut steps = 0;
        while !visited[he] && steps <= half_edges {
            visited[he] = true;
            ring.push(coords[origin(he)]);
            he = next(he);
            steps += 1;
        }
        if he != start || ring.len() < 3 {
            continue;
        }
        if signed_area(&ring) > 0.0 {
            ring.push(ring[0]);
            faces.push(ring);
        }
    }
    faces
}

/// Planar arrangement of a set of segments: every segment split at its
/// intersections with the others, vertices merged within tolerance and
/// duplicate edges removed.
pub(crate) struct Arrangement {
    pub vertices: Vec<Coord>,
    pub edges: Vec<(usize, usize)>,
}

impl Arrangement {
    pub fn new(segments: &[(Coord, Coord)], tol: Tolerance) -> Self {
        let mut pool = VertexPool::new(tol);
        let edges = node_edges(segments, &mut pool);
        Self {
            vertices: pool.coords,
            edges,
        }
    }

    pub fn segment(&self, edge: (usize, usize)) -> (Coord, Coord) {
        (self.vertices[edge.0], self.vertices[edge.1])
    }

    /// Bounded faces, counter-clockwise and closed.
    pub fn faces(&self) -> Vec<Ring> {
        let edges = prune_dangles(self.edges.clone(), self.vertices.len());
        trace_faces(&edges, &self.vertices)
    }

    /// Join a subset of edges into maximal chains through vertices of
    /// degree two. Closed loops come back as closed chains.
    pub fn chains(&self, edges: &[(usize, usize)]) -> Vec<Vec<Coord>> {
        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); self.vertices.len()];
        for (k, &(a, b)) in edges.iter().enumerate() {
            adjacency[a].push((k, b));
            adjacency[b].push((k, a));
        }
        let mut used = vec![false; edges.len()];
        let mut chains = Vec::new();

        let walk = |start: usize, used: &mut Vec<bool>, chains: &mut Vec<Vec<Coord>>| {
            while let Some(&(first, mut at)) = adjacency[start].iter().find(|(k, _)| !used[*k]) {
                used[first] = true;
                let mut chain = vec![self.vertices[start], self.vertices[at]];
                while adjacency[at].len() == 2 && at != start {
                    let Some(&(k, next)) = adjacency[at].iter().find(|(k, _)| !used[*k]) else {
                        break;
                    };
                    used[k] = true;
                    chain.push(self.vertices[next]);
                    at = next;
                }
                chains.push(chain);
            }
        };
        for v in 0..self.vertices.len() {
            if adjacency[v].len() != 2 {
                walk(v, &mut used, &mut chains);
            }
        }
        // Whatever remains forms loops of degree-two vertices
        for k in 0..edges.len() {
            if !used[k] {
                walk(edges[k].0, &mut used, &mut chains);
            }
        }
        chains
    }
}

/// Union of many multi-polygons, merged pairwise in a balanced tree.
pub fn cascaded_union(mut parts: Vec<geo::MultiPolygon<f64>>) -> geo::MultiPolygon<f64> {
    while parts.len() > 1 {
        parts = parts
            .par_chunks(2)
            .map(|pair| match pair {
                [a, b] => a.union(b),
                [a] => a.clone(),
                _ => geo::MultiPolygon::new(Vec::new()),
            })
            .collect();
    }
    parts
        .pop()
        .unwrap_or_else(|| geo::MultiPolygon::new(Vec::new()))
}

/// Faces of a single ring's arrangement that lie inside it under the
/// even-odd rule, unioned.
fn ring_interior(ring: &[Coord], tol: Tolerance) -> geo::MultiPolygon<f64> {
    let (segments, _) = ring_segments(&[ring], tol);
    let segments: Vec<(Coord, Coord)> = segments.iter().map(|s| (s.a, s.b)).collect();

    let arrangement = Arrangement::new(&segments, tol);
    let faces = arrangement.faces();
    let traced = faces.len();

    let kept: Vec<geo::MultiPolygon<f64>> = faces
        .into_iter()
        .filter(|face| {
            interior_point(face)
                .is_some_and(|p| point_in_ring(p, ring, Tolerance(0.0)) == Location::Inside)
        })
        .map(|face| {
            geo::MultiPolygon::new(vec![geo::Polygon::new(
                geo::LineString::new(face),
                Vec::new(),
            )])
        })
        .collect();
    trace!(
        segments = segments.len(),
        vertices = arrangement.vertices.len(),
        faces = traced,
        kept = kept.len(),
        "Noded ring"
    );
    cascaded_union(kept)
}

/// Rebuild a polygon whose rings cross or overlap.
///
/// The exterior's even-odd interior minus the union of the holes' even-odd
/// interiors. The result may hold several polygons or none.
pub(crate) fn rebuild_polygon(poly: &Polygon, tol: Tolerance) -> Vec<Polygon> {
    let exterior = ring_interior(&poly.exterior, tol);
    let holes: Vec<geo::MultiPolygon<f64>> = poly
        .interiors
        .iter()
        .map(|h| ring_interior(h, tol))
        .filter(|mp| !mp.0.is_empty())
        .collect();
    let area = if holes.is_empty() {
        exterior
    } else {
        exterior.difference(&cascaded_union(holes))
    };
    from_geo_multi_polygon(&area)
}
