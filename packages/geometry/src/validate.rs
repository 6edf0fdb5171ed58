//! Polygon validity checks run before and after simplification.
//!
//! Self-intersection detection indexes ring segments in an R-tree and only
//! tests segment pairs whose envelopes overlap, so large unit boundaries
//! don't pay the quadratic cost. The same index finds crossings between
//! different rings of a collection.

use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, Coord, Intersects, Line, LineString, MultiPolygon, Point, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::GeometryError;

type IndexedSegment = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Checks every polygon of `geometry`, naming `feature` in the error.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometry`] describing the first problem
/// found: too few ring points, non-finite coordinates, a zero-area ring, or
/// a self-intersecting ring.
pub fn ensure_valid(feature: &str, geometry: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if geometry.0.is_empty() {
        return Err(invalid(feature, "geometry has no polygons".to_string()));
    }
    for (index, polygon) in geometry.0.iter().enumerate() {
        if let Some(reason) = polygon_problem(polygon) {
            return Err(invalid(feature, format!("polygon {index}: {reason}")));
        }
    }
    Ok(())
}

/// Returns a description of what is wrong with `polygon`, if anything.
#[must_use]
pub fn polygon_problem(polygon: &Polygon<f64>) -> Option<String> {
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
    for (ring_index, ring) in rings.enumerate() {
        if let Some(reason) = ring_problem(ring) {
            let label = if ring_index == 0 {
                "exterior ring".to_string()
            } else {
                format!("interior ring {}", ring_index - 1)
            };
            return Some(format!("{label}: {reason}"));
        }
    }
    None
}

fn ring_problem(ring: &LineString<f64>) -> Option<String> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Some("non-finite coordinate".to_string());
    }

    let coords = distinct_ring(ring);
    if coords.len() < 3 {
        return Some(format!("only {} distinct points", coords.len()));
    }

    let area = Polygon::new(ring.clone(), vec![]).unsigned_area();
    if area <= 0.0 {
        return Some("zero area".to_string());
    }

    if let Some((a, b)) = self_intersection(&coords) {
        return Some(format!("self-intersection between segments {a} and {b}"));
    }

    None
}

/// Ring coordinates without the closing point and without consecutive
/// repeats.
pub(crate) fn distinct_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for coord in &ring.0 {
        if coords.last() != Some(coord) {
            coords.push(*coord);
        }
    }
    while coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords
}

/// Finds a pair of ring segments that cross or overlap.
///
/// `coords` is an open ring (no closing point). Segment `i` runs from
/// `coords[i]` to `coords[(i + 1) % n]`. Neighbouring segments share an
/// endpoint by construction, so they only count when they overlap along a
/// stretch (a spike that doubles back).
fn self_intersection(coords: &[Coord<f64>]) -> Option<(usize, usize)> {
    let n = coords.len();
    let segments = ring_segments(coords);
    let tree = segment_tree(&segments);

    tree.intersection_candidates_with_other_tree(&tree)
        .map(|(a, b)| (a.data, b.data))
        .filter(|(a, b)| a < b)
        .find(|&(a, b)| {
            let adjacent = b == a + 1 || (a == 0 && b == n - 1);
            match line_intersection(segments[a], segments[b]) {
                None => false,
                Some(LineIntersection::Collinear { intersection }) => {
                    !adjacent || intersection.start != intersection.end
                }
                Some(LineIntersection::SinglePoint { .. }) => !adjacent,
            }
        })
}

/// Returns a description of the first conflict between different rings of
/// `geometries`: two rings crossing, or a hole lying outside its shell.
///
/// Rings may touch at a vertex and may share stretches of boundary, as
/// neighbouring units do. A crossing is an intersection point interior to
/// a segment of each ring.
#[must_use]
pub fn ring_conflict(geometries: &[MultiPolygon<f64>]) -> Option<String> {
    let mut rings: Vec<RingId> = Vec::new();
    let mut owners: Vec<usize> = Vec::new();
    let mut segments: Vec<Line<f64>> = Vec::new();
    for (feature, geometry) in geometries.iter().enumerate() {
        for (polygon, poly) in geometry.0.iter().enumerate() {
            let all = std::iter::once(poly.exterior()).chain(poly.interiors());
            for (slot, ring) in all.enumerate() {
                let lines = ring_segments(&distinct_ring(ring));
                owners.extend(std::iter::repeat_n(rings.len(), lines.len()));
                segments.extend(lines);
                rings.push(RingId {
                    feature,
                    polygon,
                    slot,
                });
            }
        }
    }

    let tree = segment_tree(&segments);
    let crossing = tree
        .intersection_candidates_with_other_tree(&tree)
        .map(|(a, b)| (a.data, b.data))
        .filter(|&(a, b)| a < b && owners[a] != owners[b])
        .find(|&(a, b)| {
            matches!(
                line_intersection(segments[a], segments[b]),
                Some(LineIntersection::SinglePoint {
                    is_proper: true,
                    ..
                })
            )
        });
    if let Some((a, b)) = crossing {
        return Some(format!("{} crosses {}", rings[owners[a]], rings[owners[b]]));
    }

    for (feature, geometry) in geometries.iter().enumerate() {
        for (polygon, poly) in geometry.0.iter().enumerate() {
            let shell = Polygon::new(poly.exterior().clone(), vec![]);
            for (slot, hole) in poly.interiors().iter().enumerate() {
                if hole.0.iter().any(|c| !shell.intersects(&Point::from(*c))) {
                    let ring = RingId {
                        feature,
                        polygon,
                        slot: slot + 1,
                    };
                    return Some(format!("{ring} lies outside its exterior ring"));
                }
            }
        }
    }

    None
}

/// Position of a ring within a collection, for messages.
#[derive(Debug, Clone, Copy)]
struct RingId {
    feature: usize,
    polygon: usize,
    /// 0 is the exterior, `n` is interior `n - 1`.
    slot: usize,
}

impl std::fmt::Display for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feature {} polygon {} ", self.feature, self.polygon)?;
        if self.slot == 0 {
            write!(f, "exterior ring")
        } else {
            write!(f, "interior ring {}", self.slot - 1)
        }
    }
}

/// Closed-ring segments of an open coordinate list.
fn ring_segments(coords: &[Coord<f64>]) -> Vec<Line<f64>> {
    let n = coords.len();
    (0..n)
        .map(|i| Line::new(coords[i], coords[(i + 1) % n]))
        .collect()
}

fn segment_tree(segments: &[Line<f64>]) -> RTree<IndexedSegment> {
    RTree::bulk_load(
        segments
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let envelope =
                    AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y]);
                GeomWithData::new(Rectangle::from_aabb(envelope), i)
            })
            .collect(),
    )
}

fn invalid(feature: &str, reason: String) -> GeometryError {
    GeometryError::InvalidGeometry {
        feature: feature.to_string(),
        reason,
    }
}
