//! Topology-preserving polygon simplification.
//!
//! Simplifying each polygon on its own would move a boundary shared by two
//! neighbouring units differently on each side, opening gaps and overlaps.
//! Instead, rings are cut into arcs wherever the set of rings sharing a
//! vertex changes. Each distinct arc is simplified once with Douglas-Peucker
//! (endpoints pinned) and every ring that uses it gets the same result.
//!
//! Every output polygon is re-validated and its area compared against the
//! input, and the rings of the whole collection are checked against each
//! other so a shell never crosses its own hole or an unshared neighbour.
//! If anything fails, the whole collection is retried at half the
//! tolerance. After the last attempt the input is returned unchanged.

use std::collections::HashMap;

use geo::{Area, Coord, LineString, MultiPolygon, Polygon, Simplify};
use serde::{Deserialize, Serialize};

use crate::GeometryError;
use crate::validate::{distinct_ring, ensure_valid, polygon_problem, ring_conflict};

/// Settings for [`simplify`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyOptions {
    /// Douglas-Peucker distance tolerance, in working CRS units. Zero
    /// disables simplification.
    pub tolerance: f64,
    /// Largest allowed relative area change per polygon (0.05 = 5%).
    pub max_area_change: f64,
    /// Number of tolerance halvings tried before giving up.
    pub max_attempts: u32,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            max_area_change: 0.05,
            max_attempts: 4,
        }
    }
}

type VertexKey = (u64, u64);

fn vertex_key(coord: Coord<f64>) -> VertexKey {
    // Adding 0.0 folds -0.0 into 0.0 so both hash the same.
    ((coord.x + 0.0).to_bits(), (coord.y + 0.0).to_bits())
}

/// One ring of the collection, as an open coordinate list.
struct Ring {
    feature: usize,
    polygon: usize,
    /// 0 is the exterior, `n` is interior `n - 1`.
    slot: usize,
    coords: Vec<Coord<f64>>,
}

/// Simplifies a collection of polygons that may share boundaries.
///
/// Output has one geometry per input, in order, so anything keyed on the
/// input index (unit codes, cell ids) stays attached to the same shape.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometry`] if any input polygon is
/// invalid, or [`GeometryError::InvalidTolerance`] for a negative or
/// non-finite tolerance.
pub fn simplify(
    geometries: &[MultiPolygon<f64>],
    options: &SimplifyOptions,
) -> Result<Vec<MultiPolygon<f64>>, GeometryError> {
    if !options.tolerance.is_finite() || options.tolerance < 0.0 {
        return Err(GeometryError::InvalidTolerance {
            tolerance: options.tolerance,
        });
    }

    for (index, geometry) in geometries.iter().enumerate() {
        ensure_valid(&format!("feature {index}"), geometry)?;
    }

    if options.tolerance == 0.0 || geometries.is_empty() {
        return Ok(geometries.to_vec());
    }

    let check_rings = match ring_conflict(geometries) {
        Some(problem) => {
            log::warn!("Input rings already conflict ({problem}); not checking ring crossings");
            false
        }
        None => true,
    };

    let rings = collect_rings(geometries);
    let before = vertex_count(geometries);
    let mut tolerance = options.tolerance;

    for attempt in 1..=options.max_attempts.max(1) {
        match simplify_at(geometries, &rings, tolerance) {
            Some(simplified) => match check_result(geometries, &simplified, options, check_rings) {
                Ok(()) => {
                    log::info!(
                        "Simplified {} geometries at tolerance {tolerance}: {before} -> {} vertices",
                        geometries.len(),
                        vertex_count(&simplified),
                    );
                    return Ok(simplified);
                }
                Err(reason) => {
                    log::debug!("Simplification attempt {attempt} rejected: {reason}");
                }
            },
            None => {
                log::debug!("Simplification attempt {attempt} collapsed a ring");
            }
        }
        tolerance /= 2.0;
    }

    log::warn!(
        "Could not simplify {} geometries within {} attempts, keeping originals",
        geometries.len(),
        options.max_attempts
    );
    Ok(geometries.to_vec())
}

fn collect_rings(geometries: &[MultiPolygon<f64>]) -> Vec<Ring> {
    let mut rings = Vec::new();
    for (feature, geometry) in geometries.iter().enumerate() {
        for (polygon, poly) in geometry.0.iter().enumerate() {
            let all = std::iter::once(poly.exterior()).chain(poly.interiors());
            for (slot, ring) in all.enumerate() {
                rings.push(Ring {
                    feature,
                    polygon,
                    slot,
                    coords: distinct_ring(ring),
                });
            }
        }
    }
    rings
}

/// Runs one simplification pass. Returns `None` if a ring collapsed below
/// three distinct points.
fn simplify_at(
    geometries: &[MultiPolygon<f64>],
    rings: &[Ring],
    tolerance: f64,
) -> Option<Vec<MultiPolygon<f64>>> {
    let mut owners: HashMap<VertexKey, Vec<usize>> = HashMap::new();
    for (id, ring) in rings.iter().enumerate() {
        for coord in &ring.coords {
            let entry = owners.entry(vertex_key(*coord)).or_default();
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
    }

    let mut cache = ArcCache::new(tolerance);
    let mut output: Vec<Vec<Vec<LineString<f64>>>> = geometries
        .iter()
        .map(|geometry| {
            geometry
                .0
                .iter()
                .map(|poly| Vec::with_capacity(1 + poly.interiors().len()))
                .collect()
        })
        .collect();

    for ring in rings {
        let breaks = break_points(&ring.coords, &owners);
        let simplified = rebuild_ring(&ring.coords, &breaks, &mut cache)?;
        output[ring.feature][ring.polygon].push(simplified);
        debug_assert_eq!(output[ring.feature][ring.polygon].len(), ring.slot + 1);
    }

    Some(
        output
            .into_iter()
            .map(|polygons| {
                MultiPolygon(
                    polygons
                        .into_iter()
                        .map(|mut ring_list| {
                            let exterior = ring_list.remove(0);
                            Polygon::new(exterior, ring_list)
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Indices where arcs start and end.
///
/// A vertex is a break when its owner set differs from either neighbour's.
/// Rings with fewer than two breaks get extra ones at deterministic
/// positions (smallest vertex, then the vertex farthest from it) so rings
/// sharing the whole loop cut it in the same places.
fn break_points(coords: &[Coord<f64>], owners: &HashMap<VertexKey, Vec<usize>>) -> Vec<usize> {
    let n = coords.len();
    let owner_set = |i: usize| owners.get(&vertex_key(coords[i]));

    let mut breaks: Vec<usize> = (0..n)
        .filter(|&i| {
            let here = owner_set(i);
            here != owner_set((i + n - 1) % n) || here != owner_set((i + 1) % n)
        })
        .collect();

    if breaks.is_empty() {
        let first = (0..n)
            .min_by_key(|&i| vertex_key(coords[i]))
            .unwrap_or(0);
        breaks.push(first);
    }
    if breaks.len() == 1 {
        let anchor = coords[breaks[0]];
        let far = (0..n)
            .filter(|&i| i != breaks[0])
            .max_by(|&a, &b| {
                squared_distance(anchor, coords[a])
                    .total_cmp(&squared_distance(anchor, coords[b]))
                    .then_with(|| vertex_key(coords[b]).cmp(&vertex_key(coords[a])))
            })
            .unwrap_or(breaks[0]);
        breaks.push(far);
        breaks.sort_unstable();
    }

    breaks
}

fn squared_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx.mul_add(dx, dy * dy)
}

fn rebuild_ring(
    coords: &[Coord<f64>],
    breaks: &[usize],
    cache: &mut ArcCache,
) -> Option<LineString<f64>> {
    let n = coords.len();
    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(n + 1);

    for (k, &start) in breaks.iter().enumerate() {
        let end = breaks[(k + 1) % breaks.len()];
        let len = if end > start { end - start } else { end + n - start };
        let arc: Vec<Coord<f64>> = (0..=len).map(|step| coords[(start + step) % n]).collect();

        let simplified = cache.simplify(&arc);
        ring.extend_from_slice(&simplified[..simplified.len() - 1]);
    }

    if ring.len() < 3 {
        return None;
    }
    ring.push(ring[0]);
    Some(LineString::new(ring))
}

/// Simplified arcs keyed by their canonical vertex sequence.
struct ArcCache {
    tolerance: f64,
    arcs: HashMap<Vec<VertexKey>, Vec<Coord<f64>>>,
}

impl ArcCache {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            arcs: HashMap::new(),
        }
    }

    /// Simplifies `arc`, reusing the result for the same arc walked in
    /// either direction.
    fn simplify(&mut self, arc: &[Coord<f64>]) -> Vec<Coord<f64>> {
        if arc.len() <= 2 {
            return arc.to_vec();
        }

        let forward: Vec<VertexKey> = arc.iter().copied().map(vertex_key).collect();
        let backward: Vec<VertexKey> = forward.iter().rev().copied().collect();
        let reversed = backward < forward;
        let key = if reversed { backward } else { forward };

        let tolerance = self.tolerance;
        let canonical = self.arcs.entry(key).or_insert_with(|| {
            let mut line: Vec<Coord<f64>> = arc.to_vec();
            if reversed {
                line.reverse();
            }
            LineString::new(line).simplify(tolerance).0
        });

        let mut result = canonical.clone();
        if reversed {
            result.reverse();
        }
        result
    }
}

fn check_result(
    original: &[MultiPolygon<f64>],
    simplified: &[MultiPolygon<f64>],
    options: &SimplifyOptions,
    check_rings: bool,
) -> Result<(), String> {
    for (index, (before, after)) in original.iter().zip(simplified).enumerate() {
        for (polygon, (a, b)) in before.0.iter().zip(&after.0).enumerate() {
            if let Some(problem) = polygon_problem(b) {
                return Err(format!("feature {index} polygon {polygon}: {problem}"));
            }
            let area_before = a.unsigned_area();
            let change = (b.unsigned_area() - area_before).abs() / area_before;
            if change > options.max_area_change {
                return Err(format!(
                    "feature {index} polygon {polygon}: area changed by {:.2}%",
                    change * 100.0
                ));
            }
        }
    }
    if !check_rings {
        return Ok(());
    }
    ring_conflict(simplified).map_or(Ok(()), Err)
}

fn vertex_count(geometries: &[MultiPolygon<f64>]) -> usize {
    geometries
        .iter()
        .flat_map(|geometry| &geometry.0)
        .map(|poly| {
            poly.exterior().0.len() + poly.interiors().iter().map(|r| r.0.len()).sum::<usize>()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    /// A unit square whose edges carry small wiggles, plus the square to
    /// its right sharing the wiggly edge at x = 1.
    fn wiggly_neighbours() -> Vec<MultiPolygon<f64>> {
        let shared: Vec<Coord<f64>> = (0..=10)
            .map(|i| {
                let y = f64::from(i) / 10.0;
                let x = if i % 2 == 0 { 1.0 } else { 1.001 };
                Coord { x, y }
            })
            .collect();

        let mut left = vec![Coord { x: 0.0, y: 0.0 }];
        left.extend(shared.iter().copied());
        left.push(Coord { x: 0.0, y: 1.0 });
        left.push(Coord { x: 0.0, y: 0.0 });

        let mut right = vec![Coord { x: 2.0, y: 0.0 }, Coord { x: 2.0, y: 1.0 }];
        right.extend(shared.iter().rev().copied());
        right.push(Coord { x: 2.0, y: 0.0 });

        vec![
            MultiPolygon(vec![Polygon::new(LineString::new(left), vec![])]),
            MultiPolygon(vec![Polygon::new(LineString::new(right), vec![])]),
        ]
    }

    fn shared_edge(geometry: &MultiPolygon<f64>) -> Vec<VertexKey> {
        let mut keys: Vec<VertexKey> = geometry.0[0]
            .exterior()
            .0
            .iter()
            .filter(|c| c.x > 0.5 && c.x < 1.5)
            .map(|c| vertex_key(*c))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    #[test]
    fn shared_boundary_stays_identical() {
        let input = wiggly_neighbours();
        let options = SimplifyOptions {
            tolerance: 0.01,
            ..SimplifyOptions::default()
        };
        let output = simplify(&input, &options).unwrap();

        assert_eq!(output.len(), 2);
        let left = shared_edge(&output[0]);
        let right = shared_edge(&output[1]);
        assert_eq!(left, right, "shared edge diverged after simplification");
        assert!(
            left.len() < 11,
            "expected the wiggly edge to lose vertices, kept {}",
            left.len()
        );
    }

    #[test]
    fn output_is_valid_and_area_bounded() {
        let input = wiggly_neighbours();
        let options = SimplifyOptions {
            tolerance: 0.01,
            ..SimplifyOptions::default()
        };
        let output = simplify(&input, &options).unwrap();

        for (before, after) in input.iter().zip(&output) {
            assert!(ensure_valid("after", after).is_ok());
            let change = (after.unsigned_area() - before.unsigned_area()).abs();
            assert!(change <= 0.05 * before.unsigned_area());
        }
    }

    #[test]
    fn zero_tolerance_is_identity() {
        let input = wiggly_neighbours();
        let output = simplify(&input, &SimplifyOptions::default()).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn rejects_invalid_input() {
        let bowtie = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]]);
        let options = SimplifyOptions {
            tolerance: 0.1,
            ..SimplifyOptions::default()
        };
        assert!(matches!(
            simplify(&[bowtie], &options),
            Err(GeometryError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn rejects_negative_tolerance() {
        let options = SimplifyOptions {
            tolerance: -1.0,
            ..SimplifyOptions::default()
        };
        assert!(matches!(
            simplify(&wiggly_neighbours(), &options),
            Err(GeometryError::InvalidTolerance { .. })
        ));
    }

    #[test]
    fn oversized_tolerance_falls_back_without_collapsing() {
        let triangle = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.5, y: 0.01),
            (x: 0.0, y: 0.0),
        ]]);
        let options = SimplifyOptions {
            tolerance: 10.0,
            max_attempts: 2,
            ..SimplifyOptions::default()
        };
        let output = simplify(std::slice::from_ref(&triangle), &options).unwrap();
        assert_eq!(output[0], triangle);
    }

    #[test]
    fn polygon_with_hole_keeps_hole() {
        let with_hole = MultiPolygon(vec![polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 0.0, y: 10.0),
                (x: 0.0, y: 0.0),
            ],
            interiors: [[
                (x: 4.0, y: 4.0),
                (x: 6.0, y: 4.0),
                (x: 6.0, y: 6.0),
                (x: 4.0, y: 6.0),
                (x: 4.0, y: 4.0),
            ]],
        )]);
        let options = SimplifyOptions {
            tolerance: 0.1,
            ..SimplifyOptions::default()
        };
        let output = simplify(std::slice::from_ref(&with_hole), &options).unwrap();
        assert_eq!(output[0].0[0].interiors().len(), 1);
        assert!((output[0].unsigned_area() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn hole_near_shell_never_escapes() {
        let peaked = MultiPolygon(vec![polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 5.0, y: 10.05),
                (x: 0.0, y: 10.0),
                (x: 0.0, y: 0.0),
            ],
            interiors: [[
                (x: 4.9, y: 9.0),
                (x: 5.1, y: 9.0),
                (x: 5.1, y: 10.02),
                (x: 4.9, y: 10.02),
                (x: 4.9, y: 9.0),
            ]],
        )]);
        let input = std::slice::from_ref(&peaked);

        let first_pass = simplify_at(input, &collect_rings(input), 0.1).unwrap();
        assert!(ring_conflict(&first_pass).is_some());

        let options = SimplifyOptions {
            tolerance: 0.1,
            ..SimplifyOptions::default()
        };
        let output = simplify(input, &options).unwrap();
        assert!(ensure_valid("after", &output[0]).is_ok());
        assert_eq!(ring_conflict(&output), None);
        assert!(
            output[0].0[0]
                .exterior()
                .0
                .contains(&Coord { x: 5.0, y: 10.05 }),
            "the peak over the hole was dropped"
        );
    }

    /// Two units with a gap of 0.01 between them. The left one has a notch
    /// in its right edge and the right one has a spike reaching into it.
    /// No vertices are shared.
    fn notch_and_spike() -> Vec<MultiPolygon<f64>> {
        vec![
            MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 0.4),
                (x: 0.95, y: 0.5),
                (x: 1.0, y: 0.6),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]]),
            MultiPolygon(vec![polygon![
                (x: 1.01, y: 0.0),
                (x: 2.0, y: 0.0),
                (x: 2.0, y: 1.0),
                (x: 1.01, y: 1.0),
                (x: 1.01, y: 0.6),
                (x: 0.97, y: 0.5),
                (x: 1.01, y: 0.4),
                (x: 1.01, y: 0.0),
            ]]),
        ]
    }

    #[test]
    fn unshared_neighbour_is_not_crossed() {
        let input = notch_and_spike();
        assert_eq!(ring_conflict(&input), None);

        let first_pass = simplify_at(&input, &collect_rings(&input), 0.1).unwrap();
        assert!(ring_conflict(&first_pass).is_some());

        let options = SimplifyOptions {
            tolerance: 0.1,
            ..SimplifyOptions::default()
        };
        let output = simplify(&input, &options).unwrap();
        assert_eq!(ring_conflict(&output), None);
        for geometry in &output {
            assert!(ensure_valid("after", geometry).is_ok());
        }
    }

    #[test]
    fn crossing_input_still_simplifies() {
        let mut input = wiggly_neighbours();
        input.push(MultiPolygon(vec![polygon![
            (x: 0.5, y: 0.5),
            (x: 1.5, y: 0.5),
            (x: 1.5, y: 1.5),
            (x: 0.5, y: 1.5),
            (x: 0.5, y: 0.5),
        ]]));
        let options = SimplifyOptions {
            tolerance: 0.01,
            ..SimplifyOptions::default()
        };
        let output = simplify(&input, &options).unwrap();
        assert!(shared_edge(&output[0]).len() < 11);
    }
}
