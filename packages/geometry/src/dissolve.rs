//! Region outline construction.

use geo::{Area, MultiPolygon, unary_union};

/// Unions `geometries` into a single outline.
///
/// Shared boundaries between neighbouring polygons disappear; holes and
/// disjoint parts survive. Slivers below `min_area` (working CRS units
/// squared) left over by floating-point noise along shared edges are
/// dropped.
#[must_use]
pub fn dissolve(geometries: &[MultiPolygon<f64>], min_area: f64) -> MultiPolygon<f64> {
    if geometries.is_empty() {
        return MultiPolygon(vec![]);
    }

    let union = unary_union(geometries);
    let parts = union.0.len();
    let kept = MultiPolygon(
        union
            .0
            .into_iter()
            .filter(|polygon| polygon.unsigned_area() > min_area)
            .collect(),
    );

    log::debug!(
        "Dissolved {} geometries into {} parts ({} slivers dropped)",
        geometries.len(),
        kept.0.len(),
        parts - kept.0.len()
    );

    kept
}
