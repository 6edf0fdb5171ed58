#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial index for management unit attribution.
//!
//! Builds an R-tree over management unit polygons and provides fast
//! point-in-polygon lookups. Used to assign grid cells that arrive without
//! a unit code, and to keep jittered sighting markers inside their unit.

use geo::{BoundingRect, Centroid, Contains, MultiPolygon, Point};
use moose_map_survey_models::{ManagementUnit, UnitCode};
use rstar::{AABB, RTree, RTreeObject};

/// A unit polygon stored in the R-tree with its code.
struct UnitEntry {
    code: UnitCode,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for UnitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over management units.
///
/// Constructed once per run from units already in the working CRS.
pub struct UnitIndex {
    units: RTree<UnitEntry>,
}

impl UnitIndex {
    /// Builds the index from `units`.
    #[must_use]
    pub fn build(units: &[ManagementUnit]) -> Self {
        use geo::Area;

        let entries: Vec<UnitEntry> = units
            .iter()
            .map(|unit| UnitEntry {
                code: unit.code.clone(),
                area: unit.boundary.unsigned_area(),
                envelope: compute_envelope(&unit.boundary),
                polygon: unit.boundary.clone(),
            })
            .collect();

        let units = RTree::bulk_load(entries);
        log::info!("Loaded {} management units into spatial index", units.size());

        Self { units }
    }

    /// Number of indexed units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.size() == 0
    }

    /// Looks up the unit containing `point`.
    ///
    /// Units should tile without overlap, but digitizing slop can leave
    /// small overlaps; the smallest containing unit wins.
    #[must_use]
    pub fn lookup(&self, point: Point<f64>) -> Option<&UnitCode> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        let mut best: Option<&UnitEntry> = None;

        for entry in self.units.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                match best {
                    None => best = Some(entry),
                    Some(current) if entry.area < current.area => {
                        best = Some(entry);
                    }
                    _ => {}
                }
            }
        }

        best.map(|e| &e.code)
    }

    /// Looks up the unit containing the centroid of `geometry`.
    #[must_use]
    pub fn lookup_centroid(&self, geometry: &MultiPolygon<f64>) -> Option<&UnitCode> {
        geometry.centroid().and_then(|centroid| self.lookup(centroid))
    }

    /// Whether `point` lies inside the unit with `code`.
    #[must_use]
    pub fn unit_contains(&self, code: &UnitCode, point: Point<f64>) -> bool {
        let query_env = AABB::from_point([point.x(), point.y()]);
        self.units
            .locate_in_envelope_intersecting(&query_env)
            .any(|entry| &entry.code == code && entry.polygon.contains(&point))
    }

    /// Smallest bounding-box side length across all units, in working CRS
    /// units. `None` for an empty index.
    #[must_use]
    pub fn min_extent(&self) -> Option<f64> {
        self.units
            .iter()
            .map(|entry| {
                let lower = entry.envelope.lower();
                let upper = entry.envelope.upper();
                (upper[0] - lower[0]).min(upper[1] - lower[1])
            })
            .min_by(f64::total_cmp)
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square_unit(code: &str, x0: f64, y0: f64, size: f64) -> ManagementUnit {
        ManagementUnit {
            code: UnitCode::new(code),
            name: format!("WMU {code}"),
            boundary: MultiPolygon(vec![polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
                (x: x0, y: y0),
            ]]),
        }
    }

    fn index() -> UnitIndex {
        UnitIndex::build(&[
            square_unit("515", 0.0, 0.0, 10.0),
            square_unit("516", 10.0, 0.0, 10.0),
            // Small unit overlapping the corner of 515.
            square_unit("517", 8.0, 8.0, 1.0),
        ])
    }

    #[test]
    fn finds_containing_unit() {
        let index = index();
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(Point::new(2.0, 2.0)).unwrap().as_str(), "515");
        assert_eq!(index.lookup(Point::new(15.0, 5.0)).unwrap().as_str(), "516");
        assert!(index.lookup(Point::new(50.0, 50.0)).is_none());
    }

    #[test]
    fn smallest_overlapping_unit_wins() {
        let index = index();
        assert_eq!(index.lookup(Point::new(8.5, 8.5)).unwrap().as_str(), "517");
    }

    #[test]
    fn centroid_lookup() {
        let index = index();
        let cell = MultiPolygon(vec![polygon![
            (x: 11.0, y: 1.0),
            (x: 12.0, y: 1.0),
            (x: 12.0, y: 2.0),
            (x: 11.0, y: 2.0),
            (x: 11.0, y: 1.0),
        ]]);
        assert_eq!(index.lookup_centroid(&cell).unwrap().as_str(), "516");
    }

    #[test]
    fn membership_check() {
        let index = index();
        let code = UnitCode::new("515");
        assert!(index.unit_contains(&code, Point::new(1.0, 1.0)));
        assert!(!index.unit_contains(&code, Point::new(11.0, 1.0)));
    }

    #[test]
    fn min_extent_is_smallest_side() {
        assert_eq!(index().min_extent(), Some(1.0));
        assert_eq!(UnitIndex::build(&[]).min_extent(), None);
    }
}
