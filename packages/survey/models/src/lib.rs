#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Management unit, grid cell, and survey observation types.
//!
//! Two families of types live here. The `*Feature` and `Raw*` types are the
//! records delivered by the input layer, still carrying raw code strings.
//! The remaining types carry canonical [`UnitCode`]s and are what the join,
//! geometry, and sighting stages operate on.

use std::fmt;
use std::num::NonZeroU32;

use chrono::NaiveDate;
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// Canonical wildlife management unit code (e.g. `"515"`).
///
/// Produced by the identifier normalizer. Two codes compare equal only if
/// both went through the same normalization, so never build one from a raw
/// composite field directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitCode(String);

impl UnitCode {
    /// Wraps an already-canonical code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuilds the composite form by prepending `prefix`.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for UnitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single grid cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
// Input records (raw codes)
// ============================================================

/// A management unit polygon as read from the boundary file.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFeature {
    /// Composite code field, not yet normalized (e.g. `"0515"`).
    pub raw_code: String,
    /// Human-readable unit name.
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

/// A grid cell polygon as read from the grid file.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFeature {
    pub cell_id: String,
    /// Composite unit code, if the grid file carries one. Cells without a
    /// code are assigned to a unit by centroid containment.
    pub raw_unit_code: Option<String>,
    pub boundary: MultiPolygon<f64>,
}

/// One row of the aerial survey table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    /// Species tag as recorded by the survey crew.
    pub species: String,
    /// Number of animals in this sighting.
    pub count: NonZeroU32,
    pub longitude: f64,
    pub latitude: f64,
    /// Survey date, if recorded.
    pub observed_on: Option<NaiveDate>,
    /// Unit code as recorded, `None` when the source left it blank.
    pub raw_unit_code: Option<String>,
}

/// One row of the density-per-unit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDensity {
    pub raw_unit_code: String,
    /// Animals per square kilometre.
    pub density: f64,
    pub survey_year: i32,
}

/// One row of the grid prediction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrediction {
    pub cell_id: String,
    /// Predicted abundance. `None` when the model produced no value.
    pub abundance: Option<f64>,
}

// ============================================================
// Normalized records
// ============================================================

/// A wildlife management unit with a canonical code.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagementUnit {
    pub code: UnitCode,
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

/// Observed density for one management unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensityRecord {
    pub unit_code: UnitCode,
    pub density: f64,
    pub survey_year: i32,
}

/// A grid cell assigned to exactly one management unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: CellId,
    pub unit_code: UnitCode,
    pub boundary: MultiPolygon<f64>,
}

/// Model output for one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    pub cell_id: CellId,
    pub abundance: Option<f64>,
}

/// A survey observation with a resolved unit code.
///
/// `count` is never zero: an observation with count `n` stands for `n`
/// individual sightings at roughly the same spot.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Position of the source row, used to trace sightings back.
    pub index: usize,
    pub species: String,
    pub count: NonZeroU32,
    pub location: Point<f64>,
    pub observed_on: Option<NaiveDate>,
    pub unit_code: UnitCode,
}

impl Observation {
    /// Case-insensitive species match.
    #[must_use]
    pub fn is_species(&self, species: &str) -> bool {
        self.species.trim().eq_ignore_ascii_case(species.trim())
    }
}

/// One animal from an expanded [`Observation`].
///
/// `origin` is the observation's location. `location` is where the marker
/// is drawn, which differs from `origin` once jitter is applied. Anything
/// that needs unit membership must read `origin` or `unit_code`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndividualSighting {
    /// Index of the parent observation.
    pub observation: usize,
    /// Position within the parent's expansion, `0..count`.
    pub ordinal: u32,
    pub species: String,
    pub unit_code: UnitCode,
    pub origin: Point<f64>,
    pub location: Point<f64>,
}
