//! Individual pipeline stages.
//!
//! Each stage borrows its inputs and returns new values; nothing here
//! mutates caller-owned data.

use geo::{MultiPolygon, Point};
use moose_map_geometry::simplify::{SimplifyOptions, simplify};
use moose_map_geometry::validate::ensure_valid;
use moose_map_geometry::{Crs, GeometryError, reproject};
use moose_map_identifier::{CodeFormat, CodeNormalizer, IdentifierError};
use moose_map_join::Joined;
use moose_map_spatial::UnitIndex;
use moose_map_survey_models::{
    CellFeature, CellId, DensityRecord, GridCell, ManagementUnit, Observation, PredictionRecord,
    RawDensity, RawObservation, RawPrediction, UnitCode, UnitFeature,
};

/// A grid cell whose unit may not be known until after reprojection.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCell {
    pub id: CellId,
    pub unit_code: Option<UnitCode>,
    pub boundary: MultiPolygon<f64>,
}

/// Target-species observations with resolved unit codes.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    pub observations: Vec<Observation>,
    /// Rows dropped for being another species.
    pub other_species: usize,
    /// Rows whose blank unit code was replaced with the default unit.
    pub substituted: usize,
}

/// Canonicalizes unit boundary codes.
///
/// # Errors
///
/// Returns [`IdentifierError::MalformedIdentifier`] for the first bad code.
pub fn normalize_units(
    features: &[UnitFeature],
    normalizer: &CodeNormalizer,
    format: CodeFormat,
) -> Result<Vec<ManagementUnit>, IdentifierError> {
    features
        .iter()
        .map(|feature| {
            Ok(ManagementUnit {
                code: normalizer.canonicalize(&feature.raw_code, format)?,
                name: feature.name.trim().to_string(),
                boundary: feature.boundary.clone(),
            })
        })
        .collect()
}

/// Canonicalizes grid cell unit codes. Blank codes become `None`.
///
/// # Errors
///
/// Returns [`IdentifierError::MalformedIdentifier`] for the first bad code.
pub fn normalize_cells(
    features: &[CellFeature],
    normalizer: &CodeNormalizer,
    format: CodeFormat,
) -> Result<Vec<PendingCell>, IdentifierError> {
    features
        .iter()
        .map(|feature| {
            let unit_code = feature
                .raw_unit_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| normalizer.canonicalize(code, format))
                .transpose()?;
            Ok(PendingCell {
                id: CellId::new(feature.cell_id.trim()),
                unit_code,
                boundary: feature.boundary.clone(),
            })
        })
        .collect()
}

/// Keeps `species` rows and resolves their unit codes, substituting
/// `default_unit` for blanks.
///
/// Locations are built as `(longitude, latitude)` in the observation CRS.
/// `Observation::index` is the row's position in `rows`.
///
/// # Errors
///
/// Returns [`IdentifierError::MalformedIdentifier`] for the first present
/// but malformed code.
pub fn normalize_observations(
    rows: &[RawObservation],
    normalizer: &CodeNormalizer,
    format: CodeFormat,
    default_unit: &UnitCode,
    species: &str,
) -> Result<ObservationBatch, IdentifierError> {
    let mut observations = Vec::new();
    let mut other_species = 0;
    let mut substituted = 0;

    for (index, row) in rows.iter().enumerate() {
        if !row.species.trim().eq_ignore_ascii_case(species.trim()) {
            other_species += 1;
            continue;
        }
        let (unit_code, was_default) =
            normalizer.resolve_or_default(row.raw_unit_code.as_deref(), format, default_unit)?;
        if was_default {
            substituted += 1;
        }
        observations.push(Observation {
            index,
            species: row.species.trim().to_string(),
            count: row.count,
            location: Point::new(row.longitude, row.latitude),
            observed_on: row.observed_on,
            unit_code,
        });
    }

    if substituted > 0 {
        log::warn!(
            "Substituted default unit {default_unit} for {substituted} observations with a blank unit code"
        );
    }
    log::info!(
        "Kept {} {species} observations ({other_species} rows of other species dropped)",
        observations.len()
    );

    Ok(ObservationBatch {
        observations,
        other_species,
        substituted,
    })
}

/// Canonicalizes density table unit codes.
///
/// # Errors
///
/// Returns [`IdentifierError::MalformedIdentifier`] for the first bad code.
pub fn normalize_densities(
    rows: &[RawDensity],
    normalizer: &CodeNormalizer,
    format: CodeFormat,
) -> Result<Vec<DensityRecord>, IdentifierError> {
    rows.iter()
        .map(|row| {
            Ok(DensityRecord {
                unit_code: normalizer.canonicalize(&row.raw_unit_code, format)?,
                density: row.density,
                survey_year: row.survey_year,
            })
        })
        .collect()
}

#[must_use]
pub fn normalize_predictions(rows: &[RawPrediction]) -> Vec<PredictionRecord> {
    rows.iter()
        .map(|row| PredictionRecord {
            cell_id: CellId::new(row.cell_id.trim()),
            abundance: row.abundance.filter(|value| value.is_finite()),
        })
        .collect()
}

/// # Errors
///
/// See [`reproject`].
pub fn reproject_units(
    units: &[ManagementUnit],
    from: &Crs,
    to: &Crs,
) -> Result<Vec<ManagementUnit>, GeometryError> {
    units
        .iter()
        .map(|unit| {
            Ok(ManagementUnit {
                boundary: reproject(&unit.boundary, from, to)?,
                ..unit.clone()
            })
        })
        .collect()
}

/// # Errors
///
/// See [`reproject`].
pub fn reproject_cells(
    cells: &[PendingCell],
    from: &Crs,
    to: &Crs,
) -> Result<Vec<PendingCell>, GeometryError> {
    cells
        .iter()
        .map(|cell| {
            Ok(PendingCell {
                boundary: reproject(&cell.boundary, from, to)?,
                ..cell.clone()
            })
        })
        .collect()
}

/// # Errors
///
/// See [`reproject`].
pub fn reproject_observations(
    observations: &[Observation],
    from: &Crs,
    to: &Crs,
) -> Result<Vec<Observation>, GeometryError> {
    observations
        .iter()
        .map(|observation| {
            Ok(Observation {
                location: reproject(&observation.location, from, to)?,
                ..observation.clone()
            })
        })
        .collect()
}

/// Gives every cell a unit code, looking up cells without one by centroid.
///
/// Cells whose centroid falls in no unit are dropped; the count of those is
/// returned alongside the cells.
#[must_use]
pub fn assign_cells(cells: &[PendingCell], units: &UnitIndex) -> (Vec<GridCell>, usize) {
    let mut unassigned = 0;
    let mut looked_up = 0;

    let assigned: Vec<GridCell> = cells
        .iter()
        .filter_map(|cell| {
            let unit_code = if let Some(code) = &cell.unit_code {
                code.clone()
            } else {
                looked_up += 1;
                let Some(code) = units.lookup_centroid(&cell.boundary) else {
                    log::debug!("Grid cell {} lies outside every unit", cell.id);
                    unassigned += 1;
                    return None;
                };
                code.clone()
            };
            Some(GridCell {
                id: cell.id.clone(),
                unit_code,
                boundary: cell.boundary.clone(),
            })
        })
        .collect();

    if looked_up > 0 {
        log::info!(
            "Assigned {} grid cells to units by location ({unassigned} outside every unit)",
            looked_up - unassigned
        );
    }

    (assigned, unassigned)
}

/// A record that owns a boundary polygon.
pub trait Bounded: Sized {
    fn boundary(&self) -> &MultiPolygon<f64>;

    #[must_use]
    fn with_boundary(&self, boundary: MultiPolygon<f64>) -> Self;

    /// Name used in validation errors.
    fn label(&self) -> String;
}

impl Bounded for ManagementUnit {
    fn boundary(&self) -> &MultiPolygon<f64> {
        &self.boundary
    }

    fn with_boundary(&self, boundary: MultiPolygon<f64>) -> Self {
        Self {
            boundary,
            ..self.clone()
        }
    }

    fn label(&self) -> String {
        format!("unit {}", self.code)
    }
}

impl Bounded for GridCell {
    fn boundary(&self) -> &MultiPolygon<f64> {
        &self.boundary
    }

    fn with_boundary(&self, boundary: MultiPolygon<f64>) -> Self {
        Self {
            boundary,
            ..self.clone()
        }
    }

    fn label(&self) -> String {
        format!("grid cell {}", self.id)
    }
}

impl<B: Bounded, A: Clone> Bounded for Joined<B, A> {
    fn boundary(&self) -> &MultiPolygon<f64> {
        self.base.boundary()
    }

    fn with_boundary(&self, boundary: MultiPolygon<f64>) -> Self {
        Self {
            base: self.base.with_boundary(boundary),
            attribute: self.attribute.clone(),
        }
    }

    fn label(&self) -> String {
        self.base.label()
    }
}

/// Checks every boundary, naming the offending record in the error.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometry`] for the first invalid
/// boundary.
pub fn validate_all<T: Bounded>(rows: &[T]) -> Result<(), GeometryError> {
    rows.iter()
        .try_for_each(|row| ensure_valid(&row.label(), row.boundary()))
}

/// Simplifies the boundaries of `rows` together, so shared edges stay
/// shared. Row order and keys are unchanged.
///
/// # Errors
///
/// See [`simplify`].
pub fn simplify_all<T: Bounded>(
    rows: &[T],
    options: &SimplifyOptions,
) -> Result<Vec<T>, GeometryError> {
    let boundaries: Vec<MultiPolygon<f64>> = rows.iter().map(|row| row.boundary().clone()).collect();
    let simplified = simplify(&boundaries, options)?;
    Ok(rows
        .iter()
        .zip(simplified)
        .map(|(row, boundary)| row.with_boundary(boundary))
        .collect())
}
