//! Readers for the survey input files.
//!
//! Polygon datasets are `GeoJSON` feature collections; tabular datasets are
//! CSV with a header row. Column and property names come from the
//! `[fields]` section of the run configuration. Empty cells and `NA` are
//! treated as missing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::num::NonZeroU32;
use std::path::Path;

use chrono::NaiveDate;
use geo::MultiPolygon;
use geojson::{Feature, GeoJson, JsonValue};
use moose_map_pipeline::config::{
    DensityFields, GridFields, ObservationFields, PredictionFields, UnitFields,
};
use moose_map_survey_models::{
    CellFeature, RawDensity, RawObservation, RawPrediction, UnitFeature,
};
use thiserror::Error;

/// Errors from reading input files.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened or read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {path}: {source}")]
    GeoJson {
        /// File that failed.
        path: String,
        /// Underlying parse error.
        source: Box<geojson::Error>,
    },

    /// The file is not valid CSV.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// File that failed.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The `GeoJSON` document is not a feature collection.
    #[error("{path}: expected a FeatureCollection")]
    NotACollection {
        /// File that failed.
        path: String,
    },

    /// A feature has no geometry, or one that isn't a polygon.
    #[error("{path}: feature {index} is not a polygon")]
    NotAPolygon {
        /// File that failed.
        path: String,
        /// Zero-based feature index.
        index: usize,
    },

    /// A required column or property is absent.
    #[error("{path}: missing field {field:?}")]
    MissingField {
        /// File that failed.
        path: String,
        /// Column or property name.
        field: String,
    },

    /// A value could not be parsed.
    #[error("{path} line {line}: invalid {field} {value:?}: {reason}")]
    InvalidValue {
        /// File that failed.
        path: String,
        /// One-based line (CSV) or feature number (`GeoJSON`).
        line: usize,
        /// Column or property name.
        field: String,
        /// The raw value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Reads management unit boundaries.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_units(path: &Path, fields: &UnitFields) -> Result<Vec<UnitFeature>, LoadError> {
    read_units(open(path)?, &path.display().to_string(), fields)
}

/// Reads grid cell polygons.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_grid(path: &Path, fields: &GridFields) -> Result<Vec<CellFeature>, LoadError> {
    read_grid(open(path)?, &path.display().to_string(), fields)
}

/// Reads the pieces of a supplied region outline. Properties are ignored.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_region(path: &Path) -> Result<Vec<MultiPolygon<f64>>, LoadError> {
    let name = path.display().to_string();
    let parts: Vec<_> = read_polygons(open(path)?, &name)?
        .into_iter()
        .map(|(_, boundary)| boundary)
        .collect();
    log::info!("Read {} region outline features from {name}", parts.len());
    Ok(parts)
}

/// Reads the survey observation table.
///
/// # Errors
///
/// See [`LoadError`]. A count of zero is rejected.
pub fn load_observations(
    path: &Path,
    fields: &ObservationFields,
) -> Result<Vec<RawObservation>, LoadError> {
    read_observations(open(path)?, &path.display().to_string(), fields)
}

/// Reads the density-per-unit table.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_densities(path: &Path, fields: &DensityFields) -> Result<Vec<RawDensity>, LoadError> {
    read_densities(open(path)?, &path.display().to_string(), fields)
}

/// Reads the grid prediction table.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_predictions(
    path: &Path,
    fields: &PredictionFields,
) -> Result<Vec<RawPrediction>, LoadError> {
    read_predictions(open(path)?, &path.display().to_string(), fields)
}

/// Reads one numeric column of a CSV file. Missing cells are `None`.
///
/// # Errors
///
/// See [`LoadError`].
pub fn load_column(path: &Path, column: &str) -> Result<Vec<Option<f64>>, LoadError> {
    let name = path.display().to_string();
    let mut table = Table::new(open(path)?, &name)?;
    let index = table.column(column)?;
    let mut values = Vec::new();
    table.for_each_row(|row| {
        values.push(row.number(index, column)?);
        Ok(())
    })?;
    Ok(values)
}

fn open(path: &Path) -> Result<BufReader<File>, LoadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })
}

// ============================================================
// GeoJSON
// ============================================================

fn read_units(
    reader: impl Read,
    path: &str,
    fields: &UnitFields,
) -> Result<Vec<UnitFeature>, LoadError> {
    let units = read_polygons(reader, path)?
        .into_iter()
        .enumerate()
        .map(|(index, (feature, boundary))| {
            let raw_code = code_property(&feature, &fields.code, path, index)?.ok_or_else(|| {
                log::debug!("{path}: unit feature {index} has no {}", fields.code);
                LoadError::MissingField {
                    path: path.to_string(),
                    field: fields.code.clone(),
                }
            })?;
            Ok(UnitFeature {
                raw_code,
                name: property(&feature, &fields.name).unwrap_or_default(),
                boundary,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    log::info!("Read {} management units from {path}", units.len());
    Ok(units)
}

fn read_grid(
    reader: impl Read,
    path: &str,
    fields: &GridFields,
) -> Result<Vec<CellFeature>, LoadError> {
    let cells = read_polygons(reader, path)?
        .into_iter()
        .enumerate()
        .map(|(index, (feature, boundary))| {
            let cell_id =
                property(&feature, &fields.cell_id).ok_or_else(|| LoadError::MissingField {
                    path: path.to_string(),
                    field: fields.cell_id.clone(),
                })?;
            let raw_unit_code = match &fields.unit_code {
                Some(field) => code_property(&feature, field, path, index)?,
                None => None,
            };
            Ok(CellFeature {
                cell_id,
                raw_unit_code,
                boundary,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    log::info!("Read {} grid cells from {path}", cells.len());
    Ok(cells)
}

/// Parses a feature collection, keeping each feature next to its geometry
/// as a [`MultiPolygon`]. Handles both `Polygon` and `MultiPolygon`.
fn read_polygons(
    mut reader: impl Read,
    path: &str,
) -> Result<Vec<(Feature, MultiPolygon<f64>)>, LoadError> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|source| LoadError::Io {
            path: path.to_string(),
            source,
        })?;

    let geojson: GeoJson = text.parse().map_err(|source| LoadError::GeoJson {
        path: path.to_string(),
        source: Box::new(source),
    })?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(LoadError::NotACollection {
            path: path.to_string(),
        });
    };

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, mut feature)| {
            let not_a_polygon = || LoadError::NotAPolygon {
                path: path.to_string(),
                index,
            };
            let geometry = feature.geometry.take().ok_or_else(not_a_polygon)?;
            let geometry: geo::Geometry<f64> =
                geometry.try_into().map_err(|_| not_a_polygon())?;
            let boundary = match geometry {
                geo::Geometry::MultiPolygon(mp) => mp,
                geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
                _ => return Err(not_a_polygon()),
            };
            Ok((feature, boundary))
        })
        .collect()
}

/// A property as text. Numbers are formatted; blanks and nulls are `None`.
fn property(feature: &Feature, name: &str) -> Option<String> {
    match feature.property(name)? {
        JsonValue::String(text) => present(text).map(str::to_string),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// A unit code property as text. Codes must be stored as strings: a number
/// has already lost any leading zero (`"0515"` saved as `515`).
fn code_property(
    feature: &Feature,
    name: &str,
    path: &str,
    index: usize,
) -> Result<Option<String>, LoadError> {
    match feature.property(name) {
        Some(JsonValue::Number(number)) => Err(LoadError::InvalidValue {
            path: path.to_string(),
            line: index + 1,
            field: name.to_string(),
            value: number.to_string(),
            reason: "unit codes must be text; a numeric code has lost its leading zeros"
                .to_string(),
        }),
        _ => Ok(property(feature, name)),
    }
}

// ============================================================
// CSV
// ============================================================

fn read_observations(
    reader: impl Read,
    path: &str,
    fields: &ObservationFields,
) -> Result<Vec<RawObservation>, LoadError> {
    let mut table = Table::new(reader, path)?;
    let species = table.column(&fields.species)?;
    let count = table.column(&fields.count)?;
    let longitude = table.column(&fields.longitude)?;
    let latitude = table.column(&fields.latitude)?;
    let date = table.optional_column(&fields.date);
    let unit_code = table.optional_column(&fields.unit_code);

    let mut observations = Vec::new();
    table.for_each_row(|row| {
        let observed_on = match date {
            Some(index) => row.date(index, &fields.date, &fields.date_format)?,
            None => None,
        };
        observations.push(RawObservation {
            species: row.required_text(species, &fields.species)?.to_string(),
            count: row.count(count, &fields.count)?,
            longitude: row.required_number(longitude, &fields.longitude)?,
            latitude: row.required_number(latitude, &fields.latitude)?,
            observed_on,
            raw_unit_code: unit_code.and_then(|index| row.text(index)).map(str::to_string),
        });
        Ok(())
    })?;

    log::info!("Read {} observations from {path}", observations.len());
    Ok(observations)
}

fn read_densities(
    reader: impl Read,
    path: &str,
    fields: &DensityFields,
) -> Result<Vec<RawDensity>, LoadError> {
    let mut table = Table::new(reader, path)?;
    let unit_code = table.column(&fields.unit_code)?;
    let density = table.column(&fields.density)?;
    let survey_year = table.column(&fields.survey_year)?;

    let mut densities = Vec::new();
    table.for_each_row(|row| {
        let raw_unit_code = row.required_text(unit_code, &fields.unit_code)?.to_string();
        // A unit without a density estimate is the same as no row.
        let Some(value) = row.number(density, &fields.density)? else {
            log::debug!("{path} line {}: no density for unit {raw_unit_code}", row.line);
            return Ok(());
        };
        densities.push(RawDensity {
            raw_unit_code,
            density: value,
            survey_year: row.year(survey_year, &fields.survey_year)?,
        });
        Ok(())
    })?;

    log::info!("Read {} density records from {path}", densities.len());
    Ok(densities)
}

fn read_predictions(
    reader: impl Read,
    path: &str,
    fields: &PredictionFields,
) -> Result<Vec<RawPrediction>, LoadError> {
    let mut table = Table::new(reader, path)?;
    let cell_id = table.column(&fields.cell_id)?;
    let abundance = table.column(&fields.abundance)?;

    let mut predictions = Vec::new();
    table.for_each_row(|row| {
        predictions.push(RawPrediction {
            cell_id: row.required_text(cell_id, &fields.cell_id)?.to_string(),
            abundance: row.number(abundance, &fields.abundance)?,
        });
        Ok(())
    })?;

    log::info!("Read {} predictions from {path}", predictions.len());
    Ok(predictions)
}

/// A CSV reader with its trimmed header row.
struct Table<'a, R> {
    path: &'a str,
    reader: csv::Reader<R>,
    headers: Vec<String>,
}

impl<'a, R: Read> Table<'a, R> {
    fn new(reader: R, path: &'a str) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|source| LoadError::Csv {
                path: path.to_string(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_owned())
            .collect();
        Ok(Self {
            path,
            reader,
            headers,
        })
    }

    fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn column(&self, name: &str) -> Result<usize, LoadError> {
        self.optional_column(name)
            .ok_or_else(|| LoadError::MissingField {
                path: self.path.to_string(),
                field: name.to_string(),
            })
    }

    fn for_each_row(
        &mut self,
        mut f: impl FnMut(&Row<'_>) -> Result<(), LoadError>,
    ) -> Result<(), LoadError> {
        for (i, result) in self.reader.records().enumerate() {
            let record = result.map_err(|source| LoadError::Csv {
                path: self.path.to_string(),
                source,
            })?;
            f(&Row {
                path: self.path,
                // Line 1 is the header.
                line: i + 2,
                record: &record,
            })?;
        }
        Ok(())
    }
}

struct Row<'a> {
    path: &'a str,
    line: usize,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn text(&self, index: usize) -> Option<&str> {
        self.record.get(index).and_then(present)
    }

    fn required_text(&self, index: usize, field: &str) -> Result<&str, LoadError> {
        self.text(index)
            .ok_or_else(|| self.invalid(field, "", "value is required"))
    }

    fn number(&self, index: usize, field: &str) -> Result<Option<f64>, LoadError> {
        self.text(index)
            .map(|value| {
                value
                    .parse::<f64>()
                    .map_err(|e| self.invalid(field, value, &e.to_string()))
            })
            .transpose()
    }

    fn required_number(&self, index: usize, field: &str) -> Result<f64, LoadError> {
        self.number(index, field)?
            .ok_or_else(|| self.invalid(field, "", "value is required"))
    }

    fn count(&self, index: usize, field: &str) -> Result<NonZeroU32, LoadError> {
        let value = self.required_text(index, field)?;
        let count: u32 = value
            .parse()
            .map_err(|e: std::num::ParseIntError| self.invalid(field, value, &e.to_string()))?;
        NonZeroU32::new(count).ok_or_else(|| self.invalid(field, value, "count must be positive"))
    }

    fn year(&self, index: usize, field: &str) -> Result<i32, LoadError> {
        let value = self.required_text(index, field)?;
        value
            .parse()
            .map_err(|e: std::num::ParseIntError| self.invalid(field, value, &e.to_string()))
    }

    fn date(&self, index: usize, field: &str, format: &str) -> Result<Option<NaiveDate>, LoadError> {
        self.text(index)
            .map(|value| {
                NaiveDate::parse_from_str(value, format)
                    .map_err(|e| self.invalid(field, value, &e.to_string()))
            })
            .transpose()
    }

    fn invalid(&self, field: &str, value: &str, reason: &str) -> LoadError {
        LoadError::InvalidValue {
            path: self.path.to_string(),
            line: self.line,
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn present(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && !value.eq_ignore_ascii_case("NA")).then_some(value)
}
