//! Run configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. See `moose_map.toml` at the crate root for a commented
//! example.

use std::path::Path;

use moose_map_geometry::Crs;
use moose_map_geometry::simplify::SimplifyOptions;
use moose_map_identifier::{
    CodeFormat, CodeNormalizer, DEFAULT_CODE_START, DEFAULT_CODE_WIDTH, IdentifierError,
};
use moose_map_sightings::JitterMode;
use moose_map_survey_models::UnitCode;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub codes: CodesConfig,
    pub crs: CrsConfig,
    pub simplify: SimplifyOptions,
    pub sightings: SightingsConfig,
    pub classify: ClassifyConfig,
    pub region: RegionConfig,
    pub fields: FieldsConfig,
}

impl PipelineConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the TOML is malformed or a
    /// value has the wrong type.
    pub fn from_toml(text: &str) -> Result<Self, PipelineError> {
        toml::de::from_str(text).map_err(|e| PipelineError::Config {
            message: e.to_string(),
        })
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, otherwise
    /// see [`Self::from_toml`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&text)
    }
}

/// How each dataset encodes management unit codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodesConfig {
    /// 1-based character position where the canonical code begins in a
    /// composite code.
    pub code_start: usize,
    /// Exact composite width. Catches codes that lost a leading zero.
    pub expected_width: Option<usize>,
    /// Unit assigned to observations whose unit code is blank.
    pub default_unit: String,
    pub units: CodeFormat,
    pub grid: CodeFormat,
    pub observations: CodeFormat,
    pub densities: CodeFormat,
}

impl Default for CodesConfig {
    fn default() -> Self {
        Self {
            code_start: DEFAULT_CODE_START,
            expected_width: Some(DEFAULT_CODE_WIDTH),
            default_unit: "515".to_string(),
            units: CodeFormat::Composite,
            grid: CodeFormat::Composite,
            observations: CodeFormat::Canonical,
            densities: CodeFormat::Canonical,
        }
    }
}

impl CodesConfig {
    /// Builds the normalizer every dataset shares.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidSettings`] for unusable settings.
    pub fn normalizer(&self) -> Result<CodeNormalizer, IdentifierError> {
        CodeNormalizer::new(self.code_start, self.expected_width)
    }

    /// The configured default unit as a checked canonical code.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::MalformedIdentifier`] if the configured
    /// value is not a valid canonical code.
    pub fn default_unit(&self, normalizer: &CodeNormalizer) -> Result<UnitCode, IdentifierError> {
        normalizer.canonicalize(&self.default_unit, CodeFormat::Canonical)
    }
}

/// Source reference system of each dataset, and the working system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    pub units: Crs,
    pub grid: Crs,
    /// Observation longitude/latitude columns.
    pub observations: Crs,
    pub region: Crs,
    /// Working CRS. Jitter radius and simplification tolerance are in its
    /// units.
    pub target: Crs,
}

impl CrsConfig {
    /// Every dataset already in `crs`, and no reprojection.
    #[must_use]
    pub const fn uniform(crs: Crs) -> Self {
        Self {
            units: crs,
            grid: crs,
            observations: crs,
            region: crs,
            target: crs,
        }
    }
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            units: Crs::Wgs84,
            grid: Crs::Wgs84,
            observations: Crs::Wgs84,
            region: Crs::Wgs84,
            target: Crs::alberta_10tm_forest(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightingsConfig {
    /// Only observations of this species are mapped.
    pub target_species: String,
    /// Jitter disc radius in working CRS units.
    pub jitter_radius: f64,
    pub jitter_mode: JitterMode,
}

impl Default for SightingsConfig {
    fn default() -> Self {
        Self {
            target_species: "Moose".to_string(),
            jitter_radius: 500.0,
            jitter_mode: JitterMode::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Number of quantile classes for the abundance grid.
    pub classes: u32,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self { classes: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Parts of the dissolved outline smaller than this (working CRS units
    /// squared) are dropped.
    pub min_part_area: f64,
}

/// Property and column names the file loaders read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub units: UnitFields,
    pub grid: GridFields,
    pub observations: ObservationFields,
    pub densities: DensityFields,
    pub predictions: PredictionFields,
}

/// `GeoJSON` properties of the unit boundary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitFields {
    pub code: String,
    pub name: String,
}

impl Default for UnitFields {
    fn default() -> Self {
        Self {
            code: "WMUNIT_COD".to_string(),
            name: "WMUNIT_NAM".to_string(),
        }
    }
}

/// `GeoJSON` properties of the grid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridFields {
    pub cell_id: String,
    /// Unit code property. `None` when the grid carries no unit codes and
    /// every cell is assigned by location.
    pub unit_code: Option<String>,
}

impl Default for GridFields {
    fn default() -> Self {
        Self {
            cell_id: "GRID_ID".to_string(),
            unit_code: Some("WMUNIT_COD".to_string()),
        }
    }
}

/// Columns of the survey observation CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationFields {
    pub species: String,
    pub count: String,
    pub longitude: String,
    pub latitude: String,
    pub date: String,
    /// `chrono` format string for the date column.
    pub date_format: String,
    pub unit_code: String,
}

impl Default for ObservationFields {
    fn default() -> Self {
        Self {
            species: "species".to_string(),
            count: "count".to_string(),
            longitude: "longitude".to_string(),
            latitude: "latitude".to_string(),
            date: "date".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            unit_code: "wmu".to_string(),
        }
    }
}

/// Columns of the density CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityFields {
    pub unit_code: String,
    pub density: String,
    pub survey_year: String,
}

impl Default for DensityFields {
    fn default() -> Self {
        Self {
            unit_code: "wmu".to_string(),
            density: "density".to_string(),
            survey_year: "year".to_string(),
        }
    }
}

/// Columns of the prediction CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionFields {
    pub cell_id: String,
    pub abundance: String,
}

impl Default for PredictionFields {
    fn default() -> Self {
        Self {
            cell_id: "grid_id".to_string(),
            abundance: "abundance".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE_TOML: &str = include_str!("../moose_map.toml");

    #[test]
    fn empty_document_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.codes.default_unit, "515");
        assert_eq!(config.crs.target, Crs::alberta_10tm_forest());
        assert_eq!(config.classify.classes, 10);
    }

    #[test]
    fn example_config_parses() {
        let config = PipelineConfig::from_toml(EXAMPLE_TOML).unwrap();
        assert_eq!(config.sightings.target_species, "Moose");
        assert_eq!(config.sightings.jitter_mode, JitterMode::WithinUnit);
        assert!(config.simplify.tolerance > 0.0);
        assert_eq!(config.crs.target, Crs::alberta_10tm_forest());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [codes]
            code_start = 3
            units = "canonical"

            [crs]
            target = "EPSG:32612"
            "#,
        )
        .unwrap();

        assert_eq!(config.codes.code_start, 3);
        assert_eq!(config.codes.units, CodeFormat::Canonical);
        assert_eq!(config.codes.default_unit, "515");
        assert_eq!(config.crs.target, Crs::utm(12, true).unwrap());
        assert_eq!(config.crs.units, Crs::Wgs84);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let err = PipelineConfig::from_toml("[crs]\ntarget = \"EPSG:99999\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));

        let err = PipelineConfig::from_toml("[classify]\nclasses = \"ten\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn default_unit_is_checked() {
        let codes = CodesConfig::default();
        let normalizer = codes.normalizer().unwrap();
        assert_eq!(codes.default_unit(&normalizer).unwrap().as_str(), "515");

        let codes = CodesConfig {
            default_unit: "5-15".to_string(),
            ..CodesConfig::default()
        };
        assert!(codes.default_unit(&normalizer).is_err());
    }

    #[test]
    fn short_composite_code_is_malformed_by_default() {
        let normalizer = CodesConfig::default().normalizer().unwrap();
        assert_eq!(
            normalizer
                .canonicalize("0515", CodeFormat::Composite)
                .unwrap()
                .as_str(),
            "515"
        );
        assert!(matches!(
            normalizer.canonicalize("515", CodeFormat::Composite),
            Err(IdentifierError::MalformedIdentifier { .. })
        ));
        assert_eq!(
            PipelineConfig::from_toml(EXAMPLE_TOML)
                .unwrap()
                .codes
                .expected_width,
            Some(4)
        );
    }
}
