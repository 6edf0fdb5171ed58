#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Moose map pipeline orchestration.
//!
//! [`run`] takes fully materialized inputs and produces the four output
//! layers in one pass:
//!
//! 1. Canonicalize every dataset's unit codes, keep target-species
//!    observations, and substitute the default unit for blank codes.
//! 2. Reproject everything into the working CRS.
//! 3. Assign unit-less grid cells by location, derive the region of
//!    interest from the observations, and filter units and cells to it.
//! 4. Left-join densities onto units and predictions onto cells.
//! 5. Classify the abundances of the cells that will actually be drawn.
//! 6. Simplify unit and cell boundaries and dissolve the region outline.
//! 7. Expand and jitter sightings.
//! 8. Assemble the layers.
//!
//! Any error stops the run; there is no partial output.

pub mod config;
pub mod progress;
pub mod stages;

use std::sync::Arc;

use geo::MultiPolygon;
use moose_map_classify::{ClassifyError, classify};
use moose_map_geometry::dissolve::dissolve;
use moose_map_geometry::{GeometryError, reproject_all};
use moose_map_identifier::IdentifierError;
use moose_map_join::{JoinError, ensure_unique, filter_to_region, join, region_keys};
use moose_map_layer::LayerError;
use moose_map_layer::layers::{grid_layer, region_layer, sightings_layer, units_layer};
use moose_map_layer_models::LayerSet;
use moose_map_sightings::{
    JitterMode, SightingError, expand_all, jitter_sightings, jitter_within_units,
};
use moose_map_spatial::UnitIndex;
use moose_map_survey_models::{
    CellFeature, RawDensity, RawObservation, RawPrediction, UnitFeature,
};
use rand::Rng;
use thiserror::Error;

pub use config::PipelineConfig;
pub use progress::{NullProgress, ProgressCallback, null_progress};

use crate::progress::Stage;
use crate::stages::{
    assign_cells, normalize_cells, normalize_densities, normalize_observations,
    normalize_predictions, normalize_units, reproject_cells, reproject_observations,
    reproject_units, simplify_all, validate_all,
};

/// Errors that can terminate a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Sighting(#[from] SightingError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    /// The configuration could not be parsed.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Parser message.
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything one run reads, already loaded into memory.
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub units: Vec<UnitFeature>,
    pub grid: Vec<CellFeature>,
    pub observations: Vec<RawObservation>,
    pub densities: Vec<RawDensity>,
    pub predictions: Vec<RawPrediction>,
    /// Region outline pieces. Empty means the outline is dissolved from
    /// the filtered units.
    pub region: Vec<MultiPolygon<f64>>,
}

/// Counts gathered during a run, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Units in the region of interest.
    pub units: usize,
    /// Region units with no density record.
    pub units_without_density: usize,
    /// Region cells with a prediction.
    pub cells: usize,
    /// Cells that received a class.
    pub classified_cells: usize,
    /// Cells with no unit code whose centroid fell outside every unit.
    pub unassigned_cells: usize,
    /// Target-species observations.
    pub observations: usize,
    /// Observation rows dropped for being another species.
    pub other_species: usize,
    /// Observations given the default unit.
    pub substituted_units: usize,
    /// Individual sightings after expansion.
    pub sightings: usize,
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub layers: LayerSet,
    pub summary: RunSummary,
}

/// Runs every stage over `input`.
///
/// `rng` drives sighting jitter; pass a seeded generator for reproducible
/// output.
///
/// # Errors
///
/// Returns the first error any stage reports. See [`PipelineError`].
#[allow(clippy::too_many_lines)]
pub fn run<R: Rng + ?Sized>(
    input: &PipelineInput,
    config: &PipelineConfig,
    rng: &mut R,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<PipelineOutput, PipelineError> {
    progress.set_total(Stage::ALL.len() as u64);

    Stage::Normalize.start(progress);
    let codes = &config.codes;
    let normalizer = codes.normalizer()?;
    let default_unit = codes.default_unit(&normalizer)?;

    let units = normalize_units(&input.units, &normalizer, codes.units)?;
    let cells = normalize_cells(&input.grid, &normalizer, codes.grid)?;
    let batch = normalize_observations(
        &input.observations,
        &normalizer,
        codes.observations,
        &default_unit,
        &config.sightings.target_species,
    )?;
    let densities = normalize_densities(&input.densities, &normalizer, codes.densities)?;
    let predictions = normalize_predictions(&input.predictions);

    Stage::Reproject.start(progress);
    let crs = &config.crs;
    log::info!("Working CRS is {}", crs.target);
    let units = reproject_units(&units, &crs.units, &crs.target)?;
    let cells = reproject_cells(&cells, &crs.grid, &crs.target)?;
    let observations =
        reproject_observations(&batch.observations, &crs.observations, &crs.target)?;
    let region_parts = reproject_all(&input.region, &crs.region, &crs.target)?;

    Stage::Region.start(progress);
    let unit_index = UnitIndex::build(&units);
    let (cells, unassigned_cells) = assign_cells(&cells, &unit_index);

    let region = region_keys(&observations);
    log::info!(
        "Region of interest has {} units: {}",
        region.len(),
        region
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let units = filter_to_region(&units, &region);
    let cells = filter_to_region(&cells, &region);
    ensure_unique(&units)?;
    ensure_unique(&cells)?;
    validate_all(&units)?;
    validate_all(&cells)?;
    let region_index = UnitIndex::build(&units);

    Stage::Join.start(progress);
    let units = join(&units, &densities)?;
    let cells: Vec<_> = join(&cells, &predictions)?
        .into_iter()
        .filter(|row| row.attribute.as_ref().is_some_and(|p| p.abundance.is_some()))
        .collect();
    let units_without_density = units.iter().filter(|row| row.attribute.is_none()).count();
    log::info!("{} region cells have a prediction", cells.len());

    Stage::Classify.start(progress);
    let abundances: Vec<Option<f64>> = cells
        .iter()
        .map(|row| row.attribute.as_ref().and_then(|p| p.abundance))
        .collect();
    let classification = classify(&abundances, config.classify.classes)?;

    Stage::Simplify.start(progress);
    let units = simplify_all(&units, &config.simplify)?;
    let cells = simplify_all(&cells, &config.simplify)?;
    let outline = if region_parts.is_empty() {
        let boundaries: Vec<MultiPolygon<f64>> =
            units.iter().map(|row| row.base.boundary.clone()).collect();
        dissolve(&boundaries, config.region.min_part_area)
    } else {
        dissolve(&region_parts, config.region.min_part_area)
    };

    Stage::Sightings.start(progress);
    let radius = config.sightings.jitter_radius;
    warn_on_large_radius(&region_index, radius);
    let expanded = expand_all(&observations);
    let sightings = match config.sightings.jitter_mode {
        JitterMode::Free => jitter_sightings(expanded, radius, rng)?,
        JitterMode::WithinUnit => jitter_within_units(expanded, radius, &region_index, rng)?,
    };
    log::info!(
        "Expanded {} observations into {} sightings",
        observations.len(),
        sightings.len()
    );

    Stage::Assemble.start(progress);
    let layers = LayerSet {
        units: units_layer(&units)?,
        grid: grid_layer(&cells, &classification)?,
        sightings: sightings_layer(&sightings)?,
        region: region_layer(outline)?,
    };

    let summary = RunSummary {
        units: units.len(),
        units_without_density,
        cells: cells.len(),
        classified_cells: layers.grid.len(),
        unassigned_cells,
        observations: observations.len(),
        other_species: batch.other_species,
        substituted_units: batch.substituted,
        sightings: sightings.len(),
    };

    progress.inc(1);
    progress.finish(format!(
        "{} units, {} cells, {} sightings",
        summary.units, summary.classified_cells, summary.sightings
    ));

    Ok(PipelineOutput { layers, summary })
}

/// Warns when `radius` exceeds a tenth of the smallest unit's extent.
fn warn_on_large_radius(units: &UnitIndex, radius: f64) {
    if let Some(extent) = units.min_extent()
        && radius > extent * 0.1
    {
        log::warn!(
            "Jitter radius {radius} is large for the smallest unit extent ({extent}); markers may drift across unit boundaries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use geo::{Area, Distance, Euclidean, Point, polygon};
    use moose_map_geometry::Crs;
    use moose_map_geometry::simplify::SimplifyOptions;
    use moose_map_layer::layers::{ATTR_CELL_ID, ATTR_CLASS, ATTR_CODE, ATTR_DENSITY, ATTR_SPECIES};
    use moose_map_layer_models::{AttributeValue, LayerFeature};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::config::CrsConfig;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn unit(raw_code: &str, x0: f64, y0: f64) -> UnitFeature {
        UnitFeature {
            raw_code: raw_code.to_string(),
            name: format!("WMU {raw_code}"),
            boundary: square(x0, y0, 1.0),
        }
    }

    fn cell(id: &str, raw_unit_code: Option<&str>, x0: f64, y0: f64) -> CellFeature {
        CellFeature {
            cell_id: id.to_string(),
            raw_unit_code: raw_unit_code.map(str::to_string),
            boundary: square(x0, y0, 0.5),
        }
    }

    fn observation(species: &str, count: u32, x: f64, y: f64, code: Option<&str>) -> RawObservation {
        RawObservation {
            species: species.to_string(),
            count: NonZeroU32::new(count).unwrap(),
            longitude: x,
            latitude: y,
            observed_on: None,
            raw_unit_code: code.map(str::to_string),
        }
    }

    fn prediction(id: &str, abundance: Option<f64>) -> RawPrediction {
        RawPrediction {
            cell_id: id.to_string(),
            abundance,
        }
    }

    /// Units 515 and 516 side by side with moose in both, and unit 517
    /// far away with only deer.
    fn two_unit_input() -> PipelineInput {
        PipelineInput {
            units: vec![
                unit("0515", 0.0, 0.0),
                unit("0516", 1.0, 0.0),
                unit("0517", 5.0, 5.0),
            ],
            grid: vec![
                cell("c1", Some("0515"), 0.0, 0.0),
                cell("c2", Some("0515"), 0.5, 0.0),
                cell("c3", Some("0515"), 0.0, 0.5),
                cell("c4", Some("0515"), 0.5, 0.5),
                cell("c5", Some("0516"), 1.0, 0.0),
                cell("c6", Some("0516"), 1.5, 0.0),
                cell("c7", None, 1.0, 0.5),
                cell("c8", None, 1.5, 0.5),
                cell("c9", Some("0517"), 5.0, 5.0),
            ],
            observations: vec![
                observation("Moose", 3, 0.5, 0.5, Some("515")),
                observation("Moose", 2, 1.5, 0.5, Some("516")),
                observation("Moose", 1, 0.25, 0.25, None),
                observation("Deer", 4, 5.5, 5.5, Some("517")),
            ],
            densities: vec![
                RawDensity {
                    raw_unit_code: "515".to_string(),
                    density: 0.31,
                    survey_year: 2019,
                },
                RawDensity {
                    raw_unit_code: "517".to_string(),
                    density: 0.2,
                    survey_year: 2017,
                },
            ],
            predictions: vec![
                prediction("c1", Some(1.0)),
                prediction("c2", Some(2.0)),
                prediction("c3", Some(3.0)),
                prediction("c4", None),
                prediction("c5", Some(4.0)),
                prediction("c6", Some(5.0)),
                prediction("c7", Some(6.0)),
                prediction("c9", Some(100.0)),
            ],
            region: vec![],
        }
    }

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig {
            crs: CrsConfig::uniform(Crs::Wgs84),
            simplify: SimplifyOptions {
                tolerance: 0.01,
                ..SimplifyOptions::default()
            },
            ..PipelineConfig::default()
        };
        config.sightings.jitter_radius = 0.01;
        config.sightings.jitter_mode = JitterMode::WithinUnit;
        config.classify.classes = 3;
        config
    }

    fn run_seeded(input: &PipelineInput, config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
        run(input, config, &mut StdRng::seed_from_u64(17), &null_progress())
    }

    fn find<'a>(features: &'a [LayerFeature], name: &str, value: &str) -> &'a LayerFeature {
        features
            .iter()
            .find(|f| f.attribute(name) == Some(&AttributeValue::from(value)))
            .unwrap_or_else(|| panic!("no feature with {name} = {value}"))
    }

    #[test]
    fn two_unit_end_to_end() {
        let output = run_seeded(&two_unit_input(), &test_config()).unwrap();
        let layers = &output.layers;

        // Region follows the moose observations: 515 and 516, not 517.
        assert_eq!(layers.units.len(), 2);
        let unit_515 = find(layers.units.features(), ATTR_CODE, "515");
        let unit_516 = find(layers.units.features(), ATTR_CODE, "516");
        assert_eq!(unit_515.attribute(ATTR_DENSITY), Some(&AttributeValue::Number(0.31)));
        assert_eq!(unit_516.attribute(ATTR_DENSITY), Some(&AttributeValue::Missing));

        // c4 has a null prediction, c8 has none, c9 is outside the region.
        assert_eq!(layers.grid.len(), 6);
        for feature in layers.grid.features() {
            let Some(AttributeValue::Integer(class)) = feature.attribute(ATTR_CLASS) else {
                panic!("grid feature without a class: {feature:?}");
            };
            assert!((1..=3).contains(class));
        }
        // c7 had no unit code and was placed in 516 by location.
        find(layers.grid.features(), ATTR_CELL_ID, "c7");

        // 3 + 2 + 1 moose; the deer never appear.
        assert_eq!(layers.sightings.len(), 6);
        assert!(
            layers
                .sightings
                .features()
                .iter()
                .all(|f| f.attribute(ATTR_SPECIES) == Some(&AttributeValue::from("Moose")))
        );

        assert_eq!(layers.region.len(), 1);
        let geo::Geometry::MultiPolygon(outline) = layers.region.features()[0].geometry() else {
            panic!("region outline is not a multipolygon");
        };
        assert!((outline.unsigned_area() - 2.0).abs() < 1e-9);

        assert_eq!(
            output.summary,
            RunSummary {
                units: 2,
                units_without_density: 1,
                cells: 6,
                classified_cells: 6,
                unassigned_cells: 0,
                observations: 3,
                other_species: 1,
                substituted_units: 1,
                sightings: 6,
            }
        );
    }

    #[test]
    fn sightings_stay_near_their_origin() {
        let output = run_seeded(&two_unit_input(), &test_config()).unwrap();
        let origins = [Point::new(0.5, 0.5), Point::new(1.5, 0.5), Point::new(0.25, 0.25)];

        for feature in output.layers.sightings.features() {
            let geo::Geometry::Point(point) = feature.geometry() else {
                panic!("sighting is not a point");
            };
            assert!(
                origins.iter().any(|o| Euclidean.distance(*o, *point) <= 0.01),
                "sighting {point:?} is not within the jitter radius of any observation"
            );
        }
    }

    #[test]
    fn classes_are_computed_after_region_filtering() {
        let output = run_seeded(&two_unit_input(), &test_config()).unwrap();
        let class_of = |id: &str| {
            find(output.layers.grid.features(), ATTR_CELL_ID, id)
                .attribute(ATTR_CLASS)
                .cloned()
        };

        // Region population is 1..=6; c9's 100.0 is outside the region.
        assert_eq!(class_of("c3"), Some(AttributeValue::Integer(2)));
        assert_eq!(class_of("c6"), Some(AttributeValue::Integer(3)));

        // Classifying the unfiltered predictions would have put c3 in class 1.
        let everything: Vec<Option<f64>> = two_unit_input()
            .predictions
            .iter()
            .map(|p| p.abundance)
            .collect();
        let stale = classify(&everything, 3).unwrap();
        assert_eq!(stale.classes()[2], Some(1));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let input = two_unit_input();
        let config = test_config();
        let a = run_seeded(&input, &config).unwrap();
        let b = run_seeded(&input, &config).unwrap();
        assert_eq!(a.layers, b.layers);
    }

    #[test]
    fn supplied_region_outline_is_used() {
        let mut input = two_unit_input();
        input.region = vec![square(-1.0, -1.0, 4.0)];
        let output = run_seeded(&input, &test_config()).unwrap();

        let geo::Geometry::MultiPolygon(outline) = output.layers.region.features()[0].geometry()
        else {
            panic!("region outline is not a multipolygon");
        };
        assert!((outline.unsigned_area() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_unit_code_stops_the_run() {
        let mut input = two_unit_input();
        input.units[0].raw_code = "5".to_string();
        assert!(matches!(
            run_seeded(&input, &test_config()),
            Err(PipelineError::Identifier(IdentifierError::MalformedIdentifier { .. }))
        ));
    }

    #[test]
    fn duplicate_density_stops_the_run() {
        let mut input = two_unit_input();
        input.densities.push(RawDensity {
            raw_unit_code: "515".to_string(),
            density: 0.4,
            survey_year: 2021,
        });
        assert!(matches!(
            run_seeded(&input, &test_config()),
            Err(PipelineError::Join(JoinError::AmbiguousJoin { .. }))
        ));
    }

    #[test]
    fn self_intersecting_unit_stops_the_run() {
        let mut input = two_unit_input();
        input.units[0].boundary = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 0.5),
            (x: 0.0, y: 0.0),
        ]]);
        assert!(matches!(
            run_seeded(&input, &test_config()),
            Err(PipelineError::Geometry(GeometryError::InvalidGeometry { .. }))
        ));
    }

    #[test]
    fn single_valued_predictions_cannot_be_classified() {
        let mut input = two_unit_input();
        for prediction in &mut input.predictions {
            prediction.abundance = prediction.abundance.map(|_| 7.0);
        }
        assert!(matches!(
            run_seeded(&input, &test_config()),
            Err(PipelineError::Classify(ClassifyError::EmptyPopulation { distinct: 1 }))
        ));
    }

    #[test]
    fn projected_working_crs() {
        let mut input = two_unit_input();
        // Shift everything into Alberta so the 10TM projection is sensible.
        let shift = |mp: &MultiPolygon<f64>| {
            use geo::Translate;
            mp.translate(-115.0, 55.0)
        };
        for unit in &mut input.units {
            unit.boundary = shift(&unit.boundary);
        }
        for cell in &mut input.grid {
            cell.boundary = shift(&cell.boundary);
        }
        for observation in &mut input.observations {
            observation.longitude -= 115.0;
            observation.latitude += 55.0;
        }

        let mut config = test_config();
        config.crs.target = Crs::alberta_10tm_forest();
        config.sightings.jitter_radius = 250.0;
        config.simplify.tolerance = 50.0;

        let output = run_seeded(&input, &config).unwrap();
        assert_eq!(output.layers.units.len(), 2);
        assert_eq!(output.layers.sightings.len(), 6);
        let geo::Geometry::MultiPolygon(outline) = output.layers.region.features()[0].geometry()
        else {
            panic!("region outline is not a multipolygon");
        };
        // Two 1-degree squares at 55N are roughly 2 * 111 km * 64 km.
        let area_km2 = outline.unsigned_area() / 1e6;
        assert!((12_000.0..16_000.0).contains(&area_km2), "area {area_km2} km2");
    }
}
