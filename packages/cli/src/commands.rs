//! Subcommand implementations.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use moose_map_cli_utils::{IndicatifProgress, MultiProgress};
use moose_map_classify::classify;
use moose_map_geometry::validate::ensure_valid;
use moose_map_layer::export::write_geojson;
use moose_map_layer_models::{Layer, LayerSet};
use moose_map_pipeline::{PipelineConfig, PipelineInput, RunSummary};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::load;

/// Input files for [`run`].
pub struct InputPaths {
    pub units: PathBuf,
    pub grid: PathBuf,
    pub observations: PathBuf,
    pub densities: PathBuf,
    pub predictions: PathBuf,
    pub region: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            log::info!("No configuration given; using defaults");
            PipelineConfig::default()
        }
    })
}

/// Loads every input, runs the pipeline, and writes the four layer files
/// into `out_dir`.
pub fn run(
    multi: &MultiProgress,
    config: Option<&Path>,
    inputs: &InputPaths,
    out_dir: &Path,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = load_config(config)?;
    let fields = &config.fields;

    let file_count = if inputs.region.is_some() { 6 } else { 5 };
    let reading = IndicatifProgress::files_bar(multi, "Reading inputs", file_count);
    let units = load::load_units(&inputs.units, &fields.units)?;
    reading.inc(1);
    let grid = load::load_grid(&inputs.grid, &fields.grid)?;
    reading.inc(1);
    let observations = load::load_observations(&inputs.observations, &fields.observations)?;
    reading.inc(1);
    let densities = load::load_densities(&inputs.densities, &fields.densities)?;
    reading.inc(1);
    let predictions = load::load_predictions(&inputs.predictions, &fields.predictions)?;
    reading.inc(1);
    let region = match &inputs.region {
        Some(path) => {
            let parts = load::load_region(path)?;
            reading.inc(1);
            parts
        }
        None => Vec::new(),
    };
    reading.finish("Inputs read".to_string());

    let input = PipelineInput {
        units,
        grid,
        observations,
        densities,
        predictions,
        region,
    };

    let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    if let Some(seed) = seed {
        log::info!("Jitter seed: {seed}");
    }

    let progress = IndicatifProgress::stages_bar(multi, "Running pipeline");
    let output = moose_map_pipeline::run(&input, &config, &mut rng, &progress)?;

    std::fs::create_dir_all(out_dir)?;
    write_layers(&output.layers, out_dir)?;
    report(&output.summary);

    log::info!(
        "Wrote layers to {} in {:.1}s",
        out_dir.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn write_layers(layers: &LayerSet, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let files: [(&str, &Layer); 4] = [
        ("units.geojson", &layers.units),
        ("grid.geojson", &layers.grid),
        ("sightings.geojson", &layers.sightings),
        ("region.geojson", &layers.region),
    ];

    for (file_name, layer) in files {
        let path = out_dir.join(file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        write_geojson(layer, &mut writer)?;
        writer.flush()?;
        log::debug!("Wrote {}", path.display());
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    println!("Units in region:        {}", summary.units);
    println!("  without density:      {}", summary.units_without_density);
    println!("Grid cells classified:  {}", summary.classified_cells);
    if summary.unassigned_cells > 0 {
        println!("  outside every unit:   {}", summary.unassigned_cells);
    }
    println!("Observations:           {}", summary.observations);
    println!("  other species:        {}", summary.other_species);
    println!("  default unit:         {}", summary.substituted_units);
    println!("Sightings:              {}", summary.sightings);
}

/// Checks every unit's code and boundary, printing each problem.
///
/// Returns an error if any unit failed.
pub fn validate(units: &Path, config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let normalizer = config.codes.normalizer()?;
    let units = load::load_units(units, &config.fields.units)?;

    let mut problems = 0usize;
    for (index, unit) in units.iter().enumerate() {
        let label = match normalizer.canonicalize(&unit.raw_code, config.codes.units) {
            Ok(code) => code.to_string(),
            Err(e) => {
                println!("feature {index}: {e}");
                problems += 1;
                format!("feature {index}")
            }
        };
        if let Err(e) = ensure_valid(&label, &unit.boundary) {
            println!("{e}");
            problems += 1;
        }
    }

    if problems > 0 {
        return Err(format!("{problems} problem(s) in {} units", units.len()).into());
    }
    println!("{} units OK", units.len());
    Ok(())
}

/// Classifies one numeric column and prints the class table.
pub fn classify_column(
    csv: &Path,
    column: &str,
    classes: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let values = load::load_column(csv, column)?;
    let classification = classify(&values, classes)?;

    println!("{:<6} {:>8} {:>14}", "CLASS", "COUNT", "UPPER BOUND");
    println!("{}", "-".repeat(30));
    for class in 1..=classification.class_count() {
        let count = classification
            .classes()
            .iter()
            .filter(|c| **c == Some(class))
            .count();
        let upper = usize::try_from(class - 1)
            .ok()
            .and_then(|i| classification.cuts().get(i))
            .map_or_else(|| "max".to_string(), |cut| format!("{cut:.4}"));
        println!("{class:<6} {count:>8} {upper:>14}");
    }

    let missing = classification.classes().iter().filter(|c| c.is_none()).count();
    if missing > 0 {
        println!("{missing} missing value(s) left unclassified");
    }
    Ok(())
}
