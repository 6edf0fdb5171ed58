//! Builders for the four layers of a pipeline run.

use geo::MultiPolygon;
use moose_map_classify::Classification;
use moose_map_join::Joined;
use moose_map_layer_models::{Attributes, Layer, LayerKind, LayerMetadata, ValueDomain};
use moose_map_survey_models::{
    DensityRecord, GridCell, IndividualSighting, ManagementUnit, PredictionRecord,
};

use crate::{LayerError, assemble};

pub const UNITS_LAYER: &str = "management_units";
pub const GRID_LAYER: &str = "abundance_grid";
pub const SIGHTINGS_LAYER: &str = "sightings";
pub const REGION_LAYER: &str = "region";

pub const ATTR_CODE: &str = "code";
pub const ATTR_NAME: &str = "name";
pub const ATTR_DENSITY: &str = "density";
pub const ATTR_SURVEY_YEAR: &str = "survey_year";
pub const ATTR_CELL_ID: &str = "cell_id";
pub const ATTR_UNIT_CODE: &str = "unit_code";
pub const ATTR_ABUNDANCE: &str = "abundance";
pub const ATTR_CLASS: &str = "class";
pub const ATTR_SPECIES: &str = "species";

/// Management units with density and survey year.
///
/// Units without a density record stay in the layer with both attributes
/// [`moose_map_layer_models::AttributeValue::Missing`].
///
/// # Errors
///
/// See [`assemble`].
pub fn units_layer(units: &[Joined<ManagementUnit, DensityRecord>]) -> Result<Layer, LayerError> {
    let geometries = units.iter().map(|row| row.base.boundary.clone()).collect();
    let attributes = units
        .iter()
        .map(|row| {
            Attributes::from([
                (ATTR_CODE.to_string(), row.base.code.as_str().into()),
                (ATTR_NAME.to_string(), row.base.name.as_str().into()),
                (
                    ATTR_DENSITY.to_string(),
                    row.attribute.as_ref().map(|d| d.density).into(),
                ),
                (
                    ATTR_SURVEY_YEAR.to_string(),
                    row.attribute.as_ref().map(|d| d.survey_year).into(),
                ),
            ])
        })
        .collect();

    let value_domain = value_range(
        units
            .iter()
            .filter_map(|row| row.attribute.as_ref())
            .map(|d| d.density),
    );

    assemble(
        UNITS_LAYER,
        LayerKind::Polygon,
        geometries,
        attributes,
        LayerMetadata {
            display_name: "Moose density by WMU".to_string(),
            value_attribute: Some(ATTR_DENSITY.to_string()),
            value_domain,
        },
    )
}

/// Grid cells with their abundance class.
///
/// `classification` must have been computed from exactly these cells'
/// abundances, in order. Cells without a class are left out of the layer.
///
/// # Errors
///
/// [`LayerError::ShapeMismatch`] if `classification` does not have one
/// entry per cell, otherwise see [`assemble`].
pub fn grid_layer(
    cells: &[Joined<GridCell, PredictionRecord>],
    classification: &Classification,
) -> Result<Layer, LayerError> {
    if cells.len() != classification.classes().len() {
        return Err(LayerError::ShapeMismatch {
            layer: GRID_LAYER.to_string(),
            geometries: cells.len(),
            attributes: classification.classes().len(),
        });
    }

    let (geometries, attributes): (Vec<_>, Vec<_>) = cells
        .iter()
        .zip(classification.classes())
        .filter_map(|(row, class)| {
            let class = (*class)?;
            let abundance = row.attribute.as_ref().and_then(|p| p.abundance);
            Some((
                row.base.boundary.clone(),
                Attributes::from([
                    (ATTR_CELL_ID.to_string(), row.base.id.as_str().into()),
                    (ATTR_UNIT_CODE.to_string(), row.base.unit_code.as_str().into()),
                    (ATTR_ABUNDANCE.to_string(), abundance.into()),
                    (ATTR_CLASS.to_string(), class.into()),
                ]),
            ))
        })
        .unzip();

    assemble(
        GRID_LAYER,
        LayerKind::Polygon,
        geometries,
        attributes,
        LayerMetadata {
            display_name: "Predicted moose abundance".to_string(),
            value_attribute: Some(ATTR_CLASS.to_string()),
            value_domain: ValueDomain::Classes {
                count: classification.class_count(),
            },
        },
    )
}

/// Individual sightings at their jittered location.
///
/// # Errors
///
/// See [`assemble`].
pub fn sightings_layer(sightings: &[IndividualSighting]) -> Result<Layer, LayerError> {
    let geometries = sightings.iter().map(|s| s.location).collect();
    let attributes = sightings
        .iter()
        .map(|s| {
            Attributes::from([
                (ATTR_SPECIES.to_string(), s.species.as_str().into()),
                (ATTR_UNIT_CODE.to_string(), s.unit_code.as_str().into()),
            ])
        })
        .collect();

    assemble(
        SIGHTINGS_LAYER,
        LayerKind::Point,
        geometries,
        attributes,
        LayerMetadata {
            display_name: "Moose sightings".to_string(),
            value_attribute: None,
            value_domain: ValueDomain::None,
        },
    )
}

/// The dissolved region outline as a single attribute-less feature.
///
/// An empty outline gives an empty layer.
///
/// # Errors
///
/// See [`assemble`].
pub fn region_layer(outline: MultiPolygon<f64>) -> Result<Layer, LayerError> {
    let (geometries, attributes) = if outline.0.is_empty() {
        (vec![], vec![])
    } else {
        (vec![outline], vec![Attributes::new()])
    };

    assemble(
        REGION_LAYER,
        LayerKind::Polygon,
        geometries,
        attributes,
        LayerMetadata {
            display_name: "Region of interest".to_string(),
            value_attribute: None,
            value_domain: ValueDomain::None,
        },
    )
}

fn value_range(values: impl Iterator<Item = f64>) -> ValueDomain {
    values
        .filter(|v| v.is_finite())
        .fold(None, |range: Option<(f64, f64)>, v| {
            Some(range.map_or((v, v), |(min, max)| (min.min(v), max.max(v))))
        })
        .map_or(ValueDomain::None, |(min, max)| ValueDomain::Range { min, max })
}
