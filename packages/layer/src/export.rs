//! `GeoJSON` export for layers.
//!
//! Each layer becomes a `FeatureCollection`. [`AttributeValue::Missing`]
//! serializes as JSON `null`, so "no data" stays distinct from zero on the
//! renderer side. Layer metadata is carried as foreign members of the
//! collection.

use std::io::Write;

use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};
use moose_map_layer_models::{AttributeValue, Layer};

use crate::LayerError;

/// Converts `layer` into a `GeoJSON` feature collection.
///
/// # Errors
///
/// Returns [`LayerError::Serialize`] if the layer metadata cannot be
/// represented as JSON.
pub fn to_feature_collection(layer: &Layer) -> Result<FeatureCollection, LayerError> {
    let features = layer
        .features()
        .iter()
        .map(|feature| Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(
                feature.geometry(),
            ))),
            id: None,
            properties: Some(
                feature
                    .attributes()
                    .iter()
                    .map(|(name, value)| (name.clone(), attribute_json(value)))
                    .collect(),
            ),
            foreign_members: None,
        })
        .collect();

    let mut foreign = JsonObject::new();
    foreign.insert("name".to_string(), JsonValue::from(layer.name()));
    foreign.insert("kind".to_string(), serde_json::to_value(layer.kind())?);
    foreign.insert("metadata".to_string(), serde_json::to_value(layer.metadata())?);

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    })
}

/// Writes `layer` to `writer` as a `GeoJSON` document.
///
/// # Errors
///
/// Returns [`LayerError::Serialize`] if serialization or the underlying
/// write fails.
pub fn write_geojson<W: Write>(layer: &Layer, writer: W) -> Result<(), LayerError> {
    let collection = to_feature_collection(layer)?;
    serde_json::to_writer(writer, &collection)?;
    log::info!(
        "Exported {} {} features for layer {}",
        layer.len(),
        layer.kind(),
        layer.name()
    );
    Ok(())
}

fn attribute_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Text(text) => JsonValue::from(text.as_str()),
        AttributeValue::Integer(number) => JsonValue::from(*number),
        // Non-finite numbers have no JSON form and become null.
        AttributeValue::Number(number) => JsonValue::from(*number),
        AttributeValue::Missing => JsonValue::Null,
    }
}
