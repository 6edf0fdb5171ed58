#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Layer assembly.
//!
//! [`assemble`] pairs a geometry collection with its attribute rows and
//! wraps them in an immutable [`Layer`]. [`layers`] builds the four output
//! layers of a run, and [`export`] writes any layer as `GeoJSON`.

pub mod export;
pub mod layers;

use geo::Geometry;
use moose_map_layer_models::{Attributes, Layer, LayerFeature, LayerKind, LayerMetadata};
use thiserror::Error;

/// Errors that can occur during layer assembly or export.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Geometry and attribute row counts disagree.
    #[error("Shape mismatch in layer {layer}: {geometries} geometries but {attributes} attribute rows")]
    ShapeMismatch {
        /// Layer being assembled.
        layer: String,
        /// Number of geometries supplied.
        geometries: usize,
        /// Number of attribute rows supplied.
        attributes: usize,
    },

    /// A geometry does not belong in a layer of this kind.
    #[error("Feature {index} of layer {layer} is not a {expected} geometry")]
    GeometryKind {
        /// Layer being assembled.
        layer: String,
        /// Position of the offending feature.
        index: usize,
        /// Kind the layer was declared as.
        expected: LayerKind,
    },

    /// Serializing a layer failed.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Combines `geometries` with one attribute row each into a named layer.
///
/// # Errors
///
/// * [`LayerError::ShapeMismatch`] if the counts differ
/// * [`LayerError::GeometryKind`] if a geometry does not match `kind`
pub fn assemble<G>(
    name: &str,
    kind: LayerKind,
    geometries: Vec<G>,
    attributes: Vec<Attributes>,
    metadata: LayerMetadata,
) -> Result<Layer, LayerError>
where
    G: Into<Geometry<f64>>,
{
    if geometries.len() != attributes.len() {
        return Err(LayerError::ShapeMismatch {
            layer: name.to_string(),
            geometries: geometries.len(),
            attributes: attributes.len(),
        });
    }

    let features = geometries
        .into_iter()
        .zip(attributes)
        .enumerate()
        .map(|(index, (geometry, attributes))| {
            let geometry = geometry.into();
            if kind.accepts(&geometry) {
                Ok(LayerFeature::new(geometry, attributes))
            } else {
                Err(LayerError::GeometryKind {
                    layer: name.to_string(),
                    index,
                    expected: kind,
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("Assembled {kind} layer {name} with {} features", features.len());

    Ok(Layer::new(name, kind, features, metadata))
}
