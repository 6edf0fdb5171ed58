#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map layer types.
//!
//! A [`Layer`] is the boundary artifact between the pipeline and whatever
//! renders it. Fields are private and there are no mutating methods, so a
//! layer cannot change after assembly.

use std::collections::BTreeMap;
use std::fmt;

use geo::Geometry;
use serde::{Deserialize, Serialize};

/// Per-feature attribute mapping, ordered by name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value.
///
/// [`AttributeValue::Missing`] is distinct from zero and renders as a
/// neutral "no data" color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Missing,
}

impl AttributeValue {
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Number(value) => Some(*value),
            Self::Text(_) | Self::Missing => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

/// Geometry family a layer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Polygon,
    Point,
}

impl LayerKind {
    /// Whether `geometry` belongs in a layer of this kind.
    #[must_use]
    pub const fn accepts(self, geometry: &Geometry<f64>) -> bool {
        match self {
            Self::Polygon => matches!(
                geometry,
                Geometry::Polygon(_) | Geometry::MultiPolygon(_)
            ),
            Self::Point => matches!(geometry, Geometry::Point(_) | Geometry::MultiPoint(_)),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polygon => f.write_str("polygon"),
            Self::Point => f.write_str("point"),
        }
    }
}

/// Range of values a renderer should map colors over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueDomain {
    /// No color-mapped attribute.
    None,
    /// Integer classes `1..=count`.
    Classes {
        /// Number of classes.
        count: u32,
    },
    /// Continuous values between `min` and `max`.
    Range {
        /// Smallest observed value.
        min: f64,
        /// Largest observed value.
        max: f64,
    },
}

/// Display metadata for a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub display_name: String,
    /// Attribute the renderer should color by, if any.
    pub value_attribute: Option<String>,
    pub value_domain: ValueDomain,
}

/// One geometry with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeature {
    geometry: Geometry<f64>,
    attributes: Attributes,
}

impl LayerFeature {
    #[must_use]
    pub const fn new(geometry: Geometry<f64>, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Looks up one attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// A named, typed, immutable map layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    features: Vec<LayerFeature>,
    metadata: LayerMetadata,
}

impl Layer {
    /// Packages already-paired features.
    ///
    /// Does not check that each geometry matches `kind`; the assembler in
    /// `moose_map_layer` does.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: LayerKind,
        features: Vec<LayerFeature>,
        metadata: LayerMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            features,
            metadata,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        self.kind
    }

    #[must_use]
    pub fn features(&self) -> &[LayerFeature] {
        &self.features
    }

    #[must_use]
    pub const fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// The four layers one pipeline run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSet {
    /// Management units with density and survey year.
    pub units: Layer,
    /// Grid cells with their abundance class.
    pub grid: Layer,
    /// Jittered individual sightings.
    pub sightings: Layer,
    /// Dissolved region outline.
    pub region: Layer,
}

impl LayerSet {
    /// Layers in draw order, bottom first.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        [&self.region, &self.grid, &self.units, &self.sightings].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, polygon};

    #[test]
    fn optional_values_become_missing() {
        assert_eq!(AttributeValue::from(None::<f64>), AttributeValue::Missing);
        assert_eq!(AttributeValue::from(Some(0.0)), AttributeValue::Number(0.0));
        assert_eq!(AttributeValue::from(Some(2019_i32)), AttributeValue::Integer(2019));
        assert!(AttributeValue::Missing.is_missing());
        assert_eq!(AttributeValue::Integer(3).as_f64(), Some(3.0));
    }

    #[test]
    fn kind_accepts_matching_geometry() {
        let point = Geometry::Point(Point::new(0.0, 0.0));
        let square = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        assert!(LayerKind::Point.accepts(&point));
        assert!(!LayerKind::Point.accepts(&square));
        assert!(LayerKind::Polygon.accepts(&square));
        assert!(!LayerKind::Polygon.accepts(&point));
    }
}
