#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate reprojection, polygon validation, and simplification.
//!
//! All layers must share one working CRS before anything distance-based
//! (jitter radius, simplification tolerance, point-in-polygon) runs, since
//! mixing systems produces nonsense rather than an error. [`reproject`] is
//! that step; [`simplify::simplify`] and [`dissolve::dissolve`] assume it
//! already happened.

pub mod crs;
pub mod dissolve;
pub mod simplify;
pub mod validate;

pub use crs::Crs;

use geo::{Coord, MapCoords};
use thiserror::Error;

/// Errors that can occur during geometry operations.
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    /// Input geometry is zero-area, self-intersecting, or otherwise unusable.
    #[error("Invalid geometry for {feature}: {reason}")]
    InvalidGeometry {
        /// Which feature failed (unit code, cell id, or index).
        feature: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A coordinate could not be transformed.
    #[error("Projection error: {message}")]
    Projection {
        /// Description of what went wrong.
        message: String,
    },

    /// A CRS identifier could not be resolved.
    #[error("Unknown CRS {value:?}: {message}")]
    UnknownCrs {
        /// The identifier as given.
        value: String,
        /// Why it was rejected.
        message: String,
    },

    /// Simplification tolerance is negative or not finite.
    #[error("Invalid simplification tolerance {tolerance}")]
    InvalidTolerance {
        /// The rejected tolerance.
        tolerance: f64,
    },
}

/// Transforms every coordinate of `geometry` from `from` into `to`.
///
/// Returns a new geometry; the input is untouched.
///
/// # Errors
///
/// Returns [`GeometryError::Projection`] if any coordinate falls outside
/// either system's domain.
pub fn reproject<G>(geometry: &G, from: &Crs, to: &Crs) -> Result<G, GeometryError>
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from == to {
        return Ok(geometry.clone());
    }
    let (from, to) = (*from, *to);
    geometry.try_map_coords(move |coord: Coord<f64>| from.transform(coord, &to))
}

/// Reprojects a whole collection, failing on the first bad coordinate.
///
/// # Errors
///
/// See [`reproject`].
pub fn reproject_all<G>(geometries: &[G], from: &Crs, to: &Crs) -> Result<Vec<G>, GeometryError>
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from != to {
        log::debug!("Reprojecting {} geometries from {from} to {to}", geometries.len());
    }
    geometries
        .iter()
        .map(|geometry| reproject(geometry, from, to))
        .collect()
}
