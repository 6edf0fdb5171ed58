#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Observation expansion and marker jitter.
//!
//! A survey row with count `n` becomes `n` [`IndividualSighting`]s so a
//! point-density heatmap weights it correctly. Sightings from one row share
//! a location, so each one is nudged by a random offset inside a small disc
//! to keep the markers from stacking. The offset is cosmetic: the original
//! location stays on the sighting as `origin`.
//!
//! Randomness always comes from a caller-supplied [`rand::Rng`].

use std::f64::consts::TAU;
use std::iter::FusedIterator;

use geo::Point;
use moose_map_spatial::UnitIndex;
use moose_map_survey_models::{IndividualSighting, Observation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many redraws [`JitterMode::WithinUnit`] tries before giving up and
/// leaving the marker at its origin.
pub const MAX_WITHIN_UNIT_DRAWS: u32 = 16;

/// Errors that can occur while expanding or jittering sightings.
#[derive(Debug, Error, PartialEq)]
pub enum SightingError {
    /// Jitter radius is negative or not finite.
    #[error("Invalid jitter radius {radius}")]
    InvalidRadius {
        /// The rejected radius.
        radius: f64,
    },
}

/// Whether jitter may move a marker across a unit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    /// Any offset within the radius.
    #[default]
    Free,
    /// Redraw offsets that would leave the sighting's unit.
    WithinUnit,
}

/// Lazily yields one [`IndividualSighting`] per counted animal.
///
/// Cloning restarts the sequence from wherever the clone was taken, so
/// `expand(&obs).clone()` can be consumed as many times as needed.
#[derive(Debug, Clone)]
pub struct Expansion<'a> {
    observation: &'a Observation,
    next: u32,
}

/// Expands `observation` into `observation.count` sightings at its location.
#[must_use]
pub const fn expand(observation: &Observation) -> Expansion<'_> {
    Expansion {
        observation,
        next: 0,
    }
}

/// Expands every observation, in order.
pub fn expand_all(
    observations: &[Observation],
) -> impl Iterator<Item = IndividualSighting> + Clone + '_ {
    observations.iter().flat_map(expand)
}

impl Iterator for Expansion<'_> {
    type Item = IndividualSighting;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.observation.count.get() {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;

        Some(IndividualSighting {
            observation: self.observation.index,
            ordinal,
            species: self.observation.species.clone(),
            unit_code: self.observation.unit_code.clone(),
            origin: self.observation.location,
            location: self.observation.location,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.observation.count.get() - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Expansion<'_> {}

impl FusedIterator for Expansion<'_> {}

/// Displaces `point` by an offset drawn uniformly from a disc of `radius`.
///
/// `radius` is in the units of the point's CRS.
///
/// # Errors
///
/// Returns [`SightingError::InvalidRadius`] if `radius` is negative or not
/// finite.
pub fn jitter<R: Rng + ?Sized>(
    point: Point<f64>,
    radius: f64,
    rng: &mut R,
) -> Result<Point<f64>, SightingError> {
    check_radius(radius)?;
    Ok(offset(point, radius, rng))
}

/// Jitters every sighting independently.
///
/// # Errors
///
/// Returns [`SightingError::InvalidRadius`] if `radius` is negative or not
/// finite.
pub fn jitter_sightings<I, R>(
    sightings: I,
    radius: f64,
    rng: &mut R,
) -> Result<Vec<IndividualSighting>, SightingError>
where
    I: IntoIterator<Item = IndividualSighting>,
    R: Rng + ?Sized,
{
    check_radius(radius)?;
    Ok(sightings
        .into_iter()
        .map(|sighting| IndividualSighting {
            location: offset(sighting.origin, radius, rng),
            ..sighting
        })
        .collect())
}

/// Jitters every sighting, redrawing offsets that would carry the marker
/// out of its unit.
///
/// Sightings whose origin is already outside their unit (e.g. a blank unit
/// code replaced by the default unit) are jittered freely. After
/// [`MAX_WITHIN_UNIT_DRAWS`] failed draws the marker stays at its origin.
///
/// # Errors
///
/// Returns [`SightingError::InvalidRadius`] if `radius` is negative or not
/// finite.
pub fn jitter_within_units<I, R>(
    sightings: I,
    radius: f64,
    units: &UnitIndex,
    rng: &mut R,
) -> Result<Vec<IndividualSighting>, SightingError>
where
    I: IntoIterator<Item = IndividualSighting>,
    R: Rng + ?Sized,
{
    check_radius(radius)?;
    let mut pinned = 0usize;

    let jittered = sightings
        .into_iter()
        .map(|sighting| {
            let location = if units.unit_contains(&sighting.unit_code, sighting.origin) {
                (0..MAX_WITHIN_UNIT_DRAWS)
                    .map(|_| offset(sighting.origin, radius, rng))
                    .find(|candidate| units.unit_contains(&sighting.unit_code, *candidate))
                    .unwrap_or_else(|| {
                        pinned += 1;
                        sighting.origin
                    })
            } else {
                offset(sighting.origin, radius, rng)
            };
            IndividualSighting {
                location,
                ..sighting
            }
        })
        .collect();

    if pinned > 0 {
        log::debug!("{pinned} sightings kept at their origin to stay inside their unit");
    }

    Ok(jittered)
}

fn check_radius(radius: f64) -> Result<(), SightingError> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(SightingError::InvalidRadius { radius })
    }
}

/// Uniform sample from the disc: the square root keeps density even
/// instead of bunching near the centre.
fn offset<R: Rng + ?Sized>(point: Point<f64>, radius: f64, rng: &mut R) -> Point<f64> {
    if radius == 0.0 {
        return point;
    }
    let distance = radius * rng.gen_range(0.0..1.0f64).sqrt();
    let angle = rng.gen_range(0.0..TAU);
    Point::new(
        distance.mul_add(angle.cos(), point.x()),
        distance.mul_add(angle.sin(), point.y()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use geo::{Distance, Euclidean, MultiPolygon, polygon};
    use moose_map_survey_models::{ManagementUnit, UnitCode};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn observation(index: usize, count: u32, x: f64, y: f64) -> Observation {
        Observation {
            index,
            species: "Moose".to_string(),
            count: NonZeroU32::new(count).unwrap(),
            location: Point::new(x, y),
            observed_on: None,
            unit_code: UnitCode::new("515"),
        }
    }

    #[test]
    fn expansion_preserves_count() {
        for count in [1, 2, 3, 17] {
            let obs = observation(0, count, -113.0, 56.0);
            let expansion = expand(&obs);
            assert_eq!(expansion.len(), count as usize);
            assert_eq!(expansion.count(), count as usize);
        }
    }

    #[test]
    fn expansion_is_restartable() {
        let obs = observation(4, 3, -113.0, 56.0);
        let expansion = expand(&obs);
        let first: Vec<_> = expansion.clone().collect();
        let second: Vec<_> = expansion.collect();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(first.iter().all(|s| s.observation == 4));
    }

    #[test]
    fn count_three_expands_within_radius() {
        let obs = observation(0, 3, -113.0, 56.0);
        let radius = 0.01;
        let mut rng = StdRng::seed_from_u64(7);

        let sightings = jitter_sightings(expand(&obs), radius, &mut rng).unwrap();
        assert_eq!(sightings.len(), 3);
        for sighting in &sightings {
            assert_eq!(sighting.origin, Point::new(-113.0, 56.0));
            let moved = Euclidean.distance(sighting.location, sighting.origin);
            assert!(moved <= radius, "sighting moved {moved} > {radius}");
        }
    }

    #[test]
    fn single_sighting_stays_within_radius() {
        let mut rng = StdRng::seed_from_u64(11);
        let origin = Point::new(500_000.0, 6_200_000.0);
        for _ in 0..1000 {
            let moved = jitter(origin, 250.0, &mut rng).unwrap();
            assert!(Euclidean.distance(moved, origin) <= 250.0);
        }
    }

    #[test]
    fn jitter_is_independent_per_sighting() {
        let observations = vec![
            observation(0, 5, 1.0, 1.0),
            observation(1, 5, 1.0, 1.0),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let sightings = jitter_sightings(expand_all(&observations), 0.5, &mut rng).unwrap();

        assert_eq!(sightings.len(), 10);
        for (i, a) in sightings.iter().enumerate() {
            for b in &sightings[i + 1..] {
                assert_ne!(a.location, b.location, "two sightings landed on the same spot");
            }
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let obs = observation(0, 4, 0.0, 0.0);
        let a = jitter_sightings(expand(&obs), 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = jitter_sightings(expand(&obs), 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_radius_keeps_origin() {
        let obs = observation(0, 2, 3.0, 4.0);
        let sightings =
            jitter_sightings(expand(&obs), 0.0, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(sightings.iter().all(|s| s.location == s.origin));
    }

    #[test]
    fn rejects_bad_radius() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            jitter(Point::new(0.0, 0.0), -1.0, &mut rng),
            Err(SightingError::InvalidRadius { radius: -1.0 })
        );
        assert!(jitter(Point::new(0.0, 0.0), f64::INFINITY, &mut rng).is_err());
    }

    #[test]
    fn within_unit_jitter_never_leaves_unit() {
        let unit = ManagementUnit {
            code: UnitCode::new("515"),
            name: "WMU 515".to_string(),
            boundary: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]]),
        };
        let index = UnitIndex::build(&[unit]);
        // Right on the edge, so half of all free draws would land outside.
        let obs = observation(0, 200, 0.999, 0.5);
        let mut rng = StdRng::seed_from_u64(5);

        let sightings = jitter_within_units(expand(&obs), 0.1, &index, &mut rng).unwrap();
        assert_eq!(sightings.len(), 200);
        for sighting in &sightings {
            assert!(index.unit_contains(&sighting.unit_code, sighting.location));
        }
    }
}
