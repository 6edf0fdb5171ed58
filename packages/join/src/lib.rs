#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Attribute joins and region filtering.
//!
//! Record schemas declare their join key through [`Keyed`], so joining a
//! density table onto grid cells (or any other mismatched pair) fails to
//! compile instead of silently matching nothing. Joins are left-outer:
//! every base row survives, and rows without a match carry `None` rather
//! than a zero.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use moose_map_survey_models::{
    CellId, DensityRecord, GridCell, IndividualSighting, ManagementUnit, Observation,
    PredictionRecord, UnitCode,
};
use thiserror::Error;

/// Errors that can occur during joins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    /// More than one attribute row matched a single key.
    #[error("Ambiguous join: {matches} attribute rows share key {key:?}")]
    AmbiguousJoin {
        /// The duplicated key.
        key: String,
        /// How many attribute rows carry it.
        matches: usize,
    },

    /// A base table that must have unique keys does not.
    #[error("Duplicate key {key:?} appears {occurrences} times in base table")]
    DuplicateKey {
        /// The duplicated key.
        key: String,
        /// How many rows carry it.
        occurrences: usize,
    },
}

/// A record schema with a declared join key.
pub trait Keyed {
    /// Key type shared by every schema this one joins with.
    type Key: Ord + Clone + Display;

    fn key(&self) -> &Self::Key;
}

impl Keyed for ManagementUnit {
    type Key = UnitCode;

    fn key(&self) -> &UnitCode {
        &self.code
    }
}

impl Keyed for DensityRecord {
    type Key = UnitCode;

    fn key(&self) -> &UnitCode {
        &self.unit_code
    }
}

impl Keyed for GridCell {
    type Key = CellId;

    fn key(&self) -> &CellId {
        &self.id
    }
}

impl Keyed for PredictionRecord {
    type Key = CellId;

    fn key(&self) -> &CellId {
        &self.cell_id
    }
}

/// A record that belongs to a management unit and can be region-filtered.
pub trait InRegion {
    fn unit_code(&self) -> &UnitCode;
}

impl InRegion for ManagementUnit {
    fn unit_code(&self) -> &UnitCode {
        &self.code
    }
}

impl InRegion for GridCell {
    fn unit_code(&self) -> &UnitCode {
        &self.unit_code
    }
}

impl InRegion for Observation {
    fn unit_code(&self) -> &UnitCode {
        &self.unit_code
    }
}

impl InRegion for IndividualSighting {
    fn unit_code(&self) -> &UnitCode {
        &self.unit_code
    }
}

/// A base row paired with its matching attribute row, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined<B, A> {
    pub base: B,
    /// `None` means "no value", which is distinct from a zero value.
    pub attribute: Option<A>,
}

impl<B: InRegion, A> InRegion for Joined<B, A> {
    fn unit_code(&self) -> &UnitCode {
        self.base.unit_code()
    }
}

/// Left-outer join of `attributes` onto `base` by key.
///
/// The result has exactly one row per base row, in base order.
///
/// # Errors
///
/// Returns [`JoinError::AmbiguousJoin`] if two attribute rows share a key.
pub fn join<B, A>(base: &[B], attributes: &[A]) -> Result<Vec<Joined<B, A>>, JoinError>
where
    B: Keyed + Clone,
    A: Keyed<Key = B::Key> + Clone,
{
    let index = unique_index(attributes)?;

    let joined: Vec<Joined<B, A>> = base
        .iter()
        .map(|row| Joined {
            base: row.clone(),
            attribute: index.get(row.key()).map(|attr| (*attr).clone()),
        })
        .collect();

    let matched = joined.iter().filter(|row| row.attribute.is_some()).count();
    log::info!(
        "Joined {} attribute rows onto {} base rows ({matched} matched, {} without a value)",
        attributes.len(),
        base.len(),
        base.len() - matched,
    );

    if log::log_enabled!(log::Level::Debug) {
        let base_keys: BTreeSet<&B::Key> = base.iter().map(Keyed::key).collect();
        for key in index.keys().filter(|key| !base_keys.contains(*key)) {
            log::debug!("Attribute row {key} has no matching base row");
        }
    }

    Ok(joined)
}

/// Checks that no two rows of `rows` share a key.
///
/// # Errors
///
/// Returns [`JoinError::DuplicateKey`] for the first duplicated key.
pub fn ensure_unique<B: Keyed>(rows: &[B]) -> Result<(), JoinError> {
    let counts = key_counts(rows);
    if let Some((key, occurrences)) = counts.into_iter().find(|(_, n)| *n > 1) {
        return Err(JoinError::DuplicateKey {
            key: key.to_string(),
            occurrences,
        });
    }
    Ok(())
}

/// Collects the unit codes present in `rows`.
///
/// Used with the observation table to derive the region of interest, so
/// the visible region follows where survey data actually exists.
#[must_use]
pub fn region_keys<R: InRegion>(rows: &[R]) -> BTreeSet<UnitCode> {
    rows.iter().map(|row| row.unit_code().clone()).collect()
}

/// Keeps only the rows whose unit code is in `allowed`.
///
/// Idempotent: filtering the output again with the same keys returns it
/// unchanged.
#[must_use]
pub fn filter_to_region<R: InRegion + Clone>(rows: &[R], allowed: &BTreeSet<UnitCode>) -> Vec<R> {
    let kept: Vec<R> = rows
        .iter()
        .filter(|row| allowed.contains(row.unit_code()))
        .cloned()
        .collect();

    log::debug!(
        "Region filter kept {} of {} rows ({} units allowed)",
        kept.len(),
        rows.len(),
        allowed.len()
    );

    kept
}

fn unique_index<A: Keyed>(rows: &[A]) -> Result<BTreeMap<&A::Key, &A>, JoinError> {
    let mut index = BTreeMap::new();
    for row in rows {
        if index.insert(row.key(), row).is_some() {
            let matches = rows.iter().filter(|other| other.key() == row.key()).count();
            return Err(JoinError::AmbiguousJoin {
                key: row.key().to_string(),
                matches,
            });
        }
    }
    Ok(index)
}

fn key_counts<B: Keyed>(rows: &[B]) -> BTreeMap<&B::Key, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.key()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiPolygon, polygon};

    fn unit(code: &str) -> ManagementUnit {
        ManagementUnit {
            code: UnitCode::new(code),
            name: format!("WMU {code}"),
            boundary: MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]]),
        }
    }

    fn density(code: &str, value: f64) -> DensityRecord {
        DensityRecord {
            unit_code: UnitCode::new(code),
            density: value,
            survey_year: 2019,
        }
    }

    fn cell(id: &str, unit_code: &str) -> GridCell {
        GridCell {
            id: CellId::new(id),
            unit_code: UnitCode::new(unit_code),
            boundary: MultiPolygon(vec![]),
        }
    }

    #[test]
    fn left_join_preserves_every_base_row() {
        let units = vec![unit("515"), unit("516"), unit("517")];
        let densities = vec![density("515", 0.4), density("999", 1.0)];

        let joined = join(&units, &densities).unwrap();
        assert_eq!(joined.len(), units.len());
        assert_eq!(joined[0].attribute.as_ref().unwrap().density, 0.4);
        assert!(joined[1].attribute.is_none());
        assert!(joined[2].attribute.is_none());
    }

    #[test]
    fn join_cardinality_matches_base_for_many_shapes() {
        let cases: Vec<(Vec<ManagementUnit>, Vec<DensityRecord>)> = vec![
            (vec![], vec![density("515", 1.0)]),
            (vec![unit("515")], vec![]),
            (vec![unit("515"), unit("515")], vec![density("515", 1.0)]),
            (
                vec![unit("1"), unit("2"), unit("3"), unit("4")],
                vec![density("4", 1.0), density("2", 0.0)],
            ),
        ];
        for (base, attrs) in cases {
            let joined = join(&base, &attrs).unwrap();
            assert_eq!(joined.len(), base.len());
        }
    }

    #[test]
    fn zero_density_is_not_missing() {
        let joined = join(&[unit("515")], &[density("515", 0.0)]).unwrap();
        assert_eq!(joined[0].attribute.as_ref().map(|d| d.density), Some(0.0));
    }

    #[test]
    fn duplicate_attribute_key_is_ambiguous() {
        let result = join(
            &[unit("515")],
            &[density("515", 0.4), density("515", 0.5), density("515", 0.6)],
        );
        assert_eq!(
            result,
            Err(JoinError::AmbiguousJoin {
                key: "515".to_string(),
                matches: 3,
            })
        );
    }

    #[test]
    fn many_cells_join_one_prediction_each() {
        let cells = vec![cell("a", "515"), cell("b", "515")];
        let predictions = vec![PredictionRecord {
            cell_id: CellId::new("b"),
            abundance: Some(3.5),
        }];
        let joined = join(&cells, &predictions).unwrap();
        assert!(joined[0].attribute.is_none());
        assert_eq!(joined[1].attribute.as_ref().unwrap().abundance, Some(3.5));
    }

    #[test]
    fn region_filter_is_idempotent() {
        let cells = vec![
            cell("a", "515"),
            cell("b", "516"),
            cell("c", "515"),
            cell("d", "530"),
        ];
        let allowed: BTreeSet<UnitCode> = [UnitCode::new("515"), UnitCode::new("530")]
            .into_iter()
            .collect();

        let once = filter_to_region(&cells, &allowed);
        let twice = filter_to_region(&once, &allowed);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn region_filter_applies_to_joined_rows() {
        let joined = join(&[unit("515"), unit("516")], &[density("516", 0.2)]).unwrap();
        let allowed = region_keys(&[unit("516")]);
        let kept = filter_to_region(&joined, &allowed);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].base.code.as_str(), "516");
    }

    #[test]
    fn ensure_unique_reports_duplicates() {
        assert!(ensure_unique(&[unit("515"), unit("516")]).is_ok());
        assert_eq!(
            ensure_unique(&[unit("515"), unit("516"), unit("515")]),
            Err(JoinError::DuplicateKey {
                key: "515".to_string(),
                occurrences: 2,
            })
        );
    }
}
