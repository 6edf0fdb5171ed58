#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Quantile classification for thematic color mapping.
//!
//! Classes are a statistic of the whole value population, so a
//! [`Classification`] is only meaningful for the exact slice it was built
//! from. Filter first, then classify.

use thiserror::Error;

/// Errors that can occur during classification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// Fewer than two distinct non-missing values.
    #[error("Cannot classify {distinct} distinct values; at least 2 are required")]
    EmptyPopulation {
        /// Number of distinct non-missing values found.
        distinct: usize,
    },

    /// Class count below 2.
    #[error("Invalid class count {classes}; at least 2 are required")]
    InvalidClassCount {
        /// The rejected class count.
        classes: u32,
    },
}

/// Result of classifying one value population.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    class_count: u32,
    cuts: Vec<f64>,
    classes: Vec<Option<u32>>,
}

impl Classification {
    /// Number of classes requested.
    #[must_use]
    pub const fn class_count(&self) -> u32 {
        self.class_count
    }

    /// The `G - 1` interior cut points, ascending.
    #[must_use]
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// Class per input value, in input order. `None` for missing values.
    #[must_use]
    pub fn classes(&self) -> &[Option<u32>] {
        &self.classes
    }

    #[must_use]
    pub fn into_classes(self) -> Vec<Option<u32>> {
        self.classes
    }

    /// Class `value` would receive against these cut points.
    ///
    /// Values exactly on a cut fall in the lower class.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn class_of(&self, value: f64) -> Option<u32> {
        if !value.is_finite() {
            return None;
        }
        // At most G - 1 cuts, so this fits.
        let above = self.cuts.partition_point(|cut| *cut < value);
        Some(above as u32 + 1)
    }
}

/// Splits the non-missing values into `classes` quantile classes.
///
/// Missing and non-finite values are left out of the population and come
/// back as `None`. Equal values always share a class.
///
/// # Errors
///
/// * [`ClassifyError::InvalidClassCount`] if `classes < 2`
/// * [`ClassifyError::EmptyPopulation`] if fewer than two distinct
///   values remain
pub fn classify(values: &[Option<f64>], classes: u32) -> Result<Classification, ClassifyError> {
    if classes < 2 {
        return Err(ClassifyError::InvalidClassCount { classes });
    }

    let mut population: Vec<f64> = values
        .iter()
        .filter_map(|value| value.filter(|v| v.is_finite()))
        .collect();
    population.sort_by(f64::total_cmp);

    let mut distinct = population.clone();
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(ClassifyError::EmptyPopulation {
            distinct: distinct.len(),
        });
    }

    let cuts: Vec<f64> = (1..classes)
        .map(|k| quantile(&population, f64::from(k) / f64::from(classes)))
        .collect();

    let mut classification = Classification {
        class_count: classes,
        cuts,
        classes: vec![],
    };
    let assigned = values
        .iter()
        .map(|value| value.and_then(|v| classification.class_of(v)))
        .collect();
    classification.classes = assigned;

    log::debug!(
        "Classified {} of {} values into {classes} classes",
        population.len(),
        values.len()
    );

    Ok(classification)
}

/// Linear interpolation between order statistics at `h = (n - 1) p`.
///
/// `sorted` must be non-empty and ascending.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = h - h.floor();
    (sorted[upper] - sorted[lower]).mul_add(fraction, sorted[lower])
}
