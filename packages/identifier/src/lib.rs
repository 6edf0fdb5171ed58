#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical management unit code extraction.
//!
//! Boundary files carry a composite code field (e.g. `"0515"`) where the
//! leading characters are a zone prefix and the rest is the unit code the
//! survey and density tables use (`"515"`). Every dataset's code field goes
//! through [`CodeNormalizer::canonicalize`] before any join, so a composite
//! code is never compared against a canonical one.

use moose_map_survey_models::UnitCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default 1-based position where the canonical code starts.
pub const DEFAULT_CODE_START: usize = 2;

/// Width of a composite code such as `"0515"`.
pub const DEFAULT_CODE_WIDTH: usize = 4;

/// Errors that can occur while normalizing identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// The code cannot be split into prefix and canonical code.
    #[error("Malformed identifier {code:?}: {reason}")]
    MalformedIdentifier {
        /// The offending raw code.
        code: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The normalizer settings are unusable.
    #[error("Invalid code settings: {message}")]
    InvalidSettings {
        /// Description of what went wrong.
        message: String,
    },
}

/// How a dataset's code field is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeFormat {
    /// Zone prefix followed by the canonical code (e.g. `"0515"`).
    #[default]
    Composite,
    /// Already the canonical code (e.g. `"515"`).
    Canonical,
}

/// Splits composite codes into prefix and canonical unit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeNormalizer {
    code_start: usize,
    expected_width: Option<usize>,
}

impl Default for CodeNormalizer {
    fn default() -> Self {
        Self {
            code_start: DEFAULT_CODE_START,
            expected_width: None,
        }
    }
}

impl CodeNormalizer {
    /// Creates a normalizer whose canonical code begins at the 1-based
    /// character position `code_start`. With `expected_width` set, composite
    /// codes must be exactly that many characters long.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidSettings`] if `code_start` is zero
    /// or leaves no room for a code within `expected_width`.
    pub fn new(code_start: usize, expected_width: Option<usize>) -> Result<Self, IdentifierError> {
        if code_start == 0 {
            return Err(IdentifierError::InvalidSettings {
                message: "code_start is 1-based and must be at least 1".to_string(),
            });
        }
        if let Some(width) = expected_width
            && width < code_start
        {
            return Err(IdentifierError::InvalidSettings {
                message: format!("expected_width {width} leaves no code after position {code_start}"),
            });
        }
        Ok(Self {
            code_start,
            expected_width,
        })
    }

    /// Number of leading characters stripped from a composite code.
    #[must_use]
    pub const fn prefix_len(&self) -> usize {
        self.code_start - 1
    }

    /// Splits a composite code into its prefix and canonical code.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::MalformedIdentifier`] if the code is too
    /// short, has the wrong width, or the remainder is not alphanumeric.
    pub fn split<'a>(&self, raw: &'a str) -> Result<(&'a str, UnitCode), IdentifierError> {
        let code = raw.trim();
        let width = code.chars().count();

        if let Some(expected) = self.expected_width
            && width != expected
        {
            return Err(malformed(
                raw,
                format!("expected {expected} characters, found {width}"),
            ));
        }
        if width < self.code_start {
            return Err(malformed(
                raw,
                format!(
                    "needs at least {} characters to strip a {}-character prefix",
                    self.code_start,
                    self.prefix_len()
                ),
            ));
        }

        let split_at = code
            .char_indices()
            .nth(self.prefix_len())
            .map_or(code.len(), |(idx, _)| idx);
        let (prefix, rest) = code.split_at(split_at);

        Ok((prefix, checked_code(raw, rest)?))
    }

    /// Strips the prefix from a composite code.
    ///
    /// # Errors
    ///
    /// See [`Self::split`].
    pub fn normalize(&self, raw: &str) -> Result<UnitCode, IdentifierError> {
        self.split(raw).map(|(_, code)| code)
    }

    /// Produces the canonical code for a field encoded as `format`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::MalformedIdentifier`] if the field cannot
    /// be read as a code in the given format.
    pub fn canonicalize(&self, raw: &str, format: CodeFormat) -> Result<UnitCode, IdentifierError> {
        match format {
            CodeFormat::Composite => self.normalize(raw),
            CodeFormat::Canonical => checked_code(raw, raw.trim()),
        }
    }

    /// Resolves an observation's unit code, substituting `default_unit`
    /// when the source left the field blank.
    ///
    /// Returns the code and whether the fallback was used.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::MalformedIdentifier`] if a present code is
    /// malformed. Blank codes are not errors.
    pub fn resolve_or_default(
        &self,
        raw: Option<&str>,
        format: CodeFormat,
        default_unit: &UnitCode,
    ) -> Result<(UnitCode, bool), IdentifierError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(code) => Ok((self.canonicalize(code, format)?, false)),
            None => {
                log::trace!("Blank unit code, substituting default unit {default_unit}");
                Ok((default_unit.clone(), true))
            }
        }
    }
}

fn checked_code(raw: &str, code: &str) -> Result<UnitCode, IdentifierError> {
    if code.is_empty() {
        return Err(malformed(raw, "no code after prefix".to_string()));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed(
            raw,
            format!("code {code:?} is not alphanumeric"),
        ));
    }
    Ok(UnitCode::new(code))
}

fn malformed(raw: &str, reason: String) -> IdentifierError {
    IdentifierError::MalformedIdentifier {
        code: raw.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_default_prefix() {
        let normalizer = CodeNormalizer::default();
        assert_eq!(normalizer.normalize("0515").unwrap().as_str(), "515");
        assert_eq!(normalizer.normalize(" 0357 ").unwrap().as_str(), "357");
    }

    #[test]
    fn reprefix_roundtrip() {
        let normalizer = CodeNormalizer::new(3, Some(5)).unwrap();
        for raw in ["00515", "01841", "AB123", "99001"] {
            let (prefix, code) = normalizer.split(raw).unwrap();
            assert_eq!(prefix.len(), 2);
            assert_eq!(
                code.with_prefix(prefix),
                raw,
                "roundtrip failed for {raw} -> {code}"
            );
        }
    }

    #[test]
    fn too_short_is_malformed() {
        let normalizer = CodeNormalizer::default();
        assert!(matches!(
            normalizer.normalize("0"),
            Err(IdentifierError::MalformedIdentifier { .. })
        ));
        assert!(matches!(
            normalizer.normalize(""),
            Err(IdentifierError::MalformedIdentifier { .. })
        ));
    }

    #[test]
    fn wrong_width_is_malformed() {
        let normalizer = CodeNormalizer::new(2, Some(4)).unwrap();
        assert!(normalizer.normalize("0515").is_ok());
        assert!(matches!(
            normalizer.normalize("05150"),
            Err(IdentifierError::MalformedIdentifier { .. })
        ));
    }

    #[test]
    fn non_alphanumeric_is_malformed() {
        let normalizer = CodeNormalizer::default();
        assert!(normalizer.normalize("05-5").is_err());
        assert!(
            normalizer
                .canonicalize("5 15", CodeFormat::Canonical)
                .is_err()
        );
    }

    #[test]
    fn canonical_format_only_trims() {
        let normalizer = CodeNormalizer::default();
        let code = normalizer
            .canonicalize(" 515 ", CodeFormat::Canonical)
            .unwrap();
        assert_eq!(code.as_str(), "515");
    }

    #[test]
    fn blank_observation_code_uses_default_unit() {
        let normalizer = CodeNormalizer::default();
        let default_unit = UnitCode::new("515");

        let (code, substituted) = normalizer
            .resolve_or_default(None, CodeFormat::Canonical, &default_unit)
            .unwrap();
        assert_eq!(code.as_str(), "515");
        assert!(substituted);

        let (code, substituted) = normalizer
            .resolve_or_default(Some("  "), CodeFormat::Canonical, &default_unit)
            .unwrap();
        assert_eq!(code, default_unit);
        assert!(substituted);

        let (code, substituted) = normalizer
            .resolve_or_default(Some("0530"), CodeFormat::Composite, &default_unit)
            .unwrap();
        assert_eq!(code.as_str(), "530");
        assert!(!substituted);
    }

    #[test]
    fn rejects_zero_code_start() {
        assert!(CodeNormalizer::new(0, None).is_err());
        assert!(CodeNormalizer::new(4, Some(3)).is_err());
    }
}
