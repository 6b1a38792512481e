//! National business identifiers.
//!
//! # Data Flow
//! ```text
//! raw input
//!     → normalize() (drop grouping spaces)
//!     → validate_format() / Identifier::parse() (length, digits, Luhn)
//!     → Identifier (typed, immutable)
//! ```
//!
//! # Design Decisions
//! - Runs before any cache or network access, so malformed input never
//!   consumes rate-limit budget or pollutes the cache
//! - An establishment id is a company id plus a 5-digit sub-unit suffix;
//!   both the company prefix and the full 14 digits must pass Luhn

pub mod checksum;

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cache::CacheCategory;

pub use checksum::{check_digit, luhn_valid};

/// Length of a company identifier.
pub const COMPANY_DIGITS: usize = 9;

/// Length of an establishment identifier.
pub const ESTABLISHMENT_DIGITS: usize = 14;

/// Why an identifier was rejected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Wrong length or a non-digit character.
    #[error("malformed")]
    Malformed,

    /// Digits are well-formed but the company checksum does not hold.
    #[error("checksum_mismatch")]
    ChecksumMismatch,
}

impl FormatError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            FormatError::Malformed => "malformed",
            FormatError::ChecksumMismatch => "checksum_mismatch",
        }
    }
}

/// Result of [`validate_format`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Identifier class, determined by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierClass {
    /// 9 digits, a legal unit.
    Company,
    /// 14 digits, one establishment of a legal unit.
    Establishment,
}

impl IdentifierClass {
    pub fn digits(self) -> usize {
        match self {
            IdentifierClass::Company => COMPANY_DIGITS,
            IdentifierClass::Establishment => ESTABLISHMENT_DIGITS,
        }
    }

    fn from_len(len: usize) -> Option<Self> {
        match len {
            COMPANY_DIGITS => Some(IdentifierClass::Company),
            ESTABLISHMENT_DIGITS => Some(IdentifierClass::Establishment),
            _ => None,
        }
    }

    /// Cache category holding registry answers for this class.
    pub fn cache_category(self) -> CacheCategory {
        match self {
            IdentifierClass::Company => CacheCategory::Company,
            IdentifierClass::Establishment => CacheCategory::Establishment,
        }
    }
}

/// A well-formed, checksum-valid identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    value: String,
    class: IdentifierClass,
}

impl Identifier {
    /// Validate `raw` strictly (no normalization) and wrap it.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormatError::Malformed);
        }
        let class = IdentifierClass::from_len(raw.len()).ok_or(FormatError::Malformed)?;
        if !luhn_valid(&raw[..COMPANY_DIGITS]) {
            return Err(FormatError::ChecksumMismatch);
        }
        if class == IdentifierClass::Establishment && !luhn_valid(raw) {
            return Err(FormatError::ChecksumMismatch);
        }
        Ok(Self {
            value: raw.to_string(),
            class,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn class(&self) -> IdentifierClass {
        self.class
    }

    /// The 9-digit company part.
    pub fn company_part(&self) -> &str {
        &self.value[..COMPANY_DIGITS]
    }

    /// First three digits, rest masked. Safe for logs.
    pub fn redacted(&self) -> String {
        format!("{}{}", &self.value[..3], "*".repeat(self.value.len() - 3))
    }

    /// Truncated SHA-256 of the full identifier, for correlating audit rows.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.value.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Display for Identifier {
    /// Displays the redacted form; use [`Identifier::as_str`] for the raw value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Strip ASCII spaces used to group digits ("732 829 320").
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(|c| *c != ' ').collect()
}

/// Pure format check: length, digits, checksums.
pub fn validate_format(id: &str) -> FormatCheck {
    match Identifier::parse(id) {
        Ok(_) => FormatCheck {
            valid: true,
            reason: None,
        },
        Err(e) => FormatCheck {
            valid: false,
            reason: Some(e.reason()),
        },
    }
}
