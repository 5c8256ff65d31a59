//! Keyspace addressing.
//!
//! Every patient owns one logical partition of the realtime store:
//! `alerts/{patientId}`, with one child record per alert. The patient id is
//! the sole pairing key between the patient and caregiver clients, so it is
//! validated once, up front, and carried as a [`PatientId`] from then on.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Root under which every patient keyspace lives.
pub const ALERTS_ROOT: &str = "alerts";

/// Maximum key segment length, in bytes.
pub const MAX_SEGMENT_BYTES: usize = 768;

static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn segment_regex() -> &'static Regex {
    // Realtime stores reserve these characters in keys.
    SEGMENT_RE.get_or_init(|| {
        Regex::new(r"^[^./#$\[\]\x00-\x1F\x7F]+$").expect("segment pattern is a valid regex")
    })
}

/// Checks that `segment` is usable as a single path segment.
///
/// # Errors
///
/// Returns `ValidationError::InvalidKeySegment` if the segment is empty, too
/// long, or contains a reserved character.
pub fn validate_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::InvalidKeySegment {
            segment: String::new(),
            reason: "segment is empty".to_string(),
        });
    }
    if segment.len() > MAX_SEGMENT_BYTES {
        return Err(ValidationError::FieldTooLong {
            field: "key segment".to_string(),
            max_length: MAX_SEGMENT_BYTES,
        });
    }
    if !segment_regex().is_match(segment) {
        return Err(ValidationError::InvalidKeySegment {
            segment: segment.to_string(),
            reason: "contains one of . $ # [ ] / or a control character".to_string(),
        });
    }
    Ok(())
}

/// Validated patient identifier.
///
/// # Examples
///
/// ```
/// use care_relay::PatientId;
///
/// let id = PatientId::new("patient-1762505870313").unwrap();
/// assert_eq!(id.alerts_path().as_str(), "alerts/patient-1762505870313");
///
/// assert!(PatientId::new("").is_err());
/// assert!(PatientId::new("a/b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatientId(String);

impl PatientId {
    /// Validates and wraps a patient identifier. Surrounding whitespace is
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyPatientId` for blank input, or a
    /// segment error for reserved characters and oversized ids.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyPatientId);
        }
        validate_segment(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The patient's alert keyspace, `alerts/{patientId}`.
    #[must_use]
    pub fn alerts_path(&self) -> KeyPath {
        KeyPath(format!("{ALERTS_ROOT}/{}", self.0))
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PatientId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PatientId> for String {
    fn from(id: PatientId) -> Self {
        id.0
    }
}

/// Slash-separated path to a keyspace prefix in the realtime store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(String);

impl KeyPath {
    /// Builds a path from validated segments.
    ///
    /// # Errors
    ///
    /// Returns a validation error if there are no segments or any segment is
    /// invalid.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            parts.push(segment.to_string());
        }
        if parts.is_empty() {
            return Err(ValidationError::InvalidKeySegment {
                segment: String::new(),
                reason: "path has no segments".to_string(),
            });
        }
        Ok(Self(parts.join("/")))
    }

    /// The path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path to a child record under this prefix.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `key` is not a valid segment.
    pub fn child(&self, key: &str) -> Result<Self, ValidationError> {
        validate_segment(key)?;
        Ok(Self(format!("{}/{key}", self.0)))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
