//! Timestamps and clocks.
//!
//! Alert and response timestamps are integer epoch milliseconds set by the
//! writer, never by the store. The clock is injectable so emitters and the
//! identity resolver can be driven deterministically in tests.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// Stored as a bare integer so records stay compatible with other clients of
/// the keyspace. Decoding is lenient about what those clients write: `null`
/// reads as [`EpochMillis::ZERO`] and finite floats are truncated.
///
/// # Examples
///
/// ```
/// use care_relay::EpochMillis;
///
/// let t = EpochMillis::new(1_700_000_000_000);
/// assert_eq!(t.as_i64(), 1_700_000_000_000);
/// assert!(t.to_datetime().is_some());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EpochMillis(i64);

impl EpochMillis {
    /// The epoch itself. Missing timestamps decode to this value.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw millisecond count.
    #[must_use]
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Raw millisecond count.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Converts to a chrono timestamp; `None` if out of chrono's range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// Converts from a chrono timestamp.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_millis())
    }
}

impl fmt::Display for EpochMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct EpochMillisVisitor;

impl<'de> Visitor<'de> for EpochMillisVisitor {
    type Value = EpochMillis;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epoch milliseconds as a number or null")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(EpochMillis(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(EpochMillis(i64::try_from(v).unwrap_or(i64::MAX)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if !v.is_finite() {
            return Err(E::invalid_value(de::Unexpected::Float(v), &self));
        }
        // Saturating truncation toward zero.
        #[allow(clippy::cast_possible_truncation)]
        let millis = v.trunc() as i64;
        Ok(EpochMillis(millis))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(EpochMillis::ZERO)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(EpochMillis::ZERO)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Deserialize<'de> for EpochMillis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EpochMillisVisitor)
    }
}

impl From<i64> for EpochMillis {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

/// Source of "now" for record timestamps.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now(&self) -> EpochMillis;
}

/// Wall clock backed by `chrono::Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EpochMillis {
        EpochMillis::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: EpochMillis) -> Self {
        Self {
            millis: AtomicI64::new(start.as_i64()),
        }
    }

    /// Moves the clock to an absolute time.
    pub fn set(&self, at: EpochMillis) {
        self.millis.store(at.as_i64(), Ordering::SeqCst);
    }

    /// Advances the clock and returns the new time.
    pub fn advance(&self, millis: i64) -> EpochMillis {
        EpochMillis(self.millis.fetch_add(millis, Ordering::SeqCst) + millis)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> EpochMillis {
        EpochMillis(self.millis.load(Ordering::SeqCst))
    }
}
