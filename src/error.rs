//! Error types for care-relay.
//!
//! All errors are strongly typed using thiserror. Each concern owns its own
//! enum and everything rolls up into [`RelayError`], so callers can match on
//! the specific failure (a store write that did not land, a malformed
//! keyspace segment, a broken local key-value store) or just propagate.

use thiserror::Error;

use crate::local::LocalStoreError;
use crate::store::StoreError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Patient id cannot be empty")]
    EmptyPatientId,

    #[error("Invalid key segment '{segment}': {reason}")]
    InvalidKeySegment {
        segment: String,
        reason: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },
}

/// Failure of the patient-side `send_alert` operation.
///
/// The emitter never retries; the caller decides whether to surface a retry
/// prompt.
#[derive(Debug, Error)]
pub enum AlertSendError {
    #[error("Alert write for patient '{patient_id}' failed: {source}")]
    StoreWrite {
        patient_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Alert record could not be encoded: {message}")]
    Encode {
        message: String,
    },
}

/// Failure setting up or consuming a subscription.
///
/// Store-side subscription failures are not reported here: they arrive on
/// the stream's error side channel instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscription stream for '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("No snapshot arrived within {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Failed to start subscription worker: {message}")]
    WorkerSpawn {
        message: String,
    },
}

/// Failure resolving the device's patient identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Local key-value store failed while accessing '{key}': {source}")]
    LocalStore {
        key: String,
        #[source]
        source: LocalStoreError,
    },

    #[error("Invalid patient identity: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Identity resolver state is poisoned")]
    Poisoned,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Read {
        path: String,
        message: String,
    },

    #[error("Failed to parse config: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

/// Top-level error type for care-relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Send error: {0}")]
    Send(#[from] AlertSendError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RelayError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an alert send failure.
    #[must_use]
    pub const fn is_send(&self) -> bool {
        matches!(self, Self::Send(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if a manual retry by the user may succeed.
    ///
    /// Only connectivity failures qualify. Nothing in this crate acts on
    /// this automatically.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Send(AlertSendError::StoreWrite { source, .. }) | Self::Store(source) => {
                source.is_connectivity()
            }
            Self::Subscription(SubscriptionError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

/// Result type alias for care-relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
