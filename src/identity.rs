//! Patient identity resolution.
//!
//! The patient id is the only thing pairing a patient device with its
//! caregivers: if the two sides disagree, alerts are written where no one
//! listens and nothing reports it. The resolver therefore settles the id
//! once per device, persists it locally, and hands out that same value for
//! the rest of the process.

use std::sync::{Arc, Mutex};

use crate::config::IdentityConfig;
use crate::error::{IdentityError, ValidationError};
use crate::keyspace::PatientId;
use crate::local::{KeyValueStore, LocalStoreError};
use crate::time::{Clock, SystemClock};

/// Local key holding the patient id.
pub const PATIENT_ID_KEY: &str = "patientId";
/// Local key holding the patient's display name.
pub const PATIENT_NAME_KEY: &str = "patientName";
/// Display name used when none has been stored.
pub const DEFAULT_PATIENT_NAME: &str = "Patient";

/// Resolves and persists the device's patient identity.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use care_relay::{IdentityResolver, InMemoryKeyValueStore};
///
/// let resolver = IdentityResolver::new(Arc::new(InMemoryKeyValueStore::new()));
/// let first = resolver.resolve_or_create_patient_identity().unwrap();
/// let second = resolver.resolve_or_create_patient_identity().unwrap();
/// assert_eq!(first, second);
/// assert!(first.as_str().starts_with("patient-"));
/// ```
pub struct IdentityResolver {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    pinned: Option<PatientId>,
    default_name: String,
    resolved: Mutex<Option<PatientId>>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("pinned", &self.pinned)
            .field("default_name", &self.default_name)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Resolver that generates ids from the system clock.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            clock: Arc::new(SystemClock),
            pinned: None,
            default_name: DEFAULT_PATIENT_NAME.to_string(),
            resolved: Mutex::new(None),
        }
    }

    /// Resolver configured from `config`.
    ///
    /// # Errors
    /// The pinned id is not a valid keyspace segment.
    pub fn from_config(kv: Arc<dyn KeyValueStore>, config: &IdentityConfig) -> Result<Self, ValidationError> {
        let mut resolver = Self::new(kv).with_default_name(config.default_patient_name.clone());
        if let Some(pinned) = &config.pinned_patient_id {
            resolver = resolver.with_pinned_id(PatientId::new(pinned)?);
        }
        Ok(resolver)
    }

    /// Use `clock` when generating a new id.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Always resolve to `id`, overwriting whatever is stored.
    #[must_use]
    pub fn with_pinned_id(mut self, id: PatientId) -> Self {
        self.pinned = Some(id);
        self
    }

    /// Name returned when none is stored.
    #[must_use]
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    fn kv_err(key: &'static str) -> impl FnOnce(LocalStoreError) -> IdentityError {
        move |source| IdentityError::LocalStore {
            key: key.to_string(),
            source,
        }
    }

    /// The device's patient id: the pinned id if configured, else the
    /// stored one, else a freshly generated `patient-{epochMillis}` that is
    /// persisted before returning.
    ///
    /// Concurrent callers are serialized; every call in a process returns
    /// the same value.
    ///
    /// # Errors
    /// Local store failures.
    pub fn resolve_or_create_patient_identity(&self) -> Result<PatientId, IdentityError> {
        let mut resolved = self.resolved.lock().map_err(|_| IdentityError::Poisoned)?;
        if let Some(id) = resolved.as_ref() {
            return Ok(id.clone());
        }

        let stored = self.kv.get(PATIENT_ID_KEY).map_err(Self::kv_err(PATIENT_ID_KEY))?;
        let id = if let Some(pinned) = &self.pinned {
            if stored.as_deref() != Some(pinned.as_str()) {
                self.kv
                    .set(PATIENT_ID_KEY, pinned.as_str())
                    .map_err(Self::kv_err(PATIENT_ID_KEY))?;
            }
            tracing::info!(patient_id = %pinned, "using pinned patient identity");
            pinned.clone()
        } else {
            match stored.map(PatientId::new) {
                Some(Ok(id)) => {
                    tracing::info!(patient_id = %id, "restored patient identity");
                    id
                }
                other => {
                    if let Some(Err(e)) = other {
                        tracing::warn!(error = %e, "stored patient id is unusable, generating a new one");
                    }
                    let id = PatientId::new(format!("patient-{}", self.clock.now()))?;
                    self.kv
                        .set(PATIENT_ID_KEY, id.as_str())
                        .map_err(Self::kv_err(PATIENT_ID_KEY))?;
                    tracing::info!(patient_id = %id, "created patient identity");
                    id
                }
            }
        };

        *resolved = Some(id.clone());
        Ok(id)
    }

    /// Stored display name, or the default.
    ///
    /// # Errors
    /// Local store failures.
    pub fn resolve_patient_name(&self) -> Result<String, IdentityError> {
        let stored = self
            .kv
            .get(PATIENT_NAME_KEY)
            .map_err(Self::kv_err(PATIENT_NAME_KEY))?;
        Ok(stored
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.default_name.clone()))
    }

    /// Persist the display name. A blank name clears it.
    ///
    /// # Errors
    /// Local store failures.
    pub fn set_patient_name(&self, name: &str) -> Result<(), IdentityError> {
        let name = name.trim();
        let result = if name.is_empty() {
            self.kv.remove(PATIENT_NAME_KEY)
        } else {
            self.kv.set(PATIENT_NAME_KEY, name)
        };
        result.map_err(Self::kv_err(PATIENT_NAME_KEY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::InMemoryKeyValueStore;
    use crate::time::{EpochMillis, ManualClock};
    use std::thread;

    fn kv() -> Arc<InMemoryKeyValueStore> {
        Arc::new(InMemoryKeyValueStore::new())
    }

    #[test]
    fn test_generates_and_persists() {
        let store = kv();
        let clock = Arc::new(ManualClock::new(EpochMillis::new(1_762_505_870_313)));
        let resolver = IdentityResolver::new(store.clone()).with_clock(clock.clone());

        let id = resolver.resolve_or_create_patient_identity().unwrap();
        assert_eq!(id.as_str(), "patient-1762505870313");
        assert_eq!(store.get(PATIENT_ID_KEY).unwrap().as_deref(), Some(id.as_str()));

        clock.advance(1_000);
        assert_eq!(resolver.resolve_or_create_patient_identity().unwrap(), id);
    }

    #[test]
    fn test_reuses_stored_id_across_resolvers() {
        let store = kv();
        store.set(PATIENT_ID_KEY, "patient-7").unwrap();
        let resolver = IdentityResolver::new(store.clone());
        assert_eq!(resolver.resolve_or_create_patient_identity().unwrap().as_str(), "patient-7");
    }

    #[test]
    fn test_replaces_invalid_stored_id() {
        let store = kv();
        store.set(PATIENT_ID_KEY, "bad/id").unwrap();
        let clock = Arc::new(ManualClock::new(EpochMillis::new(5)));
        let resolver = IdentityResolver::new(store.clone()).with_clock(clock);
        assert_eq!(resolver.resolve_or_create_patient_identity().unwrap().as_str(), "patient-5");
        assert_eq!(store.get(PATIENT_ID_KEY).unwrap().as_deref(), Some("patient-5"));
    }

    #[test]
    fn test_pinned_id_overrides_stored() {
        let store = kv();
        store.set(PATIENT_ID_KEY, "patient-old").unwrap();
        let config = IdentityConfig {
            pinned_patient_id: Some("patient-1762505870313".to_string()),
            ..IdentityConfig::default()
        };
        let resolver = IdentityResolver::from_config(store.clone(), &config).unwrap();
        let id = resolver.resolve_or_create_patient_identity().unwrap();
        assert_eq!(id.as_str(), "patient-1762505870313");
        assert_eq!(store.get(PATIENT_ID_KEY).unwrap().as_deref(), Some("patient-1762505870313"));
    }

    #[test]
    fn test_concurrent_callers_agree() {
        let resolver = Arc::new(IdentityResolver::new(kv()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&resolver);
                thread::spawn(move || r.resolve_or_create_patient_identity().unwrap())
            })
            .collect();
        let ids: Vec<PatientId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_patient_name() {
        let resolver = IdentityResolver::new(kv()).with_default_name("Patient");
        assert_eq!(resolver.resolve_patient_name().unwrap(), "Patient");
        resolver.set_patient_name("  Amina ").unwrap();
        assert_eq!(resolver.resolve_patient_name().unwrap(), "Amina");
        resolver.set_patient_name("").unwrap();
        assert_eq!(resolver.resolve_patient_name().unwrap(), "Patient");
    }
}
