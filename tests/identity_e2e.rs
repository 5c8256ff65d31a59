use std::sync::Arc;

use care_relay::identity::PATIENT_ID_KEY;
use care_relay::{
    CaregiverConsole, EpochMillis, IdentityConfig, IdentityResolver, InMemoryKeyValueStore, InMemoryRealtimeStore,
    KeyValueStore, ManualClock, RecordingSink, RelayConfig, ValidationError,
};

#[test]
fn resolving_twice_returns_the_same_id() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::new(EpochMillis::new(1_762_505_870_313)));

    let first = IdentityResolver::new(kv.clone())
        .with_clock(clock.clone())
        .resolve_or_create_patient_identity()
        .unwrap();
    clock.advance(60_000);

    // A new resolver over the same local store models an app restart.
    let second = IdentityResolver::new(kv.clone())
        .with_clock(clock)
        .resolve_or_create_patient_identity()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.as_str(), "patient-1762505870313");
}

#[test]
fn pinned_config_pairs_both_devices() {
    let config = RelayConfig::from_json_str(
        r#"{ "identity": { "pinned_patient_id": "patient-1762505870313" } }"#,
    )
    .unwrap()
    .validate()
    .unwrap();
    assert_eq!(
        config.identity,
        IdentityConfig {
            pinned_patient_id: Some("patient-1762505870313".to_string()),
            ..IdentityConfig::default()
        }
    );

    let patient_kv = Arc::new(InMemoryKeyValueStore::new());
    let resolver = IdentityResolver::from_config(patient_kv.clone(), &config.identity).unwrap();
    let patient_id = resolver.resolve_or_create_patient_identity().unwrap();

    let caregiver_kv = Arc::new(InMemoryKeyValueStore::new());
    let console = CaregiverConsole::new(
        Arc::new(InMemoryRealtimeStore::default()),
        Arc::new(RecordingSink::new()),
        "Sara",
    )
    .with_local_store(caregiver_kv);
    let _sub = console.connect(&patient_id, |_| {}).unwrap();

    assert_eq!(console.last_connected_patient().unwrap(), Some(patient_id.clone()));
    assert_eq!(
        patient_kv.get(PATIENT_ID_KEY).unwrap().as_deref(),
        Some(patient_id.as_str())
    );
}

#[test]
fn invalid_pinned_id_is_rejected() {
    let config = IdentityConfig {
        pinned_patient_id: Some("alerts/other".to_string()),
        ..IdentityConfig::default()
    };
    let err = IdentityResolver::from_config(Arc::new(InMemoryKeyValueStore::new()), &config).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidKeySegment { .. }));
}

#[cfg(feature = "persistent")]
mod persistent {
    use super::*;
    use care_relay::{FileKeyValueStore, LocalStoreError};

    #[test]
    fn identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(EpochMillis::new(42)));

        let first = {
            let kv = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
            let resolver = IdentityResolver::new(kv).with_clock(clock.clone());
            resolver.set_patient_name("Amina").unwrap();
            resolver.resolve_or_create_patient_identity().unwrap()
        };

        clock.advance(10_000);
        let kv = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
        let resolver = IdentityResolver::new(kv).with_clock(clock);
        assert_eq!(resolver.resolve_or_create_patient_identity().unwrap(), first);
        assert_eq!(resolver.resolve_patient_name().unwrap(), "Amina");
    }

    #[test]
    fn corrupted_store_is_reported_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = FileKeyValueStore::open(dir.path()).unwrap();
            kv.set(PATIENT_ID_KEY, "patient-1").unwrap();
        }

        let data = dir.path().join("kv.dat");
        let mut bytes = std::fs::read(&data).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&data, bytes).unwrap();

        let err = FileKeyValueStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, LocalStoreError::Corrupted { .. }));
    }
}
