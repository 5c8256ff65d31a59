use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use care_relay::{
    Alert, AlertEmitter, AlertObserver, AlertType, CaregiverAction, CaregiverConsole, FeedbackSinks,
    IdentityResolver, InMemoryKeyValueStore, InMemoryRealtimeStore, PatientDevice, PatientId, RealtimeStore,
    RecordingSink, RelayConfig, StoreError,
};
use care_relay::feedback::COMING_PHRASE;
use care_relay::time::{EpochMillis, ManualClock};

const WAIT: Duration = Duration::from_secs(5);

fn patient(id: &str) -> PatientId {
    PatientId::new(id).unwrap()
}

/// Drain deliveries until one satisfies `pred`.
fn wait_until(rx: &mpsc::Receiver<Vec<Alert>>, pred: impl Fn(&[Alert]) -> bool) -> Vec<Alert> {
    loop {
        let alerts = rx.recv_timeout(WAIT).expect("no matching delivery");
        if pred(&alerts) {
            return alerts;
        }
    }
}

#[tokio::test]
async fn sent_alert_is_observed_under_returned_id() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = patient("patient-1762505870313");

    let (tx, rx) = mpsc::channel();
    let _sub = AlertObserver::new(store.clone())
        .subscribe_to_alerts(&pid, move |alerts| {
            let _ = tx.send(alerts);
        })
        .unwrap();

    // Initial snapshot of an empty keyspace is an empty list, not silence.
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    let id = AlertEmitter::new(store.clone())
        .send_alert(&pid, "Amina", AlertType::Water, "Water alert sent")
        .await
        .unwrap();

    let alerts = wait_until(&rx, |alerts| !alerts.is_empty());
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.id, id);
    assert_eq!(alert.alert_type(), AlertType::Water);
    assert_eq!(alert.record.patient_id, pid.as_str());
    assert_eq!(alert.record.patient_name, "Amina");
    assert!(!alert.is_acknowledged());
    assert!(alert.caregiver_response().is_none());
}

#[tokio::test]
async fn alerts_are_delivered_newest_first() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let clock = Arc::new(ManualClock::new(EpochMillis::new(0)));
    let emitter = AlertEmitter::with_clock(store.clone(), clock.clone());
    let pid = patient("p-order");

    for ts in [5, 1, 3] {
        clock.set(EpochMillis::new(ts));
        emitter.send_alert(&pid, "P", AlertType::Pain, "Pain alert sent").await.unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let _sub = AlertObserver::new(store.clone())
        .subscribe_to_alerts(&pid, move |alerts| {
            let _ = tx.send(alerts);
        })
        .unwrap();

    let alerts = rx.recv_timeout(WAIT).unwrap();
    let stamps: Vec<i64> = alerts.iter().map(|a| a.timestamp().as_i64()).collect();
    assert_eq!(stamps, vec![5, 3, 1]);
}

#[tokio::test]
async fn keyspaces_are_isolated_per_patient() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let (tx, rx) = mpsc::channel();
    let _sub = AlertObserver::new(store.clone())
        .subscribe_to_alerts(&patient("p-a"), move |alerts| {
            let _ = tx.send(alerts);
        })
        .unwrap();
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    AlertEmitter::new(store.clone())
        .send_alert(&patient("p-b"), "B", AlertType::Bathroom, "Bathroom alert sent")
        .await
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[tokio::test]
async fn urgent_press_to_coming_announcement() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let recorder = Arc::new(RecordingSink::new());
    let pid = patient("patient-1762505870313");

    let identity = IdentityResolver::new(Arc::new(InMemoryKeyValueStore::new())).with_pinned_id(pid.clone());
    identity.set_patient_name("Amina").unwrap();
    let device = PatientDevice::new(
        &identity,
        store.clone(),
        FeedbackSinks::recording(&recorder),
        &RelayConfig::default(),
    )
    .unwrap();

    let (resp_tx, resp_rx) = mpsc::channel();
    let _responses = device
        .listen_for_responses(move |alert_id, response| {
            let _ = resp_tx.send((alert_id.clone(), response.clone()));
        })
        .unwrap();

    let caregiver_notes = Arc::new(RecordingSink::new());
    let console = CaregiverConsole::new(store.clone(), caregiver_notes.clone(), "Nurse Sara");
    let (alert_tx, alert_rx) = mpsc::channel();
    let _alerts = console
        .connect(&pid, move |alerts| {
            let _ = alert_tx.send(alerts);
        })
        .unwrap();

    let id = device.press(AlertType::Urgent).await.unwrap();
    let seen = wait_until(&alert_rx, |alerts| alerts.iter().any(|a| a.id == id));
    assert_eq!(seen[0].alert_type(), AlertType::Urgent);

    console
        .respond(&pid, &id, CaregiverAction::Coming, "I'm coming!")
        .await
        .unwrap();

    let (answered, response) = resp_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(answered, id);
    assert_eq!(response.caregiver_action, CaregiverAction::Coming);

    // The acknowledgement snapshot and any later redelivery must not repeat
    // the announcement.
    device.press(AlertType::Water).await.unwrap();
    wait_until(&alert_rx, |alerts| alerts.len() == 2);
    assert!(resp_rx.recv_timeout(Duration::from_millis(300)).is_err());

    let coming: Vec<String> = recorder.spoken().into_iter().filter(|s| s == COMING_PHRASE).collect();
    assert_eq!(coming.len(), 1);
    assert_eq!(caregiver_notes.notifications().len(), 2);
}

#[tokio::test]
async fn offline_send_fails_without_retry() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = patient("p-offline");
    let emitter = AlertEmitter::new(store.clone());

    store.set_online(false);
    let err = emitter
        .send_alert(&pid, "P", AlertType::Water, "Water alert sent")
        .await
        .unwrap_err();
    assert!(care_relay::RelayError::from(err).is_retryable());
    assert_eq!(store.write_count(), 0);

    store.set_online(true);
    emitter.send_alert(&pid, "P", AlertType::Water, "Water alert sent").await.unwrap();

    let snapshot = store.read(&pid.alerts_path()).await.unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn revoked_access_routes_error_and_stops_delivery() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = patient("p-revoke");

    let (alert_tx, alert_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let sub = AlertObserver::new(store.clone())
        .subscribe_to_alerts_with_errors(
            &pid,
            move |alerts| {
                let _ = alert_tx.send(alerts);
            },
            move |error| {
                let _ = err_tx.send(error);
            },
        )
        .unwrap();
    assert!(alert_rx.recv_timeout(WAIT).unwrap().is_empty());

    store.revoke_access(&pid.alerts_path());
    let error = err_rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(error, StoreError::PermissionDenied(_)));

    store.restore_access(&pid.alerts_path());
    AlertEmitter::new(store.clone())
        .send_alert(&pid, "P", AlertType::Position, "Position change alert sent")
        .await
        .unwrap();
    assert!(alert_rx.recv_timeout(Duration::from_millis(300)).is_err());

    sub.unsubscribe();
    assert!(!sub.is_active());
}

#[tokio::test]
async fn caregiver_notifies_once_per_unacknowledged_alert() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let notes = Arc::new(RecordingSink::new());
    let pid = patient("p-notify");
    let emitter = AlertEmitter::new(store.clone());

    let console = CaregiverConsole::new(store.clone(), notes.clone(), "Sara");
    let (tx, rx) = mpsc::channel();
    let _sub = console
        .connect(&pid, move |alerts| {
            let _ = tx.send(alerts);
        })
        .unwrap();

    let first = emitter.send_alert(&pid, "Amina", AlertType::Water, "Water alert sent").await.unwrap();
    wait_until(&rx, |alerts| alerts.len() == 1);
    console.acknowledge(&pid, &first).await.unwrap();
    wait_until(&rx, |alerts| alerts.iter().all(Alert::is_acknowledged));
    emitter.send_alert(&pid, "Amina", AlertType::Pain, "Pain alert sent").await.unwrap();
    wait_until(&rx, |alerts| alerts.len() == 2);

    let titles: Vec<String> = notes.notifications().into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["Amina: Water".to_string(), "Amina: Pain".to_string()]);
}
