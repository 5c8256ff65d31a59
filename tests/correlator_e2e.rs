use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use care_relay::{
    AlertEmitter, AlertId, AlertType, CaregiverAction, CaregiverConsole, CaregiverResponse,
    CaregiverResponseListener, EpochMillis, InMemoryRealtimeStore, KeyPath, ManualClock, PatientId,
    RealtimeStore, RecordingSink, ResponseCorrelator, ResponseKey, Snapshot,
};
use care_relay::feedback::COMING_PHRASE;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn responded(ts: i64, action: &str) -> Value {
    json!({
        "patientId": "p1",
        "patientName": "P",
        "type": "urgent",
        "message": "Urgent alert sent",
        "timestamp": 1,
        "acknowledged": true,
        "caregiverResponse": {
            "message": "",
            "timestamp": ts,
            "acknowledged": true,
            "caregiverAction": action,
        }
    })
}

fn snapshot(children: &[(&str, Value)]) -> Snapshot {
    let path = KeyPath::from_segments(["alerts", "p1"]).unwrap();
    let map: BTreeMap<String, Value> = children.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
    Snapshot::new(path, map)
}

#[test]
fn same_snapshot_twice_dispatches_once() {
    let snap = snapshot(&[("a1", responded(10, "coming"))]);
    let mut correlator = ResponseCorrelator::new();

    assert_eq!(correlator.ingest(&snap).len(), 1);
    assert!(correlator.ingest(&snap).is_empty());
    assert_eq!(correlator.dispatched_count(), 1);
}

#[test]
fn distinct_timestamps_on_one_alert_both_dispatch() {
    let mut correlator = ResponseCorrelator::new();
    let first = correlator.ingest(&snapshot(&[("a1", responded(10, "coming"))]));
    let second = correlator.ingest(&snapshot(&[("a1", responded(20, "acknowledged"))]));

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].response.caregiver_action, CaregiverAction::Acknowledged);

    let key = ResponseKey::new(
        AlertId::new("a1"),
        &CaregiverResponse::new(CaregiverAction::Coming, "", EpochMillis::new(10)),
    );
    assert!(correlator.has_dispatched(&key));
    assert_eq!(key.to_string(), "a1-10");
}

#[test]
fn unknown_action_falls_back_to_generic_phrase() {
    let mut correlator = ResponseCorrelator::new();
    let events = correlator.ingest(&snapshot(&[("a1", responded(10, "on-the-phone"))]));
    assert_eq!(events[0].response.caregiver_action, CaregiverAction::Unrecognized);
    assert_eq!(events[0].announcement(), "Your caregiver has responded.");
}

#[tokio::test]
async fn response_with_null_message_is_announced_once() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = PatientId::new("p-null-msg").unwrap();
    let mut record = responded(10, "coming");
    record["caregiverResponse"]["message"] = Value::Null;
    let alert_id = store.push(&pid.alerts_path(), record).await.unwrap();

    let speech = Arc::new(RecordingSink::new());
    let listener = CaregiverResponseListener::new(store.clone(), speech.clone());
    let (tx, rx) = mpsc::channel();
    let _sub = listener
        .subscribe_to_caregiver_responses(&pid, move |id, _| {
            let _ = tx.send(id.clone());
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), alert_id);
    assert!(rx.recv_timeout(QUIET).is_err());
    assert_eq!(speech.spoken(), vec![COMING_PHRASE.to_string()]);
}

#[tokio::test]
async fn resubscribing_reannounces_existing_responses() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = PatientId::new("p-resub").unwrap();
    let alert_id = AlertEmitter::new(store.clone())
        .send_alert(&pid, "P", AlertType::Urgent, "Urgent alert sent")
        .await
        .unwrap();
    CaregiverConsole::new(store.clone(), Arc::new(RecordingSink::new()), "Sara")
        .respond(&pid, &alert_id, CaregiverAction::Coming, "I'm coming!")
        .await
        .unwrap();

    let speech = Arc::new(RecordingSink::new());
    let listener = CaregiverResponseListener::new(store.clone(), speech.clone());

    for round in 1..=2 {
        let (tx, rx) = mpsc::channel();
        let sub = listener
            .subscribe_to_caregiver_responses(&pid, move |id, _| {
                let _ = tx.send(id.clone());
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), alert_id);
        assert!(rx.recv_timeout(QUIET).is_err());
        sub.unsubscribe();
        assert_eq!(speech.spoken().len(), round);
    }
}

#[tokio::test]
async fn unsubscribe_stops_callbacks() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let clock = Arc::new(ManualClock::new(EpochMillis::new(1_000)));
    let pid = PatientId::new("p-unsub").unwrap();
    let alert_id = AlertEmitter::new(store.clone())
        .send_alert(&pid, "P", AlertType::Pain, "Pain alert sent")
        .await
        .unwrap();
    let console = CaregiverConsole::new(store.clone(), Arc::new(RecordingSink::new()), "Sara").with_clock(clock.clone());

    let speech = Arc::new(RecordingSink::new());
    let listener = CaregiverResponseListener::new(store.clone(), speech.clone());
    let (tx, rx) = mpsc::channel();
    let sub = listener
        .subscribe_to_caregiver_responses(&pid, move |_, response| {
            let _ = tx.send(response.timestamp);
        })
        .unwrap();

    console.respond(&pid, &alert_id, CaregiverAction::Coming, "").await.unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), EpochMillis::new(1_000));

    sub.unsubscribe();
    clock.advance(500);
    console
        .respond(&pid, &alert_id, CaregiverAction::Acknowledged, "")
        .await
        .unwrap();

    assert!(rx.recv_timeout(QUIET).is_err());
    assert_eq!(speech.spoken().len(), 1);
}

#[tokio::test]
async fn feed_reports_new_responses_only() {
    let store = Arc::new(InMemoryRealtimeStore::default());
    let pid = PatientId::new("p-feed").unwrap();
    let listener = CaregiverResponseListener::new(store.clone(), Arc::new(RecordingSink::new()));
    let mut feed = listener.responses_feed(&pid);
    assert!(feed.next_timeout(WAIT).unwrap().is_empty());

    let alert_id = AlertEmitter::new(store.clone())
        .send_alert(&pid, "P", AlertType::Water, "Water alert sent")
        .await
        .unwrap();
    assert!(feed.next_timeout(WAIT).unwrap().is_empty());

    CaregiverConsole::new(store.clone(), Arc::new(RecordingSink::new()), "Sara")
        .respond(&pid, &alert_id, CaregiverAction::Acknowledged, "")
        .await
        .unwrap();
    let events = feed.next_timeout(WAIT).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert_id, alert_id);
    assert_eq!(feed.correlator().dispatched_count(), 1);
    feed.unsubscribe();
}
