use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::Value;

use care_relay::{
    materialize_alerts, AlertEmitter, AlertRecord, AlertType, CaregiverAction, CaregiverResponse, EpochMillis,
    InMemoryRealtimeStore, PatientId, ResponseCorrelator, Snapshot,
};

const ALERTS: u32 = 2_000;

fn make_snapshot(patient: &PatientId, answered_every: u32) -> Snapshot {
    let mut children = BTreeMap::new();
    for i in 0..ALERTS {
        let ts = EpochMillis::new(1_762_505_870_000 + i64::from(i) * 37);
        let alert_type = AlertType::ALL[(i as usize) % AlertType::ALL.len()];
        let mut record = AlertRecord::new(
            patient.as_str(),
            "Bench",
            alert_type,
            alert_type.confirmation_message(),
            ts,
        );
        // A share of alerts carry caregiver responses so the correlator has
        // real work to do.
        if i % answered_every == 0 {
            record.acknowledged = true;
            record.caregiver_response = Some(CaregiverResponse::new(
                CaregiverAction::Coming,
                "on my way",
                EpochMillis::new(ts.as_i64() + 5_000),
            ));
        }
        let value: Value = serde_json::to_value(&record).unwrap();
        children.insert(format!("-Nbench{i:08}"), value);
    }
    Snapshot::new(patient.alerts_path(), children)
}

fn bench_materialize(c: &mut Criterion) {
    let patient = PatientId::new("patient-bench").unwrap();
    let snapshot = make_snapshot(&patient, 4);

    let mut group = c.benchmark_group("relay/materialize");
    group.throughput(Throughput::Elements(u64::from(ALERTS)));
    group.bench_function("sorted_alerts", |b| {
        b.iter(|| black_box(materialize_alerts(black_box(&snapshot))));
    });
    group.finish();
}

fn bench_correlate(c: &mut Criterion) {
    let patient = PatientId::new("patient-bench").unwrap();
    let snapshot = make_snapshot(&patient, 4);

    let mut group = c.benchmark_group("relay/correlate");
    group.throughput(Throughput::Elements(u64::from(ALERTS)));
    group.bench_function("first_snapshot", |b| {
        b.iter_batched(
            ResponseCorrelator::new,
            |mut correlator| black_box(correlator.ingest(&snapshot)),
            BatchSize::SmallInput,
        );
    });
    group.bench_function("redelivered_snapshot", |b| {
        let mut correlator = ResponseCorrelator::new();
        correlator.ingest(&snapshot);
        b.iter(|| black_box(correlator.ingest(black_box(&snapshot))));
    });
    group.finish();
}

fn bench_send_alert(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryRealtimeStore::default());
    let emitter = AlertEmitter::new(store);
    let patient = PatientId::new("patient-bench").unwrap();

    c.bench_function("relay/send_alert", |b| {
        b.iter(|| {
            runtime
                .block_on(emitter.send_alert(&patient, "Bench", AlertType::Water, "Water alert sent"))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_materialize, bench_correlate, bench_send_alert);
criterion_main!(benches);
