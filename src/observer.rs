//! Caregiver-side alert observer.
//!
//! Turns raw keyspace snapshots into an ordered list of [`Alert`]s: newest
//! first, ties broken by ascending key, so the same snapshot always renders
//! the same way.

use std::sync::Arc;
use std::time::Duration;

use crate::alert::{Alert, AlertId, AlertRecord};
use crate::error::{RelayError, RelayResult};
use crate::keyspace::PatientId;
use crate::store::{RealtimeStore, Snapshot, SnapshotEvent, SnapshotStream, StoreError};
use crate::subscription::{Subscription, SubscriptionConfig};

/// Materialize a snapshot into alerts, newest first.
///
/// Children that do not decode as an alert record (no recognizable `type`)
/// are skipped with a warning. A missing or `null` `timestamp` counts as 0
/// and sorts last; float timestamps are truncated to whole milliseconds.
#[must_use]
pub fn materialize_alerts(snapshot: &Snapshot) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = snapshot
        .iter()
        .filter_map(|(key, value)| match serde_json::from_value::<AlertRecord>(value.clone()) {
            Ok(record) => Some(Alert::new(AlertId::new(key), record)),
            Err(e) => {
                tracing::warn!(path = %snapshot.path(), key, error = %e, "skipping undecodable alert");
                None
            }
        })
        .collect();

    alerts.sort_by(|a, b| {
        b.timestamp()
            .cmp(&a.timestamp())
            .then_with(|| a.id.cmp(&b.id))
    });
    alerts
}

/// Pull-style alert subscription drained by the caller.
#[derive(Debug)]
pub struct AlertFeed {
    stream: SnapshotStream,
}

impl AlertFeed {
    fn materialize(event: SnapshotEvent) -> RelayResult<Vec<Alert>> {
        match event {
            SnapshotEvent::Snapshot(snapshot) => Ok(materialize_alerts(&snapshot)),
            SnapshotEvent::Error(e) => Err(RelayError::Store(e)),
        }
    }

    /// Block until the next materialized list arrives.
    ///
    /// # Errors
    /// The store's subscription error, or `Disconnected` after it.
    pub fn next(&self) -> RelayResult<Vec<Alert>> {
        Self::materialize(self.stream.recv()?)
    }

    /// Like [`next`](Self::next) with a deadline.
    ///
    /// # Errors
    /// `Timeout` if nothing arrived in time, otherwise as for `next`.
    pub fn next_timeout(&self, timeout: Duration) -> RelayResult<Vec<Alert>> {
        Self::materialize(self.stream.recv_timeout(timeout)?)
    }

    /// The next list if one is already queued.
    ///
    /// # Errors
    /// As for `next`.
    pub fn try_next(&self) -> RelayResult<Option<Vec<Alert>>> {
        self.stream.try_recv()?.map(Self::materialize).transpose()
    }

    /// Stop the underlying subscription. Idempotent.
    pub fn unsubscribe(&self) {
        self.stream.unsubscribe();
    }
}

/// Observes patient keyspaces on behalf of a caregiver.
#[derive(Clone)]
pub struct AlertObserver {
    store: Arc<dyn RealtimeStore>,
    config: SubscriptionConfig,
}

impl std::fmt::Debug for AlertObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertObserver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertObserver {
    /// Observer with default subscription tuning.
    #[must_use]
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self::with_config(store, SubscriptionConfig::default())
    }

    /// Observer with explicit subscription tuning.
    #[must_use]
    pub fn with_config(store: Arc<dyn RealtimeStore>, config: SubscriptionConfig) -> Self {
        Self { store, config }
    }

    /// Pull-style subscription to `alerts/{patient_id}`.
    #[must_use]
    pub fn alerts_feed(&self, patient_id: &PatientId) -> AlertFeed {
        AlertFeed {
            stream: self.store.subscribe(&patient_id.alerts_path()),
        }
    }

    /// Call `on_alerts` with the full ordered alert list after subscribing
    /// and after every change. Subscription errors are logged.
    ///
    /// # Errors
    /// `SubscriptionError::WorkerSpawn` if the delivery worker cannot start.
    pub fn subscribe_to_alerts<F>(&self, patient_id: &PatientId, on_alerts: F) -> RelayResult<Subscription>
    where
        F: FnMut(Vec<Alert>) + Send + 'static,
    {
        let patient = patient_id.clone();
        self.subscribe_to_alerts_with_errors(patient_id, on_alerts, move |error| {
            tracing::warn!(patient_id = %patient, %error, "alert subscription failed");
        })
    }

    /// Like [`subscribe_to_alerts`](Self::subscribe_to_alerts), routing the
    /// subscription error to `on_error`. Nothing is delivered after an error.
    ///
    /// # Errors
    /// `SubscriptionError::WorkerSpawn` if the delivery worker cannot start.
    pub fn subscribe_to_alerts_with_errors<F, E>(
        &self,
        patient_id: &PatientId,
        mut on_alerts: F,
        mut on_error: E,
    ) -> RelayResult<Subscription>
    where
        F: FnMut(Vec<Alert>) + Send + 'static,
        E: FnMut(StoreError) + Send + 'static,
    {
        let stream = self.store.subscribe(&patient_id.alerts_path());
        let sub = Subscription::spawn("alerts", stream, self.config.poll_interval(), move |event| match event {
            SnapshotEvent::Snapshot(snapshot) => {
                let alerts = materialize_alerts(&snapshot);
                tracing::debug!(path = %snapshot.path(), count = alerts.len(), "alerts materialized");
                on_alerts(alerts);
            }
            SnapshotEvent::Error(error) => on_error(error),
        })?;
        tracing::info!(patient_id = %patient_id, "subscribed to alerts");
        Ok(sub)
    }
}
