//! Patient-side response correlator.
//!
//! Caregiver responses are nested inside alert records, and every snapshot
//! carries all of them again. The correlator remembers which
//! `(alertId, response timestamp)` pairs it has already dispatched so each
//! response produces its side effects once per subscription. The memory is
//! deliberately not persisted: a fresh subscription re-announces whatever
//! responses its first snapshot contains.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertId, CaregiverResponse, ResponseKey};
use crate::error::{RelayError, RelayResult};
use crate::feedback::{announcement_for, SpeechSink, VoiceSettings};
use crate::keyspace::PatientId;
use crate::store::{RealtimeStore, Snapshot, SnapshotEvent, SnapshotStream, StoreError};
use crate::subscription::{Subscription, SubscriptionConfig};

/// A caregiver response seen for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    /// Alert the response is attached to.
    pub alert_id: AlertId,
    /// The response itself.
    pub response: CaregiverResponse,
}

impl ResponseEvent {
    /// Deduplication key.
    #[must_use]
    pub fn key(&self) -> ResponseKey {
        ResponseKey::new(self.alert_id.clone(), &self.response)
    }

    /// Phrase to speak to the patient.
    #[must_use]
    pub fn announcement(&self) -> String {
        announcement_for(&self.response)
    }
}

/// Deduplicating state machine over snapshots.
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    announced: HashSet<ResponseKey>,
}

impl ResponseCorrelator {
    /// Correlator with an empty dispatched set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses in `snapshot` not dispatched before, in key order. Each
    /// returned response is recorded as dispatched.
    pub fn ingest(&mut self, snapshot: &Snapshot) -> Vec<ResponseEvent> {
        let mut fresh = Vec::new();
        for (key, value) in snapshot.iter() {
            let Some(raw) = value.get("caregiverResponse") else {
                continue;
            };
            if raw.is_null() {
                continue;
            }
            let response: CaregiverResponse = match serde_json::from_value(raw.clone()) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(path = %snapshot.path(), alert_id = key, error = %e, "skipping undecodable caregiver response");
                    continue;
                }
            };

            let event = ResponseEvent {
                alert_id: AlertId::new(key),
                response,
            };
            if self.announced.insert(event.key()) {
                tracing::info!(
                    alert_id = key,
                    action = event.response.caregiver_action.as_str(),
                    timestamp = %event.response.timestamp,
                    "new caregiver response"
                );
                fresh.push(event);
            }
        }
        fresh
    }

    /// Whether `key` has been dispatched.
    #[must_use]
    pub fn has_dispatched(&self, key: &ResponseKey) -> bool {
        self.announced.contains(key)
    }

    /// Number of dispatched responses.
    #[must_use]
    pub fn dispatched_count(&self) -> usize {
        self.announced.len()
    }
}

/// Pull-style response subscription; the caller performs side effects.
#[derive(Debug)]
pub struct ResponseFeed {
    stream: SnapshotStream,
    correlator: ResponseCorrelator,
}

impl ResponseFeed {
    fn correlate(&mut self, event: SnapshotEvent) -> RelayResult<Vec<ResponseEvent>> {
        match event {
            SnapshotEvent::Snapshot(snapshot) => Ok(self.correlator.ingest(&snapshot)),
            SnapshotEvent::Error(e) => Err(RelayError::Store(e)),
        }
    }

    /// Block for the next snapshot and return its new responses (possibly
    /// none).
    ///
    /// # Errors
    /// The store's subscription error, or `Disconnected` after it.
    pub fn next(&mut self) -> RelayResult<Vec<ResponseEvent>> {
        let event = self.stream.recv()?;
        self.correlate(event)
    }

    /// Like [`next`](Self::next) with a deadline.
    ///
    /// # Errors
    /// `Timeout` if nothing arrived in time, otherwise as for `next`.
    pub fn next_timeout(&mut self, timeout: Duration) -> RelayResult<Vec<ResponseEvent>> {
        let event = self.stream.recv_timeout(timeout)?;
        self.correlate(event)
    }

    /// New responses from an already-queued snapshot, if any.
    ///
    /// # Errors
    /// As for `next`.
    pub fn try_next(&mut self) -> RelayResult<Option<Vec<ResponseEvent>>> {
        match self.stream.try_recv()? {
            Some(event) => self.correlate(event).map(Some),
            None => Ok(None),
        }
    }

    /// The feed's correlator state.
    #[must_use]
    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// Stop the underlying subscription. Idempotent.
    pub fn unsubscribe(&self) {
        self.stream.unsubscribe();
    }
}

/// Listens for caregiver responses on the patient device and speaks them.
#[derive(Clone)]
pub struct CaregiverResponseListener {
    store: Arc<dyn RealtimeStore>,
    speech: Arc<dyn SpeechSink>,
    voice: VoiceSettings,
    config: SubscriptionConfig,
}

impl std::fmt::Debug for CaregiverResponseListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaregiverResponseListener")
            .field("voice", &self.voice)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CaregiverResponseListener {
    /// Listener speaking with the announcement voice.
    #[must_use]
    pub fn new(store: Arc<dyn RealtimeStore>, speech: Arc<dyn SpeechSink>) -> Self {
        Self {
            store,
            speech,
            voice: VoiceSettings::announcement(),
            config: SubscriptionConfig::default(),
        }
    }

    /// Override the announcement voice.
    #[must_use]
    pub fn with_voice(mut self, voice: VoiceSettings) -> Self {
        self.voice = voice;
        self
    }

    /// Override subscription tuning.
    #[must_use]
    pub fn with_config(mut self, config: SubscriptionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pull-style subscription with a fresh correlator. Nothing is spoken.
    #[must_use]
    pub fn responses_feed(&self, patient_id: &PatientId) -> ResponseFeed {
        ResponseFeed {
            stream: self.store.subscribe(&patient_id.alerts_path()),
            correlator: ResponseCorrelator::new(),
        }
    }

    /// For every response not seen before in this subscription, speak the
    /// announcement and then call `on_response`. Subscription errors are
    /// logged.
    ///
    /// # Errors
    /// `SubscriptionError::WorkerSpawn` if the delivery worker cannot start.
    pub fn subscribe_to_caregiver_responses<F>(
        &self,
        patient_id: &PatientId,
        on_response: F,
    ) -> RelayResult<Subscription>
    where
        F: FnMut(&AlertId, &CaregiverResponse) + Send + 'static,
    {
        let patient = patient_id.clone();
        self.subscribe_to_caregiver_responses_with_errors(patient_id, on_response, move |error| {
            tracing::warn!(patient_id = %patient, %error, "response subscription failed");
        })
    }

    /// Like [`subscribe_to_caregiver_responses`](Self::subscribe_to_caregiver_responses),
    /// routing the subscription error to `on_error`.
    ///
    /// # Errors
    /// `SubscriptionError::WorkerSpawn` if the delivery worker cannot start.
    pub fn subscribe_to_caregiver_responses_with_errors<F, E>(
        &self,
        patient_id: &PatientId,
        mut on_response: F,
        mut on_error: E,
    ) -> RelayResult<Subscription>
    where
        F: FnMut(&AlertId, &CaregiverResponse) + Send + 'static,
        E: FnMut(StoreError) + Send + 'static,
    {
        let stream = self.store.subscribe(&patient_id.alerts_path());
        let speech = Arc::clone(&self.speech);
        let voice = self.voice.clone();
        let mut correlator = ResponseCorrelator::new();

        let sub = Subscription::spawn("responses", stream, self.config.poll_interval(), move |event| match event {
            SnapshotEvent::Snapshot(snapshot) => {
                for fresh in correlator.ingest(&snapshot) {
                    speech.speak(&fresh.announcement(), &voice);
                    on_response(&fresh.alert_id, &fresh.response);
                }
            }
            SnapshotEvent::Error(error) => on_error(error),
        })?;
        tracing::info!(patient_id = %patient_id, "listening for caregiver responses");
        Ok(sub)
    }
}
