//! Caregiver console.
//!
//! Watches a patient's keyspace, raises one local notification per new
//! unacknowledged alert, and writes responses back onto alerts. Responses
//! are the only writes a caregiver makes; the patient's correlator picks
//! them up from the next snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::alert::{Alert, AlertId, CaregiverAction, CaregiverResponse};
use crate::error::{IdentityError, RelayResult};
use crate::feedback::{LocalNotification, NotificationSink};
use crate::keyspace::PatientId;
use crate::local::KeyValueStore;
use crate::observer::AlertObserver;
use crate::store::{RealtimeStore, StoreError};
use crate::subscription::{Subscription, SubscriptionConfig};
use crate::time::{Clock, EpochMillis, SystemClock};

/// Local key remembering the last patient a console connected to.
pub const CONNECTED_PATIENT_KEY: &str = "connected_patient_id";

/// Caregiver-side console for one caregiver.
pub struct CaregiverConsole {
    caregiver_name: String,
    store: Arc<dyn RealtimeStore>,
    observer: AlertObserver,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    local: Option<Arc<dyn KeyValueStore>>,
}

impl std::fmt::Debug for CaregiverConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaregiverConsole")
            .field("caregiver_name", &self.caregiver_name)
            .finish_non_exhaustive()
    }
}

impl CaregiverConsole {
    /// Console signing its responses as `caregiver_name`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        notifications: Arc<dyn NotificationSink>,
        caregiver_name: impl Into<String>,
    ) -> Self {
        Self {
            caregiver_name: caregiver_name.into(),
            observer: AlertObserver::new(Arc::clone(&store)),
            store,
            notifications,
            clock: Arc::new(SystemClock),
            local: None,
        }
    }

    /// Stamp responses with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Remember connections in `local`.
    #[must_use]
    pub fn with_local_store(mut self, local: Arc<dyn KeyValueStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Override subscription tuning.
    #[must_use]
    pub fn with_subscription_config(mut self, config: SubscriptionConfig) -> Self {
        self.observer = AlertObserver::with_config(Arc::clone(&self.store), config);
        self
    }

    /// Name recorded as `acknowledgedBy`.
    #[must_use]
    pub fn caregiver_name(&self) -> &str {
        &self.caregiver_name
    }

    /// Observe `patient_id`. Every unacknowledged alert raises exactly one
    /// notification for the lifetime of the returned subscription; then
    /// `on_alerts` receives the full ordered list.
    ///
    /// # Errors
    /// Saving the connection locally failed, or the worker could not start.
    pub fn connect<F>(&self, patient_id: &PatientId, mut on_alerts: F) -> RelayResult<Subscription>
    where
        F: FnMut(Vec<Alert>) + Send + 'static,
    {
        if let Some(local) = &self.local {
            local
                .set(CONNECTED_PATIENT_KEY, patient_id.as_str())
                .map_err(|source| IdentityError::LocalStore {
                    key: CONNECTED_PATIENT_KEY.to_string(),
                    source,
                })?;
        }

        let notifications = Arc::clone(&self.notifications);
        let mut shown: HashSet<AlertId> = HashSet::new();
        let sub = self.observer.subscribe_to_alerts(patient_id, move |alerts| {
            for alert in alerts.iter().rev() {
                if !alert.is_acknowledged() && shown.insert(alert.id.clone()) {
                    tracing::info!(alert_id = %alert.id, alert_type = %alert.alert_type(), "new alert");
                    notifications.notify(&alert_notification(alert));
                }
            }
            on_alerts(alerts);
        })?;
        tracing::info!(patient_id = %patient_id, caregiver = %self.caregiver_name, "caregiver connected");
        Ok(sub)
    }

    /// Patient this console last connected to, if remembered.
    ///
    /// # Errors
    /// Reading the local store failed.
    pub fn last_connected_patient(&self) -> RelayResult<Option<PatientId>> {
        let Some(local) = &self.local else {
            return Ok(None);
        };
        let stored = local
            .get(CONNECTED_PATIENT_KEY)
            .map_err(|source| IdentityError::LocalStore {
                key: CONNECTED_PATIENT_KEY.to_string(),
                source,
            })?;
        Ok(stored.and_then(|raw| PatientId::new(raw).ok()))
    }

    fn acknowledgement_fields(&self, now: EpochMillis) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("acknowledged".to_string(), Value::Bool(true));
        fields.insert("acknowledgedAt".to_string(), json!(now));
        fields.insert("acknowledgedBy".to_string(), Value::String(self.caregiver_name.clone()));
        fields
    }

    /// Acknowledge an alert and attach a response the patient will hear.
    ///
    /// # Errors
    /// The store update failed (for example `NotFound` for an unknown alert).
    pub async fn respond(
        &self,
        patient_id: &PatientId,
        alert_id: &AlertId,
        action: CaregiverAction,
        message: &str,
    ) -> RelayResult<CaregiverResponse> {
        let now = self.clock.now();
        let response = CaregiverResponse::new(action, message, now);
        let mut fields = self.acknowledgement_fields(now);
        fields.insert(
            "caregiverResponse".to_string(),
            serde_json::to_value(&response).map_err(|e| StoreError::Serialization(e.to_string()))?,
        );

        self.store.update(&patient_id.alerts_path(), alert_id, fields).await?;
        tracing::info!(
            patient_id = %patient_id,
            alert_id = %alert_id,
            action = action.as_str(),
            "caregiver responded"
        );
        Ok(response)
    }

    /// Acknowledge an alert without a spoken response.
    ///
    /// # Errors
    /// The store update failed.
    pub async fn acknowledge(&self, patient_id: &PatientId, alert_id: &AlertId) -> RelayResult<()> {
        let fields = self.acknowledgement_fields(self.clock.now());
        self.store.update(&patient_id.alerts_path(), alert_id, fields).await?;
        tracing::info!(patient_id = %patient_id, alert_id = %alert_id, "alert acknowledged");
        Ok(())
    }
}

fn alert_notification(alert: &Alert) -> LocalNotification {
    LocalNotification::new(
        format!("{}: {}", alert.record.patient_name, alert.alert_type().label()),
        alert.record.message.clone(),
    )
    .with_data(json!({
        "id": alert.id,
        "type": alert.alert_type(),
        "message": alert.record.message,
        "patientName": alert.record.patient_name,
        "timestamp": alert.timestamp(),
    }))
}
