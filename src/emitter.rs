//! Patient-side alert emitter.

use std::sync::Arc;

use crate::alert::{AlertId, AlertRecord, AlertType};
use crate::error::AlertSendError;
use crate::keyspace::PatientId;
use crate::store::RealtimeStore;
use crate::time::{Clock, SystemClock};

/// Writes new alerts into a patient's keyspace.
///
/// Exactly one store write is attempted per [`send_alert`](Self::send_alert)
/// call. A failed write is reported to the caller and never retried, so
/// repeated button presses always map to repeated alerts.
#[derive(Clone)]
pub struct AlertEmitter {
    store: Arc<dyn RealtimeStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AlertEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEmitter").finish_non_exhaustive()
    }
}

impl AlertEmitter {
    /// Emitter stamping alerts with the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Emitter stamping alerts with `clock`.
    #[must_use]
    pub fn with_clock(store: Arc<dyn RealtimeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an unacknowledged alert under `alerts/{patient_id}` and return
    /// its generated key once the store confirms the write.
    ///
    /// # Errors
    ///
    /// `AlertSendError::StoreWrite` if the store rejects or cannot receive
    /// the write.
    pub async fn send_alert(
        &self,
        patient_id: &PatientId,
        patient_name: &str,
        alert_type: AlertType,
        message: &str,
    ) -> Result<AlertId, AlertSendError> {
        let record = AlertRecord::new(
            patient_id.as_str(),
            patient_name,
            alert_type,
            message,
            self.clock.now(),
        );
        let value = serde_json::to_value(&record).map_err(|e| AlertSendError::Encode {
            message: e.to_string(),
        })?;

        match self.store.push(&patient_id.alerts_path(), value).await {
            Ok(alert_id) => {
                tracing::info!(
                    patient_id = %patient_id,
                    alert_type = %alert_type,
                    alert_id = %alert_id,
                    timestamp = %record.timestamp,
                    "alert sent"
                );
                Ok(alert_id)
            }
            Err(source) => {
                tracing::warn!(
                    patient_id = %patient_id,
                    alert_type = %alert_type,
                    error = %source,
                    "alert send failed"
                );
                Err(AlertSendError::StoreWrite {
                    patient_id: patient_id.to_string(),
                    source,
                })
            }
        }
    }
}
