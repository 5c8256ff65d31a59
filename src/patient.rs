//! Patient device.
//!
//! Glue around the emitter and the response listener that produces the
//! device feedback a patient expects: a haptic tap (or urgent buzz) on
//! press, a spoken confirmation once the alert is stored, an error
//! notification when it is not, and a spoken announcement plus success
//! buzz when a caregiver responds.

use std::sync::Arc;

use crate::alert::{AlertId, AlertType, CaregiverResponse};
use crate::config::RelayConfig;
use crate::correlator::CaregiverResponseListener;
use crate::emitter::AlertEmitter;
use crate::error::RelayResult;
use crate::feedback::{FeedbackSinks, LocalNotification, VibrationPattern, VoiceSettings, SEND_FAILED_MESSAGE};
use crate::identity::IdentityResolver;
use crate::keyspace::PatientId;
use crate::store::RealtimeStore;
use crate::subscription::Subscription;
use crate::time::Clock;

/// The patient-facing side of the relay.
pub struct PatientDevice {
    patient_id: PatientId,
    patient_name: String,
    store: Arc<dyn RealtimeStore>,
    emitter: AlertEmitter,
    listener: CaregiverResponseListener,
    sinks: FeedbackSinks,
    confirmation_voice: VoiceSettings,
}

impl std::fmt::Debug for PatientDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientDevice")
            .field("patient_id", &self.patient_id)
            .field("patient_name", &self.patient_name)
            .finish_non_exhaustive()
    }
}

impl PatientDevice {
    /// Resolve the device identity and wire the emitter and listener.
    ///
    /// # Errors
    /// Identity resolution failures.
    pub fn new(
        identity: &IdentityResolver,
        store: Arc<dyn RealtimeStore>,
        sinks: FeedbackSinks,
        config: &RelayConfig,
    ) -> RelayResult<Self> {
        let patient_id = identity.resolve_or_create_patient_identity()?;
        let patient_name = identity.resolve_patient_name()?;
        let listener = CaregiverResponseListener::new(Arc::clone(&store), Arc::clone(&sinks.speech))
            .with_voice(config.speech.announcement.clone())
            .with_config(config.subscription.clone());

        tracing::info!(patient_id = %patient_id, patient_name = %patient_name, "patient device ready");
        Ok(Self {
            patient_id,
            patient_name,
            emitter: AlertEmitter::new(Arc::clone(&store)),
            store,
            listener,
            sinks,
            confirmation_voice: config.speech.confirmation.clone(),
        })
    }

    /// Stamp alerts with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.emitter = AlertEmitter::with_clock(Arc::clone(&self.store), clock);
        self
    }

    /// This device's patient id.
    #[must_use]
    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    /// Name written into every alert.
    #[must_use]
    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    /// Handle an alert button press.
    ///
    /// # Errors
    /// The alert could not be stored. The patient has already been shown
    /// the failure notification; pressing again sends a new alert.
    pub async fn press(&self, alert_type: AlertType) -> RelayResult<AlertId> {
        self.sinks.haptics.vibrate(&VibrationPattern::for_alert(alert_type));

        let message = alert_type.confirmation_message();
        match self
            .emitter
            .send_alert(&self.patient_id, &self.patient_name, alert_type, message)
            .await
        {
            Ok(alert_id) => {
                self.sinks.speech.speak(message, &self.confirmation_voice);
                Ok(alert_id)
            }
            Err(e) => {
                self.sinks
                    .notifications
                    .notify(&LocalNotification::new("Error", SEND_FAILED_MESSAGE));
                Err(e.into())
            }
        }
    }

    /// Announce caregiver responses and buzz the success pattern, then call
    /// `on_response`.
    ///
    /// # Errors
    /// The delivery worker could not start.
    pub fn listen_for_responses<F>(&self, mut on_response: F) -> RelayResult<Subscription>
    where
        F: FnMut(&AlertId, &CaregiverResponse) + Send + 'static,
    {
        let haptics = Arc::clone(&self.sinks.haptics);
        self.listener
            .subscribe_to_caregiver_responses(&self.patient_id, move |alert_id, response| {
                haptics.vibrate(&VibrationPattern::success());
                on_response(alert_id, response);
            })
    }
}
