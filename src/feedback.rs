//! Device output sinks.
//!
//! Speech, haptics and local notifications are fire-and-forget: the relay
//! hands them a request and never waits for or inspects an outcome. Two
//! sinks ship with the crate: [`LoggingSink`] (emits `tracing` events) and
//! [`RecordingSink`] (keeps everything in memory for assertions).

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alert::{AlertType, CaregiverAction, CaregiverResponse};

/// Spoken when the caregiver is on the way.
pub const COMING_PHRASE: &str = "Your caregiver is coming to help you soon. Please wait.";
/// Spoken when the caregiver acknowledged without committing to come.
pub const ACKNOWLEDGED_PHRASE: &str = "Your caregiver has acknowledged your request.";
/// Spoken for any other response that carries no message.
pub const FALLBACK_PHRASE: &str = "Your caregiver has responded.";
/// Shown when an alert could not be written.
pub const SEND_FAILED_MESSAGE: &str = "Failed to send alert. Please check your internet connection.";

/// Text-to-speech parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// BCP 47 language tag.
    pub language: String,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Rate multiplier; below 1.0 is slower than normal speech.
    pub rate: f32,
    /// Volume, 0.0 to 1.0.
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::announcement()
    }
}

impl VoiceSettings {
    /// Voice for caregiver-response announcements, slowed for impaired
    /// listeners.
    #[must_use]
    pub fn announcement() -> Self {
        Self {
            language: "en-US".to_string(),
            pitch: 1.0,
            rate: 0.85,
            volume: 1.0,
        }
    }

    /// Voice for the "alert sent" confirmation.
    #[must_use]
    pub fn confirmation() -> Self {
        Self {
            rate: 0.9,
            ..Self::announcement()
        }
    }
}

/// Haptic request: a single pulse or an off/on sequence in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationPattern {
    /// One pulse of the given length.
    Pulse(u64),
    /// Alternating wait/vibrate durations, starting with a wait.
    Sequence(Vec<u64>),
}

impl VibrationPattern {
    /// Short tap for ordinary button presses.
    #[must_use]
    pub fn tap() -> Self {
        Self::Pulse(100)
    }

    /// Double buzz for urgent presses.
    #[must_use]
    pub fn urgent() -> Self {
        Self::Sequence(vec![0, 200, 100, 200])
    }

    /// Triple buzz when a caregiver response arrives.
    #[must_use]
    pub fn success() -> Self {
        Self::Sequence(vec![0, 200, 100, 200, 100, 200])
    }

    /// Press feedback for an alert button.
    #[must_use]
    pub fn for_alert(alert_type: AlertType) -> Self {
        if alert_type.is_urgent() {
            Self::urgent()
        } else {
            Self::tap()
        }
    }

    /// Total duration including pauses.
    #[must_use]
    pub fn total_millis(&self) -> u64 {
        match self {
            Self::Pulse(ms) => *ms,
            Self::Sequence(steps) => steps.iter().sum(),
        }
    }
}

/// A notification shown on the local device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNotification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LocalNotification {
    /// A notification without payload.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Text-to-speech output.
pub trait SpeechSink: Send + Sync {
    /// Speak `text`; returns immediately.
    fn speak(&self, text: &str, voice: &VoiceSettings);
}

/// Vibration output.
pub trait HapticSink: Send + Sync {
    /// Vibrate; returns immediately.
    fn vibrate(&self, pattern: &VibrationPattern);
}

/// Local notification output.
pub trait NotificationSink: Send + Sync {
    /// Show `notification`; returns immediately.
    fn notify(&self, notification: &LocalNotification);
}

/// Phrase spoken to the patient for a caregiver response.
///
/// # Examples
///
/// ```
/// use care_relay::{announcement_for, CaregiverAction, CaregiverResponse, EpochMillis};
///
/// let r = CaregiverResponse::new(CaregiverAction::Unrecognized, "", EpochMillis::new(1));
/// assert_eq!(announcement_for(&r), "Your caregiver has responded.");
/// ```
#[must_use]
pub fn announcement_for(response: &CaregiverResponse) -> String {
    match response.caregiver_action {
        CaregiverAction::Coming => COMING_PHRASE.to_string(),
        CaregiverAction::Acknowledged => ACKNOWLEDGED_PHRASE.to_string(),
        CaregiverAction::Unrecognized if !response.message.trim().is_empty() => response.message.clone(),
        CaregiverAction::Unrecognized => FALLBACK_PHRASE.to_string(),
    }
}

/// Sink that reports every request as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl SpeechSink for LoggingSink {
    fn speak(&self, text: &str, voice: &VoiceSettings) {
        tracing::info!(language = %voice.language, rate = voice.rate, text, "speak");
    }
}

impl HapticSink for LoggingSink {
    fn vibrate(&self, pattern: &VibrationPattern) {
        tracing::info!(?pattern, "vibrate");
    }
}

impl NotificationSink for LoggingSink {
    fn notify(&self, notification: &LocalNotification) {
        tracing::info!(title = %notification.title, body = %notification.body, "notify");
    }
}

/// One captured output request.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackRecord {
    /// A speech request.
    Spoken {
        /// Text.
        text: String,
        /// Voice used.
        voice: VoiceSettings,
    },
    /// A haptic request.
    Vibrated(VibrationPattern),
    /// A notification.
    Notified(LocalNotification),
}

/// Sink that records every request, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<FeedbackRecord>>,
}

impl RecordingSink {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: FeedbackRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Spoken texts, in order.
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                FeedbackRecord::Spoken { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Haptic patterns, in order.
    #[must_use]
    pub fn vibrations(&self) -> Vec<VibrationPattern> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                FeedbackRecord::Vibrated(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Notifications, in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<LocalNotification> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                FeedbackRecord::Notified(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl SpeechSink for RecordingSink {
    fn speak(&self, text: &str, voice: &VoiceSettings) {
        self.push(FeedbackRecord::Spoken {
            text: text.to_string(),
            voice: voice.clone(),
        });
    }
}

impl HapticSink for RecordingSink {
    fn vibrate(&self, pattern: &VibrationPattern) {
        self.push(FeedbackRecord::Vibrated(pattern.clone()));
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &LocalNotification) {
        self.push(FeedbackRecord::Notified(notification.clone()));
    }
}

/// The set of output sinks a device exposes.
#[derive(Clone)]
pub struct FeedbackSinks {
    /// Speech output.
    pub speech: Arc<dyn SpeechSink>,
    /// Haptic output.
    pub haptics: Arc<dyn HapticSink>,
    /// Notification output.
    pub notifications: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for FeedbackSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackSinks").finish_non_exhaustive()
    }
}

impl Default for FeedbackSinks {
    fn default() -> Self {
        Self::logging()
    }
}

impl FeedbackSinks {
    /// Every output goes to `tracing`.
    #[must_use]
    pub fn logging() -> Self {
        Self {
            speech: Arc::new(LoggingSink),
            haptics: Arc::new(LoggingSink),
            notifications: Arc::new(LoggingSink),
        }
    }

    /// Every output goes to `recorder`.
    #[must_use]
    pub fn recording(recorder: &Arc<RecordingSink>) -> Self {
        Self {
            speech: recorder.clone(),
            haptics: recorder.clone(),
            notifications: recorder.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::EpochMillis;

    #[test]
    fn test_announcement_phrases() {
        let at = EpochMillis::new(1);
        let coming = CaregiverResponse::new(CaregiverAction::Coming, "I'm coming!", at);
        assert_eq!(announcement_for(&coming), COMING_PHRASE);

        let ack = CaregiverResponse::new(CaregiverAction::Acknowledged, "ok", at);
        assert_eq!(announcement_for(&ack), ACKNOWLEDGED_PHRASE);

        let custom = CaregiverResponse::new(CaregiverAction::Unrecognized, "Five minutes", at);
        assert_eq!(announcement_for(&custom), "Five minutes");

        let blank = CaregiverResponse::new(CaregiverAction::Unrecognized, "  ", at);
        assert_eq!(announcement_for(&blank), FALLBACK_PHRASE);
    }

    #[test]
    fn test_voice_presets() {
        let voice = VoiceSettings::announcement();
        assert_eq!(voice.language, "en-US");
        assert!((voice.rate - 0.85).abs() < f32::EPSILON);
        assert!((VoiceSettings::confirmation().rate - 0.9).abs() < f32::EPSILON);
        assert_eq!(VoiceSettings::default(), voice);
    }

    #[test]
    fn test_vibration_presets() {
        assert_eq!(VibrationPattern::for_alert(AlertType::Water), VibrationPattern::Pulse(100));
        assert_eq!(VibrationPattern::for_alert(AlertType::Urgent), VibrationPattern::urgent());
        assert_eq!(VibrationPattern::success().total_millis(), 900);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let recorder = Arc::new(RecordingSink::new());
        let sinks = FeedbackSinks::recording(&recorder);
        sinks.haptics.vibrate(&VibrationPattern::tap());
        sinks.speech.speak("hello", &VoiceSettings::confirmation());
        sinks.notifications.notify(&LocalNotification::new("t", "b"));

        assert_eq!(recorder.records().len(), 3);
        assert_eq!(recorder.spoken(), vec!["hello".to_string()]);
        assert_eq!(recorder.vibrations(), vec![VibrationPattern::tap()]);
        assert_eq!(recorder.notifications()[0].title, "t");

        recorder.clear();
        assert!(recorder.records().is_empty());
    }
}
