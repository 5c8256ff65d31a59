//! Alert data model.
//!
//! An alert is written once by the patient's emitter and then only ever
//! annotated by a caregiver (acknowledgement fields and a nested
//! `caregiverResponse`). Field names on the wire are camelCase so records
//! interoperate with every other client of the keyspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::time::EpochMillis;

// Other clients write `null` where a field has no value yet.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// A malformed response must not hide the alert it is attached to.
fn response_or_none<'de, D>(deserializer: D) -> Result<Option<CaregiverResponse>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(raw) {
        Ok(response) => Ok(Some(response)),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable caregiver response");
            Ok(None)
        }
    }
}

/// Store-generated key of an alert within its patient keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Wraps a store key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AlertId {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Kind of help the patient is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Needs water.
    Water,
    /// Needs the bathroom.
    Bathroom,
    /// Is in pain.
    Pain,
    /// Needs to be repositioned.
    Position,
    /// Needs help now.
    Urgent,
}

impl AlertType {
    /// Every alert type, in button order.
    pub const ALL: [Self; 5] = [
        Self::Water,
        Self::Bathroom,
        Self::Pain,
        Self::Position,
        Self::Urgent,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Bathroom => "bathroom",
            Self::Pain => "pain",
            Self::Position => "position",
            Self::Urgent => "urgent",
        }
    }

    /// English button label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Water => "Water",
            Self::Bathroom => "Bathroom",
            Self::Pain => "Pain",
            Self::Position => "Adjust Position",
            Self::Urgent => "URGENT",
        }
    }

    /// Arabic button label.
    #[must_use]
    pub const fn label_ar(self) -> &'static str {
        match self {
            Self::Water => "ماء",
            Self::Bathroom => "حمام",
            Self::Pain => "ألم",
            Self::Position => "تغيير الوضعية",
            Self::Urgent => "طارئ",
        }
    }

    /// Message stored with the alert and spoken back to the patient once
    /// the send is confirmed.
    #[must_use]
    pub const fn confirmation_message(self) -> &'static str {
        match self {
            Self::Water => "Water alert sent",
            Self::Bathroom => "Bathroom alert sent",
            Self::Pain => "Pain alert sent",
            Self::Position => "Position alert sent",
            Self::Urgent => "Urgent alert sent",
        }
    }

    /// Urgent alerts get the stronger haptic pattern.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::Urgent)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown alert type '{s}'"))
    }
}

/// What the caregiver said they are doing about an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaregiverAction {
    /// On the way.
    Coming,
    /// Seen, not necessarily on the way.
    Acknowledged,
    /// Missing or unknown action written by some other client.
    #[default]
    #[serde(other)]
    Unrecognized,
}

impl CaregiverAction {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Coming => "coming",
            Self::Acknowledged => "acknowledged",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl FromStr for CaregiverAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coming" => Ok(Self::Coming),
            "acknowledged" => Ok(Self::Acknowledged),
            other => Err(format!("unknown caregiver action '{other}'")),
        }
    }
}

/// Response sub-record nested under an alert by a caregiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaregiverResponse {
    /// Free-form text from the caregiver.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// When the caregiver responded. Discriminates repeated responses.
    #[serde(default)]
    pub timestamp: EpochMillis,
    /// Whether the response also acknowledges the alert.
    #[serde(default, deserialize_with = "null_as_default")]
    pub acknowledged: bool,
    /// The caregiver's action.
    #[serde(default, deserialize_with = "null_as_default")]
    pub caregiver_action: CaregiverAction,
}

impl CaregiverResponse {
    /// Builds an acknowledged response for `action` at `timestamp`.
    #[must_use]
    pub fn new(action: CaregiverAction, message: impl Into<String>, timestamp: EpochMillis) -> Self {
        Self {
            message: message.into(),
            timestamp,
            acknowledged: true,
            caregiver_action: action,
        }
    }
}

/// Alert record exactly as stored under `alerts/{patientId}/{alertId}`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub patient_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub patient_name: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub timestamp: EpochMillis,
    #[serde(default, deserialize_with = "null_as_default")]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, deserialize_with = "response_or_none", skip_serializing_if = "Option::is_none")]
    pub caregiver_response: Option<CaregiverResponse>,
}

impl AlertRecord {
    /// A fresh, unacknowledged alert as the emitter writes it.
    #[must_use]
    pub fn new(
        patient_id: impl Into<String>,
        patient_name: impl Into<String>,
        alert_type: AlertType,
        message: impl Into<String>,
        timestamp: EpochMillis,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            patient_name: patient_name.into(),
            alert_type,
            message: message.into(),
            timestamp,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
            caregiver_response: None,
        }
    }
}

/// A materialized alert: the stored record plus its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Store-generated key.
    pub id: AlertId,
    /// Stored fields.
    #[serde(flatten)]
    pub record: AlertRecord,
}

impl Alert {
    /// Pairs a record with its key.
    #[must_use]
    pub fn new(id: AlertId, record: AlertRecord) -> Self {
        Self { id, record }
    }

    /// Creation time set by the emitter.
    #[must_use]
    pub fn timestamp(&self) -> EpochMillis {
        self.record.timestamp
    }

    /// Kind of alert.
    #[must_use]
    pub fn alert_type(&self) -> AlertType {
        self.record.alert_type
    }

    /// Whether a caregiver has acknowledged the alert.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.record.acknowledged
    }

    /// Caregiver response, if one has been appended.
    #[must_use]
    pub fn caregiver_response(&self) -> Option<&CaregiverResponse> {
        self.record.caregiver_response.as_ref()
    }
}

/// Composite key identifying one response event: `(alertId, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    /// Alert the response belongs to.
    pub alert_id: AlertId,
    /// Response timestamp.
    pub timestamp: EpochMillis,
}

impl ResponseKey {
    /// Key for `response` on `alert_id`.
    #[must_use]
    pub fn new(alert_id: AlertId, response: &CaregiverResponse) -> Self {
        Self {
            alert_id,
            timestamp: response.timestamp,
        }
    }
}

impl fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.alert_id, self.timestamp)
    }
}
