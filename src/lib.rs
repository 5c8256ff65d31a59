//! # care-relay - Real-time patient alert relay
//!
//! A patient device emits discrete alerts ("water", "pain", "urgent", ...)
//! into a per-patient keyspace of a realtime keyed store. Caregiver devices
//! observe that keyspace and write responses back onto the alerts, and the
//! patient device announces each response exactly once. There is no relay
//! server: both sides converge on the store's shared state.
//!
//! ## Core Concepts
//!
//! - **Keyspace**: `alerts/{patientId}`, one child record per alert
//! - **Alert**: an append-only record stamped by the emitter, later
//!   annotated by a caregiver
//! - **Snapshot**: the full state of a keyspace, redelivered after every
//!   change
//! - **Response key**: `(alertId, response timestamp)`, the unit of
//!   deduplication for announcements
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use care_relay::{
//!     AlertEmitter, AlertObserver, AlertType, InMemoryRealtimeStore, PatientId,
//! };
//!
//! # async fn demo() -> care_relay::RelayResult<()> {
//! let store = Arc::new(InMemoryRealtimeStore::default());
//! let patient = PatientId::new("patient-1762505870313")?;
//!
//! let observer = AlertObserver::new(store.clone());
//! let _sub = observer.subscribe_to_alerts(&patient, |alerts| {
//!     println!("{} alerts", alerts.len());
//! })?;
//!
//! let emitter = AlertEmitter::new(store);
//! emitter.send_alert(&patient, "Amina", AlertType::Water, "Water alert sent").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod alert;
pub mod error;
pub mod keyspace;
pub mod time;

// Store adapter and delivery
pub mod store;
pub mod subscription;

// Relay components
pub mod correlator;
pub mod emitter;
pub mod identity;
pub mod observer;

// Device surfaces
pub mod caregiver;
pub mod config;
pub mod feedback;
pub mod local;
pub mod patient;

// Re-export primary types at crate root for convenience
pub use alert::{Alert, AlertId, AlertRecord, AlertType, CaregiverAction, CaregiverResponse, ResponseKey};
pub use error::{
    AlertSendError, ConfigError, IdentityError, RelayError, RelayResult, SubscriptionError, ValidationError,
};
pub use keyspace::{KeyPath, PatientId};
pub use time::{Clock, EpochMillis, ManualClock, SystemClock};

pub use store::{
    InMemoryRealtimeStore, RealtimeStore, RealtimeStoreConfig, Snapshot, SnapshotEvent, SnapshotStream, StoreError,
};
pub use subscription::{Subscription, SubscriptionConfig};

pub use correlator::{CaregiverResponseListener, ResponseCorrelator, ResponseEvent, ResponseFeed};
pub use emitter::AlertEmitter;
pub use identity::IdentityResolver;
pub use observer::{materialize_alerts, AlertFeed, AlertObserver};

pub use caregiver::CaregiverConsole;
pub use config::{IdentityConfig, RelayConfig, SpeechConfig};
pub use feedback::{
    announcement_for, FeedbackSinks, HapticSink, LocalNotification, LoggingSink, NotificationSink, RecordingSink,
    SpeechSink, VibrationPattern, VoiceSettings,
};
pub use local::{InMemoryKeyValueStore, KeyValueStore, LocalStoreError};
#[cfg(feature = "persistent")]
pub use local::FileKeyValueStore;
pub use patient::PatientDevice;
