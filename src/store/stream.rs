use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SubscriptionError;
use crate::keyspace::KeyPath;

use super::snapshot::SnapshotEvent;
use super::traits::StoreError;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend hook used by a stream to unregister itself.
///
/// Implementations must be non-blocking; `cancel` may be called from any
/// thread, including from inside a snapshot handler.
pub trait SubscriptionControl: Send + Sync + fmt::Debug {
    /// Stop delivering to `subscription_id`.
    fn cancel(&self, subscription_id: SubscriptionId);
}

/// Cloneable handle that cancels a stream owned elsewhere.
#[derive(Debug, Clone)]
pub struct StreamCanceller {
    subscription_id: SubscriptionId,
    control: Option<Arc<dyn SubscriptionControl>>,
    unregistered: Arc<AtomicBool>,
}

impl StreamCanceller {
    /// Idempotent: only the first call reaches the backend.
    pub fn cancel(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(control) = &self.control {
            control.cancel(self.subscription_id);
        }
    }

    /// Whether the stream has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.unregistered.load(Ordering::Acquire)
    }
}

/// Single-consumer queue of snapshots for one subscription.
///
/// Dropping this stream attempts best-effort unregistration.
#[derive(Debug)]
pub struct SnapshotStream {
    path: KeyPath,
    rx: Receiver<SnapshotEvent>,
    canceller: StreamCanceller,
}

impl SnapshotStream {
    /// Wraps the receiving end of a backend's per-subscription queue.
    #[must_use]
    pub fn new(
        subscription_id: SubscriptionId,
        path: KeyPath,
        rx: Receiver<SnapshotEvent>,
        control: Arc<dyn SubscriptionControl>,
    ) -> Self {
        Self {
            path,
            rx,
            canceller: StreamCanceller {
                subscription_id,
                control: Some(control),
                unregistered: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// A stream whose only delivery is `error`.
    ///
    /// Backends use this when registration itself fails, so that `subscribe`
    /// never has to return an error to the caller.
    #[must_use]
    pub fn failed(path: KeyPath, error: StoreError) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(SnapshotEvent::Error(error));
        Self {
            path,
            rx,
            canceller: StreamCanceller {
                subscription_id: SubscriptionId::new(),
                control: None,
                unregistered: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.canceller.subscription_id
    }

    /// Prefix this stream observes.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// A handle that can cancel this stream from another thread.
    #[must_use]
    pub fn canceller(&self) -> StreamCanceller {
        self.canceller.clone()
    }

    /// Best-effort explicit unregistration.
    ///
    /// This is non-blocking and idempotent. After the backend drops the
    /// subscription, the stream becomes disconnected.
    pub fn unsubscribe(&self) {
        self.canceller.cancel();
    }

    fn disconnected(&self) -> SubscriptionError {
        SubscriptionError::Disconnected {
            path: self.path.to_string(),
        }
    }

    /// Receive the next event (blocking).
    ///
    /// # Errors
    /// `Disconnected` once the backend has dropped the subscription.
    pub fn recv(&self) -> Result<SnapshotEvent, SubscriptionError> {
        self.rx.recv().map_err(|_| self.disconnected())
    }

    /// Receive the next event with a timeout.
    ///
    /// # Errors
    /// `Timeout` if nothing arrived in time, `Disconnected` once the backend
    /// has dropped the subscription.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<SnapshotEvent, SubscriptionError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SubscriptionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => self.disconnected(),
        })
    }

    /// Take the next event if one is already queued.
    ///
    /// # Errors
    /// `Disconnected` once the backend has dropped the subscription and the
    /// queue is drained.
    pub fn try_recv(&self) -> Result<Option<SnapshotEvent>, SubscriptionError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        // Best-effort: do not block on shutdown.
        self.canceller.cancel();
    }
}
