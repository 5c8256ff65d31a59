//! Callback subscriptions.
//!
//! Store snapshots are never handed to user callbacks from store internals.
//! Each callback subscription owns a [`SnapshotStream`] and a named worker
//! thread that drains it and invokes the handler, one event at a time. The
//! returned [`Subscription`] is the cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SubscriptionError;
use crate::keyspace::KeyPath;
use crate::store::{SnapshotEvent, SnapshotStream, StreamCanceller, SubscriptionId};

/// Tuning for callback subscription workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// How long a worker waits for a snapshot before re-checking for
    /// cancellation.
    pub poll_interval_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 50 }
    }
}

impl SubscriptionConfig {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Handle to an active callback subscription.
///
/// Unsubscribing is idempotent and also happens on drop. Once
/// [`unsubscribe`](Self::unsubscribe) returns, no handler invocation is in
/// flight and none will start. Called from inside the handler itself, it
/// only prevents future invocations.
#[derive(Debug)]
pub struct Subscription {
    subscription_id: SubscriptionId,
    path: KeyPath,
    cancelled: Arc<AtomicBool>,
    gate: Arc<Mutex<()>>,
    canceller: StreamCanceller,
    worker: JoinHandle<()>,
}

impl Subscription {
    /// Start draining `stream` on a worker thread, calling `handler` for
    /// every event. The worker stops after the first error event.
    pub(crate) fn spawn<H>(
        label: &str,
        stream: SnapshotStream,
        poll_interval: Duration,
        mut handler: H,
    ) -> Result<Self, SubscriptionError>
    where
        H: FnMut(SnapshotEvent) + Send + 'static,
    {
        let subscription_id = stream.subscription_id();
        let path = stream.path().clone();
        let canceller = stream.canceller();
        let cancelled = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(Mutex::new(()));

        let worker_cancelled = Arc::clone(&cancelled);
        let worker_gate = Arc::clone(&gate);
        let worker = thread::Builder::new()
            .name(format!("care-relay-{label}"))
            .spawn(move || {
                pump(&stream, poll_interval, &worker_cancelled, &worker_gate, &mut handler);
                tracing::debug!(subscription_id = %stream.subscription_id(), path = %stream.path(), "subscription worker exited");
            })
            .map_err(|e| SubscriptionError::WorkerSpawn {
                message: e.to_string(),
            })?;

        tracing::debug!(%subscription_id, %path, label, "subscription started");
        Ok(Self {
            subscription_id,
            path,
            cancelled,
            gate,
            canceller,
            worker,
        })
    }

    /// Id of the underlying store subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Keyspace this subscription observes.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the worker is still draining events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_cancelled() && !self.worker.is_finished()
    }

    /// Stop all future deliveries.
    pub fn unsubscribe(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.canceller.cancel();
            tracing::debug!(subscription_id = %self.subscription_id, path = %self.path, "unsubscribed");
        }

        // Inside the handler the gate is already held by this thread.
        if thread::current().id() == self.worker.thread().id() {
            return;
        }
        // Wait out an in-flight handler call.
        drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn pump<H>(
    stream: &SnapshotStream,
    poll_interval: Duration,
    cancelled: &AtomicBool,
    gate: &Mutex<()>,
    handler: &mut H,
) where
    H: FnMut(SnapshotEvent),
{
    while !cancelled.load(Ordering::Acquire) {
        let event = match stream.recv_timeout(poll_interval) {
            Ok(event) => event,
            Err(SubscriptionError::Timeout { .. }) => continue,
            Err(_) => return,
        };

        let is_error = matches!(event, SnapshotEvent::Error(_));
        let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        handler(event);
        if is_error {
            return;
        }
    }
}
