//! In-memory realtime store.
//!
//! Reference implementation of [`RealtimeStore`] for embedded use, tests and
//! the simulation binary. A dedicated worker thread owns every record and
//! every subscription; callers reach it through one bounded command queue,
//! so writes and registrations apply in submission order. Snapshot fan-out
//! never blocks the worker: a subscriber with a full buffer is marked stale
//! and receives the newest snapshot on a later sweep instead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::alert::AlertId;
use crate::keyspace::KeyPath;
use crate::time::{Clock, SystemClock};

use super::push_id::PushIdGenerator;
use super::snapshot::{Snapshot, SnapshotEvent};
use super::stream::{SnapshotStream, SubscriptionControl, SubscriptionId};
use super::traits::{RealtimeStore, StoreError};

/// Tuning for [`InMemoryRealtimeStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeStoreConfig {
    /// Max queued commands (writes, reads, registrations).
    pub command_queue_capacity: usize,
    /// Per-subscription snapshot buffer before coalescing kicks in.
    pub snapshot_buffer: usize,
    /// How often stale subscribers get the newest snapshot redelivered.
    pub redelivery_interval_ms: u64,
}

impl Default for RealtimeStoreConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
            snapshot_buffer: 64,
            redelivery_interval_ms: 50,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

#[derive(Debug)]
enum Command {
    Push {
        prefix: KeyPath,
        record: Value,
        reply: Reply<AlertId>,
    },
    Update {
        prefix: KeyPath,
        key: AlertId,
        fields: Map<String, Value>,
        reply: Reply<()>,
    },
    Read {
        prefix: KeyPath,
        reply: Reply<Snapshot>,
    },
    Register {
        subscription_id: SubscriptionId,
        prefix: KeyPath,
        stream_tx: Sender<SnapshotEvent>,
    },
    Unregister {
        subscription_id: SubscriptionId,
    },
    SetOnline(bool),
    RevokeAccess {
        prefix: KeyPath,
    },
    RestoreAccess {
        prefix: KeyPath,
    },
}

#[derive(Debug, Default)]
struct StoreCounters {
    writes: AtomicU64,
    dropped_snapshots: AtomicU64,
    active_subscriptions: AtomicUsize,
}

#[derive(Debug)]
struct ControlHandle {
    command_tx: Sender<Command>,
}

impl SubscriptionControl for ControlHandle {
    fn cancel(&self, subscription_id: SubscriptionId) {
        // Never block here; a lost unregister is cleaned up once the stream
        // receiver is dropped.
        let _ = self.command_tx.try_send(Command::Unregister { subscription_id });
    }
}

/// Thread-safe in-memory realtime store with snapshot subscriptions.
///
/// # Examples
///
/// ```
/// use care_relay::store::{InMemoryRealtimeStore, RealtimeStore, SnapshotEvent};
/// use care_relay::PatientId;
/// use std::time::Duration;
///
/// let store = InMemoryRealtimeStore::default();
/// let path = PatientId::new("p1").unwrap().alerts_path();
/// let stream = store.subscribe(&path);
///
/// // The current (empty) state arrives right after subscribing.
/// match stream.recv_timeout(Duration::from_secs(1)).unwrap() {
///     SnapshotEvent::Snapshot(snap) => assert!(snap.is_empty()),
///     SnapshotEvent::Error(e) => panic!("{e}"),
/// }
/// ```
#[derive(Debug)]
pub struct InMemoryRealtimeStore {
    cfg: RealtimeStoreConfig,
    command_tx: Sender<Command>,
    control: Arc<ControlHandle>,
    counters: Arc<StoreCounters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Default for InMemoryRealtimeStore {
    fn default() -> Self {
        Self::new(RealtimeStoreConfig::default())
    }
}

impl InMemoryRealtimeStore {
    /// Create a store keyed by the system clock.
    #[must_use]
    pub fn new(cfg: RealtimeStoreConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    /// Create a store whose generated keys follow `clock`.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned; see
    /// [`try_with_clock`](Self::try_with_clock).
    #[must_use]
    pub fn with_clock(cfg: RealtimeStoreConfig, clock: Arc<dyn Clock>) -> Self {
        match Self::try_with_clock(cfg, clock) {
            Ok(store) => store,
            Err(e) => panic!("failed to start care-relay store: {e}"),
        }
    }

    /// Fallible [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` if the worker thread cannot be spawned.
    pub fn try_new(cfg: RealtimeStoreConfig) -> Result<Self, StoreError> {
        Self::try_with_clock(cfg, Arc::new(SystemClock))
    }

    /// Fallible [`with_clock`](Self::with_clock).
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` if the worker thread cannot be spawned.
    pub fn try_with_clock(cfg: RealtimeStoreConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let (command_tx, command_rx) = bounded::<Command>(cfg.command_queue_capacity.max(1));
        let counters = Arc::new(StoreCounters::default());

        let worker = Worker {
            snapshot_buffer: cfg.snapshot_buffer.max(1),
            clock,
            ids: PushIdGenerator::new(),
            data: HashMap::new(),
            subs: HashMap::new(),
            online: true,
            revoked: HashSet::new(),
            counters: Arc::clone(&counters),
        };
        let tick = Duration::from_millis(cfg.redelivery_interval_ms.max(1));

        let join = thread::Builder::new()
            .name("care-relay-store".to_string())
            .spawn(move || worker_loop(worker, &command_rx, tick))
            .map_err(|e| StoreError::Unavailable(format!("store worker spawn failed: {e}")))?;

        let control = Arc::new(ControlHandle {
            command_tx: command_tx.clone(),
        });

        Ok(Self {
            cfg,
            command_tx,
            control,
            counters,
            join: Mutex::new(Some(join)),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RealtimeStoreConfig {
        &self.cfg
    }

    /// Simulate losing (or regaining) connectivity. While offline every
    /// write and read fails with `StoreError::Connection`.
    pub fn set_online(&self, online: bool) {
        let _ = self.command_tx.send(Command::SetOnline(online));
    }

    /// Simulate a permission change that revokes access to `prefix`.
    ///
    /// Current subscribers receive `PermissionDenied` on their error channel
    /// and are dropped; later writes, reads and subscriptions fail the same
    /// way until [`restore_access`](Self::restore_access).
    pub fn revoke_access(&self, prefix: &KeyPath) {
        let _ = self.command_tx.send(Command::RevokeAccess {
            prefix: prefix.clone(),
        });
    }

    /// Undo [`revoke_access`](Self::revoke_access).
    pub fn restore_access(&self, prefix: &KeyPath) {
        let _ = self.command_tx.send(Command::RestoreAccess {
            prefix: prefix.clone(),
        });
    }

    /// Number of successfully applied writes.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.counters.writes.load(Ordering::Relaxed)
    }

    /// Snapshots that found a full subscriber buffer and were coalesced.
    #[must_use]
    pub fn dropped_snapshots(&self) -> u64 {
        self.counters.dropped_snapshots.load(Ordering::Relaxed)
    }

    /// Subscriptions currently registered with the worker.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.counters.active_subscriptions.load(Ordering::Relaxed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.command_tx.try_send(build(reply_tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(StoreError::Unavailable("store command queue is full".to_string()));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(StoreError::Unavailable("store worker has stopped".to_string()));
            }
        }
        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store worker dropped the request".to_string()))?
    }
}

#[async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn push(&self, prefix: &KeyPath, record: Value) -> Result<AlertId, StoreError> {
        let prefix = prefix.clone();
        self.request(|reply| Command::Push { prefix, record, reply }).await
    }

    async fn update(
        &self,
        prefix: &KeyPath,
        key: &AlertId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let prefix = prefix.clone();
        let key = key.clone();
        self.request(|reply| Command::Update {
            prefix,
            key,
            fields,
            reply,
        })
        .await
    }

    async fn read(&self, prefix: &KeyPath) -> Result<Snapshot, StoreError> {
        let prefix = prefix.clone();
        self.request(|reply| Command::Read { prefix, reply }).await
    }

    fn subscribe(&self, prefix: &KeyPath) -> SnapshotStream {
        let subscription_id = SubscriptionId::new();
        let (stream_tx, stream_rx) = bounded::<SnapshotEvent>(self.cfg.snapshot_buffer.max(1));

        let registered = self.command_tx.try_send(Command::Register {
            subscription_id,
            prefix: prefix.clone(),
            stream_tx,
        });
        if registered.is_err() {
            return SnapshotStream::failed(
                prefix.clone(),
                StoreError::Unavailable("could not register subscription".to_string()),
            );
        }

        let control: Arc<dyn SubscriptionControl> = self.control.clone();
        SnapshotStream::new(subscription_id, prefix.clone(), stream_rx, control)
    }
}

impl Drop for InMemoryRealtimeStore {
    fn drop(&mut self) {
        // Close our sender so the worker can terminate once every stream's
        // control handle is gone too.
        let (dummy_tx, _) = bounded::<Command>(1);
        let old = std::mem::replace(&mut self.command_tx, dummy_tx);
        drop(old);

        if let Ok(mut guard) = self.join.lock() {
            // Detach: streams may outlive the store and keep the worker alive.
            drop(guard.take());
        }
    }
}

#[derive(Debug)]
struct SubscriptionEntry {
    prefix: KeyPath,
    tx: Sender<SnapshotEvent>,
    stale: bool,
}

struct Worker {
    snapshot_buffer: usize,
    clock: Arc<dyn Clock>,
    ids: PushIdGenerator,
    data: HashMap<KeyPath, BTreeMap<String, Value>>,
    subs: HashMap<SubscriptionId, SubscriptionEntry>,
    online: bool,
    revoked: HashSet<KeyPath>,
    counters: Arc<StoreCounters>,
}

fn worker_loop(mut worker: Worker, command_rx: &Receiver<Command>, tick: Duration) {
    let mut last_sweep = Instant::now();
    loop {
        match command_rx.recv_timeout(tick) {
            Ok(cmd) => worker.handle(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_sweep.elapsed() >= tick {
            worker.redeliver_stale();
            last_sweep = Instant::now();
        }
    }
    tracing::debug!(buffer = worker.snapshot_buffer, "store worker stopped");
}

impl Worker {
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Push { prefix, record, reply } => {
                let result = self.apply_push(&prefix, record);
                let _ = reply.send(result);
            }
            Command::Update {
                prefix,
                key,
                fields,
                reply,
            } => {
                let result = self.apply_update(&prefix, &key, fields);
                let _ = reply.send(result);
            }
            Command::Read { prefix, reply } => {
                let result = self.check_access(&prefix).map(|()| self.snapshot(&prefix));
                let _ = reply.send(result);
            }
            Command::Register {
                subscription_id,
                prefix,
                stream_tx,
            } => self.register(subscription_id, prefix, stream_tx),
            Command::Unregister { subscription_id } => {
                if self.subs.remove(&subscription_id).is_some() {
                    tracing::debug!(%subscription_id, "subscription removed");
                }
                self.publish_sub_count();
            }
            Command::SetOnline(online) => {
                tracing::info!(online, "store connectivity changed");
                self.online = online;
            }
            Command::RevokeAccess { prefix } => self.revoke(prefix),
            Command::RestoreAccess { prefix } => {
                self.revoked.remove(&prefix);
            }
        }
    }

    fn check_access(&self, prefix: &KeyPath) -> Result<(), StoreError> {
        if !self.online {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        if self.revoked.contains(prefix) {
            return Err(StoreError::PermissionDenied(prefix.to_string()));
        }
        Ok(())
    }

    fn apply_push(&mut self, prefix: &KeyPath, record: Value) -> Result<AlertId, StoreError> {
        self.check_access(prefix)?;
        let key = self.ids.next_id(self.clock.now());
        self.data
            .entry(prefix.clone())
            .or_default()
            .insert(key.clone(), record);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %prefix, %key, "record pushed");
        self.fan_out(prefix);
        Ok(AlertId::new(key))
    }

    fn apply_update(
        &mut self,
        prefix: &KeyPath,
        key: &AlertId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.check_access(prefix)?;
        let record = self
            .data
            .get_mut(prefix)
            .and_then(|children| children.get_mut(key.as_str()))
            .ok_or_else(|| StoreError::NotFound(format!("{prefix}/{key}")))?;

        match record {
            Value::Object(existing) => {
                for (field, value) in fields {
                    existing.insert(field, value);
                }
            }
            other => *other = Value::Object(fields),
        }
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %prefix, %key, "record updated");
        self.fan_out(prefix);
        Ok(())
    }

    fn snapshot(&self, prefix: &KeyPath) -> Snapshot {
        match self.data.get(prefix) {
            Some(children) => Snapshot::new(prefix.clone(), children.clone()),
            None => Snapshot::empty(prefix.clone()),
        }
    }

    fn register(&mut self, subscription_id: SubscriptionId, prefix: KeyPath, tx: Sender<SnapshotEvent>) {
        if self.revoked.contains(&prefix) {
            let _ = tx.try_send(SnapshotEvent::Error(StoreError::PermissionDenied(prefix.to_string())));
            return;
        }

        let mut entry = SubscriptionEntry {
            prefix,
            tx,
            stale: false,
        };
        let snapshot = self.snapshot(&entry.prefix);
        if !deliver(&mut entry, snapshot, &self.counters) {
            return;
        }
        tracing::debug!(%subscription_id, path = %entry.prefix, "subscription registered");
        self.subs.insert(subscription_id, entry);
        self.publish_sub_count();
    }

    fn revoke(&mut self, prefix: KeyPath) {
        tracing::info!(path = %prefix, "access revoked");
        self.subs.retain(|_, sub| {
            if sub.prefix == prefix {
                let _ = sub
                    .tx
                    .try_send(SnapshotEvent::Error(StoreError::PermissionDenied(prefix.to_string())));
                false
            } else {
                true
            }
        });
        self.revoked.insert(prefix);
        self.publish_sub_count();
    }

    fn fan_out(&mut self, prefix: &KeyPath) {
        let snapshot = self.snapshot(prefix);
        let counters = Arc::clone(&self.counters);
        self.subs.retain(|_, sub| {
            if &sub.prefix != prefix {
                return true;
            }
            deliver(sub, snapshot.clone(), &counters)
        });
        self.publish_sub_count();
    }

    fn redeliver_stale(&mut self) {
        if !self.subs.values().any(|s| s.stale) {
            return;
        }
        let prefixes: HashSet<KeyPath> = self
            .subs
            .values()
            .filter(|s| s.stale)
            .map(|s| s.prefix.clone())
            .collect();
        for prefix in prefixes {
            let snapshot = self.snapshot(&prefix);
            let counters = Arc::clone(&self.counters);
            self.subs.retain(|_, sub| {
                if !sub.stale || sub.prefix != prefix {
                    return true;
                }
                sub.stale = false;
                deliver(sub, snapshot.clone(), &counters)
            });
        }
        self.publish_sub_count();
    }

    fn publish_sub_count(&self) {
        self.counters
            .active_subscriptions
            .store(self.subs.len(), Ordering::Relaxed);
    }
}

/// Try to hand a snapshot to a subscriber. Returns false if the subscriber
/// is gone and should be dropped.
fn deliver(sub: &mut SubscriptionEntry, snapshot: Snapshot, counters: &StoreCounters) -> bool {
    match sub.tx.try_send(SnapshotEvent::Snapshot(snapshot)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            // Never block the worker: coalesce and redeliver on the next sweep.
            sub.stale = true;
            counters.dropped_snapshots.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}
