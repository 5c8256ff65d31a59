//! Abstract realtime store contract.
//!
//! The relay has no server of its own; it leans on an external realtime
//! keyed store for fan-out and persistence. This trait is the whole surface
//! the relay consumes from that store, so any backend (the in-memory
//! reference implementation, or a network client) can be swapped in.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::alert::AlertId;
use crate::keyspace::KeyPath;

use super::snapshot::Snapshot;
use super::stream::SnapshotStream;

/// Errors reported by a realtime store backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store refused the read or write.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Record to update does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// The backend has shut down.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for failures that may clear up once connectivity returns.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Unavailable(_))
    }
}

/// Realtime keyed store consumed by the relay.
///
/// # Semantics
/// - Writes are async and resolve once the store has durably applied them.
/// - `subscribe` never fails synchronously: registration problems and later
///   subscription failures arrive on the returned stream as
///   [`SnapshotEvent::Error`](super::SnapshotEvent::Error).
/// - Each subscriber receives the full snapshot under its prefix right after
///   subscribing and again after every change. Backends may coalesce
///   intermediate snapshots but must eventually deliver the newest state.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Allocate a new unique key under `prefix` and write `record` there.
    ///
    /// # Errors
    /// - `Connection` / `Unavailable` when the store cannot be reached
    /// - `PermissionDenied` when the write is refused
    async fn push(&self, prefix: &KeyPath, record: Value) -> Result<AlertId, StoreError>;

    /// Merge top-level `fields` into the existing record `prefix/key`.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Connection` / `PermissionDenied` as for `push`
    async fn update(
        &self,
        prefix: &KeyPath,
        key: &AlertId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Read every record under `prefix`. An absent prefix reads as empty.
    async fn read(&self, prefix: &KeyPath) -> Result<Snapshot, StoreError>;

    /// Start receiving snapshots of `prefix`.
    fn subscribe(&self, prefix: &KeyPath) -> SnapshotStream;
}
