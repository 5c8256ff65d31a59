//! Full keyspace snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keyspace::KeyPath;

use super::traits::StoreError;

/// Full state of a keyspace prefix at one point in time.
///
/// Children are keyed by record key in ascending order, so iterating a
/// snapshot is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    path: KeyPath,
    children: BTreeMap<String, Value>,
}

impl Snapshot {
    /// An empty snapshot (absent prefix).
    #[must_use]
    pub fn empty(path: KeyPath) -> Self {
        Self {
            path,
            children: BTreeMap::new(),
        }
    }

    /// A snapshot over the given children.
    #[must_use]
    pub fn new(path: KeyPath, children: BTreeMap<String, Value>) -> Self {
        Self { path, children }
    }

    /// Prefix this snapshot describes.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// True when nothing is stored under the prefix.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of child records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// A single child record.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.children.get(key)
    }

    /// Child records in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Consumes the snapshot, yielding its children.
    #[must_use]
    pub fn into_children(self) -> BTreeMap<String, Value> {
        self.children
    }
}

/// One delivery on a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// The current full state of the prefix.
    Snapshot(Snapshot),
    /// The subscription failed; no further snapshots will follow.
    Error(StoreError),
}
