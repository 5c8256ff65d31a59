//! Shared store adapter.
//!
//! The relay consumes an external realtime keyed store through the
//! [`RealtimeStore`] contract: push-with-generated-key, merge-update,
//! read-all-under-prefix and subscribe-for-snapshots. An embedded
//! [`InMemoryRealtimeStore`] implements the contract in-process.

/// In-memory backend with a dispatcher worker.
pub mod memory;
/// Time-ordered generated keys.
pub mod push_id;
/// Snapshot values delivered to subscribers.
pub mod snapshot;
/// Subscriber stream handle.
pub mod stream;
/// Store contract and store errors.
pub mod traits;

pub use memory::{InMemoryRealtimeStore, RealtimeStoreConfig};
pub use push_id::{PushIdGenerator, PUSH_ID_LEN};
pub use snapshot::{Snapshot, SnapshotEvent};
pub use stream::{SnapshotStream, StreamCanceller, SubscriptionControl, SubscriptionId};
pub use traits::{RealtimeStore, StoreError};
