//! Coordination store abstraction.
//!
//! The registry treats the store as a trusted external service offering
//! key-value CRUD, lease grant/revoke/keepalive, and prefix watches. The
//! [`Store`] trait is the seam: production code runs against
//! [`etcd::EtcdStore`], tests and local development against
//! [`memory::MemoryStore`].

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use lookout_common::{LeaseId, StoreResult};

/// A change event delivered by a prefix watch.
///
/// Events for a given key are delivered in the order the store applied
/// them; propagation from writer to watcher is asynchronous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or its value replaced.
    Put { key: String, value: String },
    /// A key was deleted, either explicitly or by lease expiry.
    Delete { key: String },
}

/// Continuous renewal handle for one lease.
///
/// Each successful [`renew`](LeaseKeepAlive::renew) pushes the lease
/// expiry out by its full TTL. A renewal error means the keepalive stream
/// is broken or the lease is already gone; the handle is not reusable
/// after an error.
#[async_trait]
pub trait LeaseKeepAlive: Send {
    /// Sends one renewal and waits for the store's acknowledgement.
    async fn renew(&mut self) -> StoreResult<()>;
}

/// An established prefix watch.
#[async_trait]
pub trait Watch: Send {
    /// Waits for the next event under the watched prefix.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly, or
    /// [`StoreError::WatchInterrupted`](lookout_common::StoreError) when it
    /// breaks; either way the consumer must re-establish the watch and
    /// re-snapshot to catch up.
    async fn recv(&mut self) -> StoreResult<Option<WatchEvent>>;
}

/// The coordination store client seam.
///
/// Implementations must be cheap to share (`Arc<dyn Store>`); one store
/// connection is shared by the publisher and all resolvers of a registry.
#[async_trait]
pub trait Store: Send + Sync {
    /// Requests a lease with the given TTL in seconds.
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId>;

    /// Revokes a lease, deleting every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()>;

    /// Opens a keepalive handle for a lease.
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseKeepAlive>>;

    /// Writes `key -> value`, optionally attached to a lease.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()>;

    /// Deletes a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Snapshot read of all `(key, value)` pairs under a prefix.
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;

    /// Establishes a watch over a key prefix.
    async fn watch_prefix(&self, prefix: &str) -> StoreResult<Box<dyn Watch>>;
}
