//! In-process implementation of the [`Store`] seam.
//!
//! Faithful to the coordination store's observable semantics — leases
//! expire keys when renewal stops, watches deliver put/delete events in
//! apply order — without any network. Used by the test suite and usable
//! for single-process local development.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lookout_common::{LeaseId, StoreError, StoreResult};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{LeaseKeepAlive, Store, Watch, WatchEvent};

/// How often the sweeper checks for expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Watch event fan-out buffer per store.
const EVENT_BUFFER: usize = 256;

struct ValueEntry {
    value: String,
    lease: Option<LeaseId>,
}

struct LeaseRecord {
    ttl: Duration,
    deadline: Mutex<Instant>,
}

struct Inner {
    kvs: DashMap<String, ValueEntry>,
    leases: DashMap<LeaseId, LeaseRecord>,
    next_lease: AtomicI64,
    events: broadcast::Sender<WatchEvent>,
}

impl Inner {
    fn emit(&self, event: WatchEvent) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(event);
    }

    /// Removes a lease and every key attached to it, emitting deletes.
    fn drop_lease(&self, lease: LeaseId) {
        let keys: Vec<String> = self
            .kvs
            .iter()
            .filter(|entry| entry.value().lease == Some(lease))
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if self.kvs.remove(&key).is_some() {
                self.emit(WatchEvent::Delete { key });
            }
        }
    }
}

/// In-memory coordination store with real lease-TTL semantics.
///
/// Must be created inside a tokio runtime; a background sweeper task
/// expires leases whose keepalive has stopped.
pub struct MemoryStore {
    inner: Arc<Inner>,
    sweeper: JoinHandle<()>,
}

impl MemoryStore {
    /// Creates an empty store and starts its lease sweeper.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let inner = Arc::new(Inner {
            kvs: DashMap::new(),
            leases: DashMap::new(),
            next_lease: AtomicI64::new(0),
            events,
        });

        let sweep_inner = Arc::clone(&inner);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let expired: Vec<LeaseId> = sweep_inner
                    .leases
                    .iter()
                    .filter(|entry| *entry.value().deadline.lock() <= now)
                    .map(|entry| *entry.key())
                    .collect();
                for lease in expired {
                    if sweep_inner.leases.remove(&lease).is_some() {
                        debug!(lease, "Lease expired");
                        sweep_inner.drop_lease(lease);
                    }
                }
            }
        });

        Self { inner, sweeper }
    }

    /// Returns the number of live leases (for tests and introspection).
    pub fn lease_count(&self) -> usize {
        self.inner.leases.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let lease = self.inner.next_lease.fetch_add(1, Ordering::SeqCst) + 1;
        let ttl = Duration::from_secs(ttl_secs.max(1) as u64);
        self.inner.leases.insert(
            lease,
            LeaseRecord {
                ttl,
                deadline: Mutex::new(Instant::now() + ttl),
            },
        );
        Ok(lease)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        if self.inner.leases.remove(&lease).is_none() {
            return Err(StoreError::LeaseExpired(lease));
        }
        self.inner.drop_lease(lease);
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseKeepAlive>> {
        if !self.inner.leases.contains_key(&lease) {
            return Err(StoreError::LeaseExpired(lease));
        }
        Ok(Box::new(MemoryKeepAlive {
            inner: Arc::clone(&self.inner),
            lease,
        }))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        if let Some(id) = lease {
            if !self.inner.leases.contains_key(&id) {
                return Err(StoreError::LeaseExpired(id));
            }
        }
        self.inner.kvs.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                lease,
            },
        );
        self.inner.emit(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let existed = self.inner.kvs.remove(key).is_some();
        if existed {
            self.inner.emit(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .inner
            .kvs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<Box<dyn Watch>> {
        Ok(Box::new(MemoryWatch {
            rx: self.inner.events.subscribe(),
            prefix: prefix.to_string(),
        }))
    }
}

struct MemoryKeepAlive {
    inner: Arc<Inner>,
    lease: LeaseId,
}

#[async_trait]
impl LeaseKeepAlive for MemoryKeepAlive {
    async fn renew(&mut self) -> StoreResult<()> {
        let record = self
            .inner
            .leases
            .get(&self.lease)
            .ok_or(StoreError::LeaseExpired(self.lease))?;
        *record.deadline.lock() = Instant::now() + record.ttl;
        Ok(())
    }
}

struct MemoryWatch {
    rx: broadcast::Receiver<WatchEvent>,
    prefix: String,
}

#[async_trait]
impl Watch for MemoryWatch {
    async fn recv(&mut self) -> StoreResult<Option<WatchEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let key = match &event {
                        WatchEvent::Put { key, .. } => key,
                        WatchEvent::Delete { key } => key,
                    };
                    if key.starts_with(&self.prefix) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(StoreError::watch_interrupted(format!(
                        "watch fell behind by {} events",
                        missed
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
