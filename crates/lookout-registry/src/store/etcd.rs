//! etcd-backed implementation of the [`Store`] seam.
//!
//! Built on the `etcd-client` crate (etcd v3 over tonic). The client is
//! cheap to clone; every method clones it rather than holding a lock
//! across awaits.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions,
    WatchOptions, WatchStream, Watcher,
};
use lookout_common::{LeaseId, StoreError, StoreResult};
use tracing::debug;

use super::{LeaseKeepAlive, Store, Watch, WatchEvent};

/// Bounded dial timeout applied when opening the store connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordination store client backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connects to the etcd cluster at the given endpoints
    /// (e.g., `["http://localhost:2379"]`).
    ///
    /// Fails with [`StoreError::Connect`] if no endpoint answers a status
    /// probe within [`DIAL_TIMEOUT`].
    pub async fn connect(endpoints: Vec<String>) -> StoreResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);

        let connect = async {
            let mut client = Client::connect(&endpoints, Some(options))
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
            // Probe the cluster so an unreachable store fails here, not on
            // the first registration.
            client
                .status()
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
            Ok::<_, StoreError>(client)
        };

        let client = tokio::time::timeout(DIAL_TIMEOUT, connect)
            .await
            .map_err(|_| {
                StoreError::Connect(format!(
                    "no store endpoint reachable within {:?}: {:?}",
                    DIAL_TIMEOUT, endpoints
                ))
            })??;

        debug!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self { client })
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let mut client = self.client.clone();
        let resp = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| StoreError::operation(format!("lease grant: {}", e)))?;
        Ok(resp.id())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        let mut client = self.client.clone();
        client
            .lease_revoke(lease)
            .await
            .map_err(|e| StoreError::operation(format!("lease revoke: {}", e)))?;
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn LeaseKeepAlive>> {
        let mut client = self.client.clone();
        let (keeper, stream) = client
            .lease_keep_alive(lease)
            .await
            .map_err(|e| StoreError::operation(format!("lease keepalive: {}", e)))?;
        Ok(Box::new(EtcdKeepAlive {
            lease,
            keeper,
            stream,
        }))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        let mut client = self.client.clone();
        let options = lease.map(|id| PutOptions::new().with_lease(id));
        client
            .put(key, value, options)
            .await
            .map_err(|e| StoreError::operation(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut client = self.client.clone();
        let resp = client
            .delete(key, None)
            .await
            .map_err(|e| StoreError::operation(format!("delete {}: {}", key, e)))?;
        Ok(resp.deleted() > 0)
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::operation(format!("get prefix {}: {}", prefix, e)))?;

        let mut pairs = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| StoreError::operation(format!("non-utf8 key: {}", e)))?;
            let value = kv
                .value_str()
                .map_err(|e| StoreError::operation(format!("non-utf8 value: {}", e)))?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(pairs)
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<Box<dyn Watch>> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::watch_interrupted(format!("watch {}: {}", prefix, e)))?;
        Ok(Box::new(EtcdWatch {
            _watcher: watcher,
            stream,
            pending: Vec::new(),
        }))
    }
}

/// Keepalive handle over etcd's bidirectional lease stream.
struct EtcdKeepAlive {
    lease: LeaseId,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
}

#[async_trait]
impl LeaseKeepAlive for EtcdKeepAlive {
    async fn renew(&mut self) -> StoreResult<()> {
        self.keeper
            .keep_alive()
            .await
            .map_err(|e| StoreError::operation(format!("keepalive send: {}", e)))?;

        match self.stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(()),
            Ok(Some(_)) => Err(StoreError::LeaseExpired(self.lease)),
            Ok(None) => Err(StoreError::operation("keepalive stream closed")),
            Err(e) => Err(StoreError::operation(format!("keepalive recv: {}", e))),
        }
    }
}

/// Prefix watch over etcd's watch stream.
///
/// One etcd watch response can carry several events; extras are buffered
/// in `pending` and drained one at a time.
struct EtcdWatch {
    // Dropping the Watcher cancels the server-side watch session.
    _watcher: Watcher,
    stream: WatchStream,
    pending: Vec<WatchEvent>,
}

#[async_trait]
impl Watch for EtcdWatch {
    async fn recv(&mut self) -> StoreResult<Option<WatchEvent>> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.pending.remove(0)));
            }

            let resp = match self.stream.message().await {
                Ok(Some(resp)) => resp,
                Ok(None) => return Ok(None),
                Err(e) => return Err(StoreError::watch_interrupted(e.to_string())),
            };
            if resp.canceled() {
                return Err(StoreError::watch_interrupted("watch canceled by store"));
            }

            for event in resp.events() {
                let Some(kv) = event.kv() else { continue };
                let key = kv
                    .key_str()
                    .map_err(|e| StoreError::operation(format!("non-utf8 key: {}", e)))?
                    .to_string();
                match event.event_type() {
                    EventType::Put => {
                        let value = kv
                            .value_str()
                            .map_err(|e| StoreError::operation(format!("non-utf8 value: {}", e)))?
                            .to_string();
                        self.pending.push(WatchEvent::Put { key, value });
                    }
                    EventType::Delete => {
                        self.pending.push(WatchEvent::Delete { key });
                    }
                }
            }
        }
    }
}
