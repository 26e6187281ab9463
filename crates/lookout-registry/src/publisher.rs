//! Endpoint publisher — the write side of one registration.
//!
//! Registration is lease-backed: the endpoint key is attached to a
//! short-TTL lease, and a background task renews the lease for the
//! lifetime of the registration. If the process dies, renewal stops, the
//! store expires the lease and the key vanishes — that is the liveness
//! mechanism. If the keepalive stream breaks while the process is alive,
//! the task re-grants a lease and re-writes the key with exponential
//! backoff so a transient store reconnect does not silently deregister
//! the instance.

use std::sync::Arc;
use std::time::Duration;

use lookout_common::{Endpoint, Error, Result, ServiceKey, ServiceName, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{sleep_or_cancelled, Backoff};
use crate::store::Store;

/// Lease TTL for registrations, in seconds.
pub const LEASE_TTL_SECS: i64 = 5;

/// Interval between lease renewals. Must stay well under the TTL so a
/// single delayed renewal cannot expire the lease.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1500);

const RETRY_INITIAL: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(16);

/// One active registration: an endpoint key in the store plus the task
/// keeping its lease alive.
pub struct Publisher {
    store: Arc<dyn Store>,
    service_key: ServiceKey,
    cancel: CancellationToken,
}

impl Publisher {
    /// Registers one instance of `service` at `host:port`.
    ///
    /// Grants a [`LEASE_TTL_SECS`] lease, writes the endpoint key attached
    /// to it, and starts the keepalive task. The foreground cost is one
    /// lease grant plus one key write; everything else happens in the
    /// background.
    ///
    /// On failure no partial state is left behind: if the key write fails
    /// after the grant, the lease is revoked best-effort (the store would
    /// expire it after the TTL anyway).
    pub async fn register(
        store: Arc<dyn Store>,
        service: &ServiceName,
        host: &str,
        port: u16,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let service_key = ServiceKey::new(service, host, port);
        let endpoint = Endpoint::new(host, port);

        let lease = store
            .grant_lease(LEASE_TTL_SECS)
            .await
            .map_err(|e| Error::registration_failed(service_key.as_str(), e.to_string()))?;

        if let Err(e) = store
            .put(service_key.as_str(), endpoint.addr(), Some(lease))
            .await
        {
            if let Err(revoke_err) = store.revoke_lease(lease).await {
                warn!(
                    lease,
                    error = %revoke_err,
                    "Failed to revoke lease after aborted registration; it will expire on its own"
                );
            }
            return Err(Error::registration_failed(
                service_key.as_str(),
                e.to_string(),
            ));
        }

        info!(key = %service_key, addr = %endpoint, lease, "Registered service endpoint");

        let cancel = parent.child_token();
        tokio::spawn(keepalive_loop(
            Arc::clone(&store),
            service_key.clone(),
            endpoint,
            lease,
            cancel.clone(),
        ));

        Ok(Self {
            store,
            service_key,
            cancel,
        })
    }

    /// The store key this registration lives under.
    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    /// Deletes the endpoint key from the store.
    ///
    /// Does not revoke the lease; it is left to expire. On failure the
    /// registration stays intact so the caller can retry.
    pub(crate) async fn delete_key(&self) -> Result<()> {
        self.store.delete(self.service_key.as_str()).await?;
        info!(key = %self.service_key, "Unregistered service endpoint");
        Ok(())
    }

    /// Stops the keepalive task. The lease then expires within the TTL
    /// unless the key was already deleted.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Keeps one registration alive until cancelled.
///
/// Outer loop: establish a session (lease + key + keepalive handle) —
/// the first iteration reuses the one created by `register`. Inner loop:
/// renew on a fixed interval. Any renewal failure abandons the session
/// and re-registers from scratch after a backoff.
async fn keepalive_loop(
    store: Arc<dyn Store>,
    key: ServiceKey,
    endpoint: Endpoint,
    initial_lease: i64,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(RETRY_INITIAL, RETRY_MAX);
    let mut lease = Some(initial_lease);

    'session: loop {
        if cancel.is_cancelled() {
            break;
        }

        let lease_id = match lease.take() {
            Some(id) => id,
            None => match reestablish(&store, &key, &endpoint).await {
                Ok(id) => {
                    info!(key = %key, lease = id, "Re-registered after keepalive failure");
                    id
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Re-registration failed; backing off");
                    if !sleep_or_cancelled(&cancel, backoff.next_delay()).await {
                        break;
                    }
                    continue;
                }
            },
        };

        let mut keeper = match store.keep_alive(lease_id).await {
            Ok(keeper) => keeper,
            Err(e) => {
                warn!(key = %key, lease = lease_id, error = %e, "Failed to open keepalive stream");
                if !sleep_or_cancelled(&cancel, backoff.next_delay()).await {
                    break;
                }
                continue;
            }
        };

        backoff.reset();
        debug!(key = %key, lease = lease_id, "Keepalive active");

        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %key, "Keepalive stopped");
                    break 'session;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = keeper.renew().await {
                warn!(key = %key, lease = lease_id, error = %e, "Lease renewal failed; re-registering");
                continue 'session;
            }
        }
    }
}

/// Grants a fresh lease and re-writes the endpoint key under it.
async fn reestablish(
    store: &Arc<dyn Store>,
    key: &ServiceKey,
    endpoint: &Endpoint,
) -> std::result::Result<i64, StoreError> {
    let lease = store.grant_lease(LEASE_TTL_SECS).await?;
    store.put(key.as_str(), endpoint.addr(), Some(lease)).await?;
    Ok(lease)
}
