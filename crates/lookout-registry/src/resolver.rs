//! Name resolver — the read side of service discovery.
//!
//! A [`ServiceWatch`] owns one watch over a service-name prefix and keeps
//! two views current from its events: the ServiceSet (live `key -> addr`
//! map, consulted for fan-out dialing and emptiness checks) and a tonic
//! balance channel whose endpoint set tracks the registered instances.
//! The channel is what callers actually dial through; tonic's
//! load-balancing layer picks among the endpoints.
//!
//! Ordering invariant: every snapshot is taken after its watch is open,
//! so a write landing between the two is delivered as an event rather
//! than lost. The watch task is the single writer of the ServiceSet. If
//! the watch stream breaks, the task re-establishes it and re-snapshots
//! with backoff; until then callers see a stale set, which is the
//! accepted eventual-consistency tradeoff.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lookout_common::{Error, Result, ServiceName};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};
use tower::discover::Change;
use tracing::{debug, warn};

use crate::backoff::{sleep_or_cancelled, Backoff};
use crate::options::{self, DialOption};
use crate::store::{Store, Watch, WatchEvent};

const RETRY_INITIAL: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(16);

/// Capacity of the endpoint-change feed into the balance channel.
const CHANGE_BUFFER: usize = 64;

type ChangeTx = mpsc::Sender<Change<String, TonicEndpoint>>;

/// A live, eventually-consistent view of one service's endpoints, bound
/// to a resolver-fed gRPC channel.
///
/// Cheap to clone; all clones share the same watch task and channel.
#[derive(Clone)]
pub struct ServiceWatch {
    service: ServiceName,
    endpoints: Arc<DashMap<String, String>>,
    channel: Channel,
    cancel: CancellationToken,
}

impl ServiceWatch {
    /// Establishes a watch for `service` and starts its background task.
    ///
    /// The watch is opened first and the initial endpoint set seeded
    /// from a snapshot read afterwards, so a registration landing in
    /// between arrives as a watch event instead of vanishing. Fails if
    /// either cannot be done; resilience to later stream breaks lives in
    /// the background task.
    pub async fn spawn(
        store: Arc<dyn Store>,
        service: ServiceName,
        dial_options: Arc<RwLock<Vec<DialOption>>>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let (channel, tx) = Channel::balance_channel(CHANGE_BUFFER);
        let endpoints: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let cancel = parent.child_token();

        let watch = store
            .watch_prefix(&service.prefix())
            .await
            .map_err(|e| Error::dial_failed(service.as_str(), e.to_string()))?;
        let snapshot = store
            .get_prefix(&service.prefix())
            .await
            .map_err(|e| Error::dial_failed(service.as_str(), e.to_string()))?;
        sync_endpoints(&endpoints, &tx, &dial_options, snapshot).await;

        debug!(service = %service, count = endpoints.len(), "Resolver established");

        tokio::spawn(watch_loop(
            store,
            service.clone(),
            Arc::clone(&endpoints),
            tx,
            dial_options,
            watch,
            cancel.clone(),
        ));

        Ok(Self {
            service,
            endpoints,
            channel,
            cancel,
        })
    }

    /// The service name this watch resolves.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// The resolver-fed channel. Connections are established lazily as
    /// calls are made.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Current addresses in the ServiceSet, in no particular order.
    pub fn addresses(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// True if no instance is currently resolved for the service.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Stops the watch task.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Reconciles the ServiceSet and the balance channel with a snapshot.
///
/// Returns `false` once the balance channel is gone and the task should
/// stop.
async fn sync_endpoints(
    set: &DashMap<String, String>,
    tx: &ChangeTx,
    dial_options: &RwLock<Vec<DialOption>>,
    snapshot: Vec<(String, String)>,
) -> bool {
    let live: HashSet<&String> = snapshot.iter().map(|(key, _)| key).collect();

    let stale: Vec<String> = set
        .iter()
        .filter(|entry| !live.contains(entry.key()))
        .map(|entry| entry.key().clone())
        .collect();
    for key in stale {
        if !remove_endpoint(set, tx, &key).await {
            return false;
        }
    }

    for (key, addr) in snapshot {
        if !upsert_endpoint(set, tx, dial_options, key, addr).await {
            return false;
        }
    }
    true
}

async fn upsert_endpoint(
    set: &DashMap<String, String>,
    tx: &ChangeTx,
    dial_options: &RwLock<Vec<DialOption>>,
    key: String,
    addr: String,
) -> bool {
    match set.get(&key).map(|entry| entry.value().clone()) {
        Some(existing) if existing == addr => return true,
        Some(_) => {
            // Address changed for the key; retract before re-inserting.
            if tx.send(Change::Remove(key.clone())).await.is_err() {
                return false;
            }
        }
        None => {}
    }

    let endpoint = {
        let opts = dial_options.read();
        options::build_endpoint(&addr, &opts)
    };
    let endpoint = match endpoint {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(key = %key, addr = %addr, error = %e, "Skipping undialable endpoint");
            return true;
        }
    };

    set.insert(key.clone(), addr);
    tx.send(Change::Insert(key, endpoint)).await.is_ok()
}

async fn remove_endpoint(set: &DashMap<String, String>, tx: &ChangeTx, key: &str) -> bool {
    if set.remove(key).is_some() {
        return tx.send(Change::Remove(key.to_string())).await.is_ok();
    }
    true
}

/// Consumes watch events for one service prefix, forever.
///
/// The first watch arrives already established, with the set seeded from
/// a post-establishment snapshot. Each re-establishment opens the watch
/// first and snapshots the prefix afterwards, so no event can fall
/// between snapshot and subscription; duplicate puts are idempotent.
async fn watch_loop(
    store: Arc<dyn Store>,
    service: ServiceName,
    set: Arc<DashMap<String, String>>,
    tx: ChangeTx,
    dial_options: Arc<RwLock<Vec<DialOption>>>,
    initial: Box<dyn Watch>,
    cancel: CancellationToken,
) {
    let prefix = service.prefix();
    let mut backoff = Backoff::new(RETRY_INITIAL, RETRY_MAX);
    let mut established = Some(initial);

    'establish: loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut watch = match established.take() {
            Some(watch) => watch,
            None => {
                let watch = match store.watch_prefix(&prefix).await {
                    Ok(watch) => watch,
                    Err(e) => {
                        warn!(service = %service, error = %e, "Failed to establish watch; backing off");
                        if !sleep_or_cancelled(&cancel, backoff.next_delay()).await {
                            break;
                        }
                        continue;
                    }
                };

                // Snapshot only now that the watch is open; anything
                // newer arrives as an event.
                match store.get_prefix(&prefix).await {
                    Ok(snapshot) => {
                        if !sync_endpoints(&set, &tx, &dial_options, snapshot).await {
                            break;
                        }
                        debug!(service = %service, count = set.len(), "Resolver re-synced");
                    }
                    Err(e) => {
                        warn!(service = %service, error = %e, "Re-snapshot failed; backing off");
                        if !sleep_or_cancelled(&cancel, backoff.next_delay()).await {
                            break;
                        }
                        continue;
                    }
                }
                watch
            }
        };
        backoff.reset();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break 'establish,
                event = watch.recv() => event,
            };

            match event {
                Ok(Some(WatchEvent::Put { key, value })) => {
                    debug!(service = %service, key = %key, addr = %value, "Endpoint added");
                    if !upsert_endpoint(&set, &tx, &dial_options, key, value).await {
                        break 'establish;
                    }
                }
                Ok(Some(WatchEvent::Delete { key })) => {
                    debug!(service = %service, key = %key, "Endpoint removed");
                    if !remove_endpoint(&set, &tx, &key).await {
                        break 'establish;
                    }
                }
                Ok(None) => {
                    warn!(service = %service, "Watch stream ended; re-establishing");
                    break;
                }
                Err(e) => {
                    warn!(service = %service, error = %e, "Watch stream broke; re-establishing");
                    break;
                }
            }
        }

        if !sleep_or_cancelled(&cancel, backoff.next_delay()).await {
            break;
        }
    }

    debug!(service = %service, "Resolver stopped");
}
