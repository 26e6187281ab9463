//! Process-wide registry facade.
//!
//! Binds the endpoint publisher, name resolvers, and connection
//! acquisition into one handle with the lifecycle
//! `Created -> Opened -> (Registered)? -> Closed`. One registry holds at
//! most one active registration (its own instance) and one resolver per
//! service name, all sharing a single store connection whose lifetime the
//! registry owns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lookout_common::{Error, Result, ServiceKey, ServiceName};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::options::{self, DialOption};
use crate::publisher::Publisher;
use crate::resolver::ServiceWatch;
use crate::store::{etcd::EtcdStore, Store};

struct Inner {
    schema: String,
    store: Arc<dyn Store>,
    dial_options: Arc<RwLock<Vec<DialOption>>>,
    publisher: Mutex<Option<Publisher>>,
    self_key: RwLock<Option<ServiceKey>>,
    resolvers: DashMap<ServiceName, ServiceWatch>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// Service discovery registry: register the local instance, resolve
/// logical service names into live gRPC channels.
///
/// Cheap to clone; all clones share one store connection and one set of
/// background tasks. [`close`](Registry::close) stops everything.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("schema", &self.inner.schema)
            .field("resolvers", &self.inner.resolvers.len())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Registry {
    /// Opens a registry backed by an etcd cluster.
    ///
    /// `schema` names this resolver scheme in dial targets
    /// (`<schema>:///<serviceName>`). Fails with [`Error::ConnectFailed`]
    /// if no store endpoint is reachable within the dial timeout.
    pub async fn connect(
        schema: impl Into<String>,
        store_endpoints: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let endpoints: Vec<String> = store_endpoints.into_iter().map(Into::into).collect();
        let store = EtcdStore::connect(endpoints)
            .await
            .map_err(|e| Error::connect_failed(e.to_string()))?;
        Ok(Self::with_store(schema, Arc::new(store)))
    }

    /// Opens a registry over an already-connected store.
    ///
    /// Used with [`MemoryStore`](crate::store::memory::MemoryStore) in
    /// tests and single-process setups.
    pub fn with_store(schema: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema: schema.into(),
                store,
                dial_options: Arc::new(RwLock::new(Vec::new())),
                publisher: Mutex::new(None),
                self_key: RwLock::new(None),
                resolvers: DashMap::new(),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Registers the local instance of `service` at `host:port`.
    ///
    /// A registry represents at most one active registration; a second
    /// call fails with [`Error::AlreadyRegistered`] until
    /// [`unregister`](Registry::unregister) is called.
    pub async fn register(&self, service: &ServiceName, host: &str, port: u16) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.inner.publisher.lock().await;
        self.ensure_open()?;

        if let Some(existing) = slot.as_ref() {
            return Err(Error::already_registered(existing.service_key().as_str()));
        }

        let publisher = Publisher::register(
            Arc::clone(&self.inner.store),
            service,
            host,
            port,
            &self.inner.cancel,
        )
        .await?;

        *self.inner.self_key.write() = Some(publisher.service_key().clone());
        *slot = Some(publisher);
        Ok(())
    }

    /// Removes the local instance's endpoint key from the store.
    ///
    /// The lease is not revoked; it is left to expire. Fails with
    /// [`Error::NotRegistered`] if there is no active registration. On a
    /// store failure the registration stays active so the call can be
    /// retried.
    pub async fn unregister(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.inner.publisher.lock().await;

        let publisher = slot.as_ref().ok_or(Error::NotRegistered)?;
        publisher.delete_key().await?;

        if let Some(publisher) = slot.take() {
            publisher.shutdown();
        }
        *self.inner.self_key.write() = None;
        Ok(())
    }

    /// Returns a channel that resolves `service` through the live
    /// endpoint set.
    ///
    /// The channel tracks registrations as they come and go; individual
    /// connections are established lazily per call. Fails with
    /// [`Error::DialFailed`] when no instance is currently resolved
    /// rather than blocking until one appears.
    pub async fn get_conn(&self, service: &ServiceName) -> Result<Channel> {
        self.ensure_open()?;
        let watch = self.resolver_for(service).await?;

        if watch.is_empty() {
            return Err(Error::dial_failed(service.as_str(), "no live endpoints"));
        }

        debug!(target = %self.conn_target(service), "Dialing service through resolver");
        Ok(watch.channel())
    }

    /// Returns one channel per currently-resolved endpoint of `service`.
    ///
    /// Unlike [`get_conn`](Registry::get_conn), which hands out a single
    /// load-balanced channel, this fans out across the distinct resolved
    /// addresses. Fails with [`Error::DialFailed`] on an empty set.
    pub async fn get_conns(&self, service: &ServiceName) -> Result<Vec<Channel>> {
        self.ensure_open()?;
        let watch = self.resolver_for(service).await?;

        let addrs = watch.addresses();
        if addrs.is_empty() {
            return Err(Error::dial_failed(service.as_str(), "no live endpoints"));
        }

        let opts = self.inner.dial_options.read().clone();
        addrs
            .iter()
            .map(|addr| {
                options::build_endpoint(addr, &opts)
                    .map(|endpoint| endpoint.connect_lazy())
                    .map_err(|e| Error::dial_failed(service.as_str(), e.to_string()))
            })
            .collect()
    }

    /// Current addresses resolved for `service`.
    ///
    /// Establishes the watch if this is the first interest in the name.
    pub async fn resolve(&self, service: &ServiceName) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.resolver_for(service).await?.addresses())
    }

    /// Appends a dial option applied to every subsequently built
    /// endpoint connection.
    pub fn add_option(&self, option: DialOption) {
        self.inner.dial_options.write().push(option);
    }

    /// Dial target string for a service under this registry's schema.
    pub fn conn_target(&self, service: &ServiceName) -> String {
        format!("{}:///{}", self.inner.schema, service)
    }

    /// Dial target of the local instance's own registration, or `None`
    /// if nothing is registered.
    pub fn self_conn_target(&self) -> Option<String> {
        self.inner
            .self_key
            .read()
            .as_ref()
            .map(|key| format!("{}:///{}", self.inner.schema, key))
    }

    /// Stops all background activity and releases the store connection.
    ///
    /// Idempotent: a second call is a no-op. Any other operation after
    /// close fails with [`Error::Closed`]. An active registration is not
    /// unregistered explicitly; its lease expires within the TTL once the
    /// keepalive stops.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.cancel.cancel();

        for entry in self.inner.resolvers.iter() {
            entry.value().shutdown();
        }
        self.inner.resolvers.clear();

        let mut slot = self.inner.publisher.lock().await;
        *slot = None;
        *self.inner.self_key.write() = None;

        info!(schema = %self.inner.schema, "Registry closed");
    }

    /// Gets or establishes the watch for a service name. Concurrent
    /// first calls race benignly; the loser's watch is shut down.
    async fn resolver_for(&self, service: &ServiceName) -> Result<ServiceWatch> {
        if let Some(watch) = self.inner.resolvers.get(service) {
            return Ok(watch.clone());
        }

        let watch = ServiceWatch::spawn(
            Arc::clone(&self.inner.store),
            service.clone(),
            Arc::clone(&self.inner.dial_options),
            &self.inner.cancel,
        )
        .await?;

        match self.inner.resolvers.entry(service.clone()) {
            Entry::Occupied(existing) => {
                watch.shutdown();
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                slot.insert(watch.clone());
                Ok(watch)
            }
        }
    }
}
