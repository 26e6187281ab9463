//! # Lookout Registry
//!
//! Service discovery and registration layer between gRPC server processes
//! and a strongly-consistent key-value coordination store (etcd).
//!
//! A process advertises "I am an instance of service S, reachable at
//! address A" with automatic expiry if the process dies; gRPC clients
//! resolve a logical service name into live connections without hardcoded
//! addresses.
//!
//! This crate provides:
//! - [`store::Store`]: the coordination store seam (etcd-backed and
//!   in-memory implementations)
//! - [`publisher::Publisher`]: the write side — lease-backed registration
//!   with a supervised keepalive loop
//! - [`resolver::ServiceWatch`]: the read side — a watch-fed, live endpoint
//!   set bound to a tonic balance channel
//! - [`registry::Registry`]: the process-wide facade combining both with
//!   connection acquisition
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = Registry::connect("lookout", ["http://localhost:2379"]).await?;
//! registry.register(&ServiceName::from("echo"), "127.0.0.1", 9000).await?;
//!
//! let channel = registry.get_conn(&ServiceName::from("echo")).await?;
//! let mut client = EchoClient::new(channel);
//!
//! registry.unregister().await?;
//! registry.close().await;
//! ```

pub mod options;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod store;

mod backoff;

// Re-export commonly used items
pub use options::DialOption;
pub use publisher::{Publisher, KEEPALIVE_INTERVAL, LEASE_TTL_SECS};
pub use registry::Registry;
pub use resolver::ServiceWatch;
pub use store::{etcd::EtcdStore, memory::MemoryStore, Store, WatchEvent};

pub use lookout_common::{Endpoint, Error, LeaseId, Result, ServiceKey, ServiceName};
