//! Core domain types for service registration and discovery.

use std::fmt;

/// Identifier of a lease granted by the coordination store.
///
/// Keys attached to a lease are deleted by the store when the lease
/// expires without renewal.
pub type LeaseId = i64;

/// Logical name of a service (e.g., `"echo"`).
///
/// A service name groups all registered instances of one service under a
/// common key prefix in the coordination store.
///
/// # Example
/// ```
/// use lookout_common::ServiceName;
///
/// let name = ServiceName::from("echo");
/// assert_eq!(name.as_str(), "echo");
/// assert_eq!(name.prefix(), "echo/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a new ServiceName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the service name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key prefix all instances of this service live under.
    ///
    /// Prefix scans and watches in the store use this form.
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store key identifying one running instance of a service.
///
/// Composite of the service name and the instance address:
/// `<serviceName>/<host>:<port>`. Immutable once a registration
/// succeeds; a new key is derived only on re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Derives the key for an instance of `service` at `host:port`.
    pub fn new(service: &ServiceName, host: &str, port: u16) -> Self {
        Self(format!("{}/{}:{}", service, host, port))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dialable network endpoint, stored as the value under a [`ServiceKey`].
///
/// The wire representation is the plain UTF-8 address `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addr: String,
}

impl Endpoint {
    /// Creates an endpoint from host and port.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
        }
    }

    /// Creates an endpoint from an already-formatted `host:port` address.
    pub fn from_addr(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Returns the `host:port` address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
