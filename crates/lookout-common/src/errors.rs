//! Error types for the lookout service discovery layer.
//!
//! Two levels of errors exist:
//! - [`Error`]: the public error surface returned by registry operations.
//! - [`StoreError`]: failures of the underlying coordination store client,
//!   used at the store trait seam and wrapped into [`Error`] where they
//!   cross into the public API.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Public error surface of the registry.
///
/// All foreground failures are returned to the immediate caller; callers
/// are expected to treat them as fatal to the operation, not to the
/// process, and apply their own retry policy.
#[derive(Debug, Error)]
pub enum Error {
    /// The coordination store was unreachable at open time.
    #[error("Failed to connect to coordination store: {reason}")]
    ConnectFailed { reason: String },

    /// Lease grant or endpoint key write failed during registration.
    #[error("Registration failed for {key}: {reason}")]
    RegistrationFailed { key: String, reason: String },

    /// A second registration was attempted on a registry that already
    /// holds an active one. A registry instance represents at most one
    /// active registration.
    #[error("Already registered as {key}")]
    AlreadyRegistered { key: String },

    /// Unregister was called without a prior successful registration.
    #[error("No active registration to unregister")]
    NotRegistered,

    /// Connection establishment failed, including the empty-resolved-set
    /// case for a service no instance has registered under.
    #[error("Dial failed for service {service}: {reason}")]
    DialFailed { service: String, reason: String },

    /// Operation attempted after the registry was closed.
    #[error("Registry is closed")]
    Closed,

    /// A store-level failure that does not map onto a more specific kind.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Creates a ConnectFailed error.
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }

    /// Creates a RegistrationFailed error.
    pub fn registration_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates an AlreadyRegistered error.
    pub fn already_registered(key: impl Into<String>) -> Self {
        Self::AlreadyRegistered { key: key.into() }
    }

    /// Creates a DialFailed error.
    pub fn dial_failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the coordination store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the store could not be established.
    #[error("Store connection failed: {0}")]
    Connect(String),

    /// A key-value or lease operation was rejected or the store became
    /// unreachable mid-operation.
    #[error("Store operation failed: {0}")]
    Operation(String),

    /// The lease is gone on the store side; keys attached to it have been
    /// or will be deleted.
    #[error("Lease {0} expired or not found")]
    LeaseExpired(LeaseIdRepr),

    /// The watch stream broke and must be re-established by the consumer.
    #[error("Watch stream interrupted: {0}")]
    WatchInterrupted(String),
}

type LeaseIdRepr = i64;

impl StoreError {
    /// Creates an Operation error.
    pub fn operation(reason: impl Into<String>) -> Self {
        Self::Operation(reason.into())
    }

    /// Creates a WatchInterrupted error.
    pub fn watch_interrupted(reason: impl Into<String>) -> Self {
        Self::WatchInterrupted(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::connect_failed("no endpoint reachable");
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert!(err.to_string().contains("no endpoint reachable"));
    }

    #[test]
    fn test_registration_failed_message() {
        let err = Error::registration_failed("echo/127.0.0.1:9000", "lease grant rejected");
        assert_eq!(
            err.to_string(),
            "Registration failed for echo/127.0.0.1:9000: lease grant rejected"
        );
    }

    #[test]
    fn test_store_error_wraps_into_error() {
        let store_err = StoreError::operation("kv put rejected");
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(StoreError::Operation(_))));
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = Error::dial_failed("echo", "no live endpoints");
        match err {
            Error::DialFailed { service, .. } => assert_eq!(service, "echo"),
            _ => panic!("Wrong error type"),
        }
    }
}
