//! # Lookout Common
//!
//! Shared domain types and error definitions for the lookout service
//! discovery layer.
//!
//! This crate provides:
//! - Identifier newtypes (`ServiceName`, `ServiceKey`)
//! - The `Endpoint` value stored in the coordination store
//! - Error enums used across the workspace

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, Result, StoreError, StoreResult};
pub use types::{Endpoint, LeaseId, ServiceKey, ServiceName};
