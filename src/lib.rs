//! ncpass – client-side cache and synchronization for Nextcloud Passwords
//!
//! This crate keeps local objects in step with records stored on a
//! Nextcloud Passwords server:
//! - One local object per remote record, deduplicated by identity
//! - Optimistic local writes buffered as an ordered queue of patches
//! - Background pull/push reconciliation with revision-based conflict detection
//! - Field accessors that block until a value is known

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Cache, registry and synchronization engine
pub mod cache;

// Re-export key types for convenience
pub use cache::{CacheConfig, Entity, Password, Session, SyncContext};

/// Current version of the ncpass crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the Nextcloud Passwords API spoken by the HTTP gateway
pub const API_VERSION: &str = "1.0";
