//! Cache and synchronization engine
//!
//! This module ties together the pieces that keep local entity objects in
//! step with their authoritative copies on the server: documents and
//! patches, the per-entity patch queue, the process-wide instance registry,
//! the remote gateway capability and the pull/push engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// Submodules
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod password;
pub mod patch_queue;
pub mod registry;
pub mod session;
pub mod sync;
pub mod worker;

/// Tuning for the synchronization engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Pulls within this many milliseconds of the last successful pull are skipped
    pub pull_debounce_ms: u64,

    /// Timeout for a single remote call, in milliseconds
    pub request_timeout_ms: u64,

    /// User agent sent by the HTTP gateway
    pub user_agent: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pull_debounce_ms: 250,
            request_timeout_ms: 30_000,
            user_agent: format!("ncpass/{}", crate::VERSION),
        }
    }
}

impl CacheConfig {
    /// Debounce window for pulls
    pub fn pull_debounce(&self) -> Duration {
        Duration::from_millis(self.pull_debounce_ms)
    }

    /// Timeout for a single remote call
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// Re-export commonly used types
pub use document::{Document, FieldPath, Patch, PatchOp};
pub use entity::{Conflict, Entity, Phase, Resolution, SyncContext};
pub use error::{CacheError, DocumentError, SyncError, TransportError};
pub use gateway::{Action, Method, RemoteGateway};
pub use password::Password;
pub use patch_queue::PatchQueue;
pub use registry::{EntityKey, InstanceRegistry, Lifecycle};
pub use session::{HttpGateway, Session};
pub use sync::{PullOutcome, PushOutcome};
