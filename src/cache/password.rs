//! Password records
//!
//! Typed facade over an [`Entity`] of kind `password`. The secret is stored
//! in the `password` field together with its `hash`, the lowercase hex SHA-1
//! the server uses for breach and duplicate checks.

use serde_json::Value;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;

use super::document::Document;
use super::entity::{Entity, SyncContext};
use super::error::{DocumentResult, SyncResult};

/// API kind of password records
pub const KIND: &str = "password";

const LABEL: &str = "label";
const USERNAME: &str = "username";
const SECRET: &str = "password";
const HASH: &str = "hash";
const URL: &str = "url";
const NOTES: &str = "notes";

/// Lowercase hex SHA-1 of a secret
pub fn secret_hash(secret: &str) -> String {
    hex::encode(Sha1::digest(secret.as_bytes()))
}

/// A cached password record.
///
/// Cloning yields another handle to the same underlying entity.
#[derive(Debug, Clone)]
pub struct Password {
    entity: Arc<Entity>,
}

impl Password {
    /// Create a new password locally; the server copy is created in the
    /// background.
    pub fn create(ctx: &Arc<SyncContext>, label: &str, secret: &str) -> Self {
        let payload = Document::new()
            .with(LABEL, label)
            .with(SECRET, secret)
            .with(HASH, secret_hash(secret));
        Self::from_entity(Entity::create(ctx, KIND, payload))
    }

    /// The password with `id`, refreshed in the background
    pub fn get(ctx: &Arc<SyncContext>, id: &str) -> Self {
        Self::from_entity(Entity::get(ctx, KIND, id))
    }

    /// The password with `id`, pulled before returning
    pub fn fetch(ctx: &Arc<SyncContext>, id: &str) -> SyncResult<Self> {
        Entity::fetch(ctx, KIND, id).map(Self::from_entity)
    }

    /// Every password on the server
    pub fn fetch_all(ctx: &Arc<SyncContext>) -> SyncResult<Vec<Self>> {
        let entities = Entity::fetch_all(ctx, KIND)?;
        Ok(entities.into_iter().map(Self::from_entity).collect())
    }

    /// Passwords currently known to the context's registry
    pub fn all_known(ctx: &Arc<SyncContext>) -> Vec<Self> {
        ctx.registry()
            .active()
            .into_iter()
            .filter(|entity| entity.kind() == KIND)
            .map(Self::from_entity)
            .collect()
    }

    fn from_entity(entity: Arc<Entity>) -> Self {
        Self { entity }
    }

    /// Underlying entity
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Server id; blocks until the record has been created
    pub fn id(&self) -> String {
        self.entity.wait_id()
    }

    /// True if both handles refer to the same local object
    pub fn same_instance(&self, other: &Password) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }

    /// Label
    pub fn label(&self) -> DocumentResult<String> {
        self.text(LABEL)
    }

    /// Set the label
    pub fn set_label(&self, label: &str) -> SyncResult<()> {
        self.entity.set_field(LABEL, label)
    }

    /// Account user name
    pub fn username(&self) -> DocumentResult<String> {
        self.text(USERNAME)
    }

    /// Set the account user name
    pub fn set_username(&self, username: &str) -> SyncResult<()> {
        self.entity.set_field(USERNAME, username)
    }

    /// The secret
    pub fn password(&self) -> DocumentResult<String> {
        self.text(SECRET)
    }

    /// Replace the secret; its hash is updated in the same patch.
    pub fn set_password(&self, secret: &str) -> SyncResult<()> {
        self.entity.set_fields([
            (SECRET, Value::from(secret)),
            (HASH, Value::from(secret_hash(secret))),
        ])
    }

    /// SHA-1 of the secret as stored on the server
    pub fn hash(&self) -> DocumentResult<String> {
        self.text(HASH)
    }

    /// Website
    pub fn url(&self) -> DocumentResult<String> {
        self.text(URL)
    }

    /// Set the website
    pub fn set_url(&self, url: &str) -> SyncResult<()> {
        self.entity.set_field(URL, url)
    }

    /// Notes
    pub fn notes(&self) -> DocumentResult<String> {
        self.text(NOTES)
    }

    /// Set the notes
    pub fn set_notes(&self, notes: &str) -> SyncResult<()> {
        self.entity.set_field(NOTES, notes)
    }

    /// Schedule a background pull and push
    pub fn sync(&self) {
        self.entity.sync();
    }

    /// Block until local edits are confirmed
    pub fn wait(&self) {
        self.entity.wait();
    }

    /// Like [`Password::wait`] with a timeout; true when settled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.entity.wait_timeout(timeout)
    }

    /// Delete on the server
    pub fn delete(&self) -> SyncResult<()> {
        self.entity.delete()
    }

    fn text(&self, field: &str) -> DocumentResult<String> {
        Ok(match self.entity.get_field(field)? {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }
}
