//! Cached entities
//!
//! An [`Entity`] is the single local object for one remote record. It holds
//! three views of the record:
//!
//! - the *local* document the application reads and writes,
//! - the *synced* document, the last state confirmed by the server,
//! - the *queue* of patches not yet confirmed.
//!
//! Replaying the queue on top of the synced document always yields the local
//! document. The remote protocol (pull, push, create, delete) lives in
//! [`super::sync`]; this module owns construction, state and accessors.
//!
//! Two locks guard an entity, always taken in this order: the serialization
//! lock (held across remote calls so pull, push and delete never overlap)
//! and the member lock (short critical sections only, never across I/O).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::document::{Document, FieldPath, Patch, ID_FIELD, REVISION_FIELD};
use super::error::{DocumentError, DocumentResult, SyncError, SyncResult};
use super::gateway::RemoteGateway;
use super::patch_queue::PatchQueue;
use super::registry::{EntityKey, InstanceRegistry, Lifecycle, Tracked};
use super::worker::{self, Signal, TaskKind, TaskSlot};
use super::CacheConfig;

static GLOBAL_REGISTRY: Lazy<Arc<InstanceRegistry<Entity>>> =
    Lazy::new(|| Arc::new(InstanceRegistry::new()));

impl InstanceRegistry<Entity> {
    /// Access the process-wide entity registry.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_REGISTRY)
    }
}

/// Everything an entity needs to reach the server: the gateway, the registry
/// it is tracked in, and tuning.
///
/// Entities hold their context and the context's registry holds every
/// registered entity, so neither is freed while the other lives. Call
/// [`InstanceRegistry::clear`] to tear down a context that is no longer used.
pub struct SyncContext {
    gateway: Arc<dyn RemoteGateway>,
    registry: Arc<InstanceRegistry<Entity>>,
    config: CacheConfig,
}

impl SyncContext {
    /// Context using the process-wide registry and default tuning
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Arc<Self> {
        Self::with_config(gateway, CacheConfig::default())
    }

    /// Context using the process-wide registry
    pub fn with_config(gateway: Arc<dyn RemoteGateway>, config: CacheConfig) -> Arc<Self> {
        Self::with_registry(gateway, InstanceRegistry::global(), config)
    }

    /// Context with its own registry, e.g. for a second account
    pub fn isolated(gateway: Arc<dyn RemoteGateway>, config: CacheConfig) -> Arc<Self> {
        Self::with_registry(gateway, Arc::new(InstanceRegistry::new()), config)
    }

    /// Context with an explicit registry
    pub fn with_registry(
        gateway: Arc<dyn RemoteGateway>,
        registry: Arc<InstanceRegistry<Entity>>,
        config: CacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            registry,
            config,
        })
    }

    /// Gateway used for remote calls
    pub fn gateway(&self) -> &dyn RemoteGateway {
        self.gateway.as_ref()
    }

    /// Registry entities are tracked in
    pub fn registry(&self) -> &Arc<InstanceRegistry<Entity>> {
        &self.registry
    }

    /// Engine tuning
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("registry", &self.registry.counts())
            .finish()
    }
}

/// Where an entity is in its life on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Not created on the server yet
    Creating,
    /// Exists on the server
    Active,
    /// Deleted on the server
    Deleted,
}

/// Pending local edits and a remote change touched the same fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    /// Overlapping field paths
    pub paths: Vec<FieldPath>,
    /// Revision the pending patches were computed against
    pub local_revision: String,
    /// Revision observed on the server
    pub remote_revision: String,
    /// Full remote record as fetched
    pub remote: Document,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Remote value for a conflicting path
    pub fn remote_value(&self, path: impl Into<FieldPath>) -> Option<&Value> {
        self.remote.get(path).ok()
    }

    /// Error form of this conflict
    pub fn to_error(&self) -> SyncError {
        SyncError::RevisionConflict {
            paths: self.paths.iter().map(|p| p.to_string()).collect(),
            local_revision: self.local_revision.clone(),
            remote_revision: self.remote_revision.clone(),
        }
    }
}

/// How to settle recorded conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep local edits and push them on top of the remote revision
    KeepLocal,
    /// Drop conflicting local edits in favour of the remote values
    KeepRemote,
}

/// How a pull was reconciled
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reconciled {
    Applied,
    Rebased,
    Conflict(Conflict),
}

/// Mutable state behind the member lock
#[derive(Debug)]
pub(crate) struct EntityState {
    pub(crate) document: Document,
    pub(crate) synced: Document,
    pub(crate) queue: PatchQueue,
    pub(crate) phase: Phase,
    pub(crate) populated: bool,
    pub(crate) last_pull: Option<Instant>,
    pub(crate) last_synced_at: Option<DateTime<Utc>>,
    pub(crate) conflicts: Vec<Conflict>,
}

impl EntityState {
    fn new(document: Document, synced: Document, phase: Phase) -> Self {
        Self {
            document,
            synced,
            queue: PatchQueue::new(),
            phase,
            populated: false,
            last_pull: None,
            last_synced_at: None,
            conflicts: Vec::new(),
        }
    }

    /// Fold a freshly fetched remote record into this state.
    pub(crate) fn reconcile(&mut self, fetched: &Document, remote_revision: &str) -> Reconciled {
        let pending = self.queue.paths();
        let stripped = fetched.without_paths(&pending);

        let local_revision = match self.document.revision() {
            Some(revision) if !self.queue.is_empty() && revision != remote_revision => revision,
            // Safe to adopt as is
            _ => {
                self.adopt(fetched, &stripped);
                return Reconciled::Applied;
            }
        };

        let mut overlapping: Vec<FieldPath> = Vec::new();
        for changed in Document::diff(&self.synced, fetched).paths() {
            if is_bookkeeping(changed) || overlapping.contains(changed) {
                continue;
            }
            if pending.iter().any(|p| p.overlaps(changed)) {
                overlapping.push(changed.clone());
            }
        }

        if overlapping.is_empty() {
            self.adopt(fetched, &stripped);
            return Reconciled::Rebased;
        }

        let conflict = Conflict {
            paths: overlapping,
            local_revision,
            remote_revision: remote_revision.to_string(),
            remote: fetched.clone(),
            detected_at: Utc::now(),
        };
        self.conflicts.push(conflict.clone());
        Reconciled::Conflict(conflict)
    }

    /// Overlay a remote record: fully onto the synced view, and minus the
    /// pending paths onto the local view.
    pub(crate) fn adopt(&mut self, fetched: &Document, stripped: &Document) {
        self.synced = self.synced.merge(&Patch::snapshot(fetched));
        self.document = self.document.merge(&Patch::snapshot(stripped));
        self.populated = true;
    }

    /// Settle every recorded conflict against the most recent remote record.
    pub(crate) fn resolve(&mut self, resolution: Resolution) -> usize {
        let Some(latest) = self.conflicts.last().cloned() else {
            return 0;
        };

        match resolution {
            Resolution::KeepLocal => {
                let stripped = latest.remote.without_paths(&self.queue.paths());
                self.adopt(&latest.remote, &stripped);
            }
            Resolution::KeepRemote => {
                let mut paths: Vec<FieldPath> = Vec::new();
                for path in self.conflicts.iter().flat_map(|c| c.paths.iter()) {
                    if !paths.contains(path) {
                        paths.push(path.clone());
                    }
                }
                self.queue.discard_paths(&paths);
                self.synced = self.synced.merge(&Patch::snapshot(&latest.remote));
                self.document = self.synced.merge(&self.queue.consolidate());
                self.populated = true;
            }
        }

        let resolved = self.conflicts.len();
        self.conflicts.clear();
        resolved
    }

    /// Whether a wait() caller may return
    fn is_settled(&self) -> bool {
        match self.phase {
            Phase::Deleted => true,
            Phase::Creating => false,
            Phase::Active => self.queue.is_empty(),
        }
    }
}

fn is_bookkeeping(path: &FieldPath) -> bool {
    let top = path.segments();
    matches!(top.first().map(String::as_str), Some(ID_FIELD) | Some(REVISION_FIELD))
}

/// Local object for one remote record.
///
/// Obtain entities through [`Entity::create`], [`Entity::get`],
/// [`Entity::fetch`] or [`Entity::fetch_all`]; they are always shared as
/// `Arc<Entity>` and deduplicated through the context's registry.
pub struct Entity {
    pub(crate) kind: &'static str,
    pub(crate) handle: Uuid,
    pub(crate) id: OnceLock<String>,
    pub(crate) ctx: Arc<SyncContext>,
    pub(crate) state: RwLock<EntityState>,
    pub(crate) serial: Mutex<()>,
    pub(crate) signal: Signal,
    push_slot: TaskSlot,
    pull_slot: TaskSlot,
}

impl Tracked for Entity {
    fn identity(&self) -> Option<EntityKey> {
        self.id.get().map(|id| EntityKey::new(self.kind, id))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("id", &self.id.get())
            .finish()
    }
}

impl Entity {
    fn new(ctx: &Arc<SyncContext>, kind: &'static str, state: EntityState) -> Self {
        let id = OnceLock::new();
        if let Some(known) = state.document.id() {
            let _ = id.set(known);
        }
        Self {
            kind,
            handle: Uuid::new_v4(),
            id,
            ctx: Arc::clone(ctx),
            state: RwLock::new(state),
            serial: Mutex::new(()),
            signal: Signal::new(),
            push_slot: TaskSlot::new(),
            pull_slot: TaskSlot::new(),
        }
    }

    /// Unregistered entity standing for an existing record
    pub(crate) fn placeholder(ctx: &Arc<SyncContext>, kind: &'static str, id: &str) -> Self {
        let seed = Document::with_id(id);
        Self::new(ctx, kind, EntityState::new(seed.clone(), seed, Phase::Active))
    }

    /// Create a new record locally and schedule its creation on the server.
    ///
    /// The payload becomes the local document immediately; an id and a
    /// revision are filled in once the server confirms.
    ///
    /// # Panics
    ///
    /// Panics if the payload already carries an `id` or `revision`; those are
    /// assigned by the server.
    pub fn create(ctx: &Arc<SyncContext>, kind: &'static str, payload: Document) -> Arc<Entity> {
        assert!(
            payload.id().is_none() && payload.revision().is_none(),
            "creation payload must not carry server-managed fields"
        );

        let mut state = EntityState::new(payload.clone(), Document::new(), Phase::Creating);
        state.queue.enqueue(Document::diff(&Document::new(), &payload));

        let entity = Arc::new(Self::new(ctx, kind, state));
        ctx.registry.mark_creating(Arc::clone(&entity));
        tracing::info!(kind, handle = %entity.handle, "queued creation");

        entity.schedule(TaskKind::Push);
        entity
    }

    /// The single local object for `id`, refreshed in the background.
    ///
    /// Never blocks on the network; field accessors block until the first
    /// pull has populated the fields they ask for.
    pub fn get(ctx: &Arc<SyncContext>, kind: &'static str, id: &str) -> Arc<Entity> {
        let entity = Self::resolve(ctx, kind, id);
        entity.schedule(TaskKind::Pull);
        entity
    }

    /// Like [`Entity::get`], but pulls synchronously before returning.
    pub fn fetch(ctx: &Arc<SyncContext>, kind: &'static str, id: &str) -> SyncResult<Arc<Entity>> {
        let entity = Self::resolve(ctx, kind, id);
        entity.pull()?;
        Ok(entity)
    }

    fn resolve(ctx: &Arc<SyncContext>, kind: &'static str, id: &str) -> Arc<Entity> {
        let key = EntityKey::new(kind, id);
        match ctx.registry.lookup(&key) {
            Some(existing) => existing,
            None => ctx
                .registry
                .register(Arc::new(Self::placeholder(ctx, kind, id))),
        }
    }

    /// API kind of this entity (`password`)
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Server id, if assigned
    pub fn id(&self) -> Option<String> {
        self.id.get().cloned()
    }

    /// Block until the server has assigned an id.
    pub fn wait_id(&self) -> String {
        let mut found = None;
        self.signal.wait_until(
            || {
                found = self.id.get().cloned();
                found.is_some()
            },
            None,
        );
        found.unwrap_or_default()
    }

    /// Local handle, stable for the life of the object
    pub fn handle(&self) -> Uuid {
        self.handle
    }

    /// Readable name for logs and errors
    pub(crate) fn describe(&self) -> String {
        match self.id.get() {
            Some(id) => format!("{}/{}", self.kind, id),
            None => format!("{}#{}", self.kind, self.handle),
        }
    }

    /// Context this entity syncs through
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Registry state of this entity
    pub fn lifecycle(self: &Arc<Self>) -> Option<Lifecycle> {
        self.ctx.registry.lifecycle(self)
    }

    /// Read a field, blocking until it is known.
    ///
    /// Unblocks early with [`DocumentError::MissingField`] only if the entity
    /// gets deleted without the field ever appearing.
    pub fn get_field(&self, path: impl Into<FieldPath>) -> DocumentResult<Value> {
        self.read_field(path.into(), None)
    }

    /// Read a field, giving up after `timeout`.
    pub fn get_field_timeout(
        &self,
        path: impl Into<FieldPath>,
        timeout: Duration,
    ) -> DocumentResult<Value> {
        self.read_field(path.into(), Some(timeout))
    }

    fn read_field(&self, path: FieldPath, timeout: Option<Duration>) -> DocumentResult<Value> {
        let mut value = None;
        self.signal.wait_until(
            || {
                let state = self.state.read();
                match state.document.get(&path) {
                    Ok(found) => {
                        value = Some(found.clone());
                        true
                    }
                    Err(_) => state.phase == Phase::Deleted,
                }
            },
            timeout,
        );
        value.ok_or_else(|| DocumentError::MissingField(path.to_string()))
    }

    /// Read a field without blocking
    pub fn peek_field(&self, path: impl Into<FieldPath>) -> Option<Value> {
        self.state.read().document.get(path).ok().cloned()
    }

    /// Set one top-level field and schedule a push.
    pub fn set_field(self: &Arc<Self>, field: &str, value: impl Into<Value>) -> SyncResult<()> {
        self.set_fields([(field, value.into())])
    }

    /// Set several top-level fields as one patch and schedule a push.
    ///
    /// # Panics
    ///
    /// Panics when asked to write `id` or `revision`.
    pub fn set_fields<I, K>(self: &Arc<Self>, fields: I) -> SyncResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.mutate(|document| {
            for (field, value) in fields {
                let field = field.as_ref();
                assert_writable(field);
                document.set(field, value);
            }
        })
    }

    /// Remove a top-level field and schedule a push.
    pub fn remove_field(self: &Arc<Self>, field: &str) -> SyncResult<()> {
        assert_writable(field);
        self.mutate(|document| {
            document.remove(field);
        })
    }

    fn mutate<F>(self: &Arc<Self>, edit: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Document),
    {
        {
            let mut state = self.state.write();
            if state.phase == Phase::Deleted {
                return Err(SyncError::Deleted(self.describe()));
            }

            let mut next = state.document.clone();
            edit(&mut next);
            let patch = Document::diff(&state.document, &next);
            if patch.is_empty() {
                return Ok(());
            }

            let outcome = state.queue.enqueue(patch);
            state.document = next;
            tracing::debug!(
                entity = %self.describe(),
                ?outcome,
                pending = state.queue.len(),
                "local edit queued"
            );
        }

        self.signal.notify();
        self.schedule(TaskKind::Push);
        Ok(())
    }

    /// Snapshot of the local document
    pub fn document(&self) -> Document {
        self.state.read().document.clone()
    }

    /// Snapshot of the last server-confirmed document
    pub fn synced_document(&self) -> Document {
        self.state.read().synced.clone()
    }

    /// Number of queued, unconfirmed patches
    pub fn pending_patches(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Consolidated view of every unconfirmed edit
    pub fn pending_patch(&self) -> Patch {
        self.state.read().queue.consolidate()
    }

    /// Server phase of this entity
    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    /// Whether at least one pull has populated the document
    pub fn is_populated(&self) -> bool {
        self.state.read().populated
    }

    /// Revision of the local document
    pub fn revision(&self) -> Option<String> {
        self.state.read().document.revision()
    }

    /// Wall-clock time of the last successful pull
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_synced_at
    }

    /// Conflicts recorded since the last resolution
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.state.read().conflicts.clone()
    }

    /// Fails with the most recent conflict, if any is recorded.
    pub fn ensure_consistent(&self) -> SyncResult<()> {
        match self.state.read().conflicts.last() {
            Some(conflict) => Err(conflict.to_error()),
            None => Ok(()),
        }
    }

    /// Settle recorded conflicts and schedule a push of what remains.
    ///
    /// Returns the number of conflicts resolved.
    pub fn resolve_conflicts(self: &Arc<Self>, resolution: Resolution) -> usize {
        let resolved = {
            let _serial = self.serial.lock();
            self.state.write().resolve(resolution)
        };
        if resolved == 0 {
            return 0;
        }

        tracing::info!(entity = %self.describe(), ?resolution, resolved, "conflicts resolved");
        self.signal.notify();
        self.schedule(TaskKind::Push);
        resolved
    }

    /// Schedule a background pull and push.
    pub fn sync(self: &Arc<Self>) {
        if self.phase() == Phase::Deleted {
            return;
        }
        self.schedule(TaskKind::Pull);
        self.schedule(TaskKind::Push);
    }

    /// Block until every queued patch is confirmed and no remote call is in
    /// progress.
    pub fn wait(&self) {
        self.signal.wait_until(|| self.state.read().is_settled(), None);
        drop(self.serial.lock());
    }

    /// Like [`Entity::wait`], giving up after `timeout`. Returns true when
    /// settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if !self
            .signal
            .wait_until(|| self.state.read().is_settled(), Some(timeout))
        {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.serial.try_lock_for(remaining).is_some()
    }

    pub(crate) fn schedule(self: &Arc<Self>, kind: TaskKind) {
        match kind {
            TaskKind::Pull => worker::schedule(self, kind, |e: &Entity| &e.pull_slot, Entity::run_pull),
            TaskKind::Push => worker::schedule(self, kind, |e: &Entity| &e.push_slot, Entity::run_push),
        }
    }
}

fn assert_writable(field: &str) {
    assert!(
        field != ID_FIELD && field != REVISION_FIELD,
        "field '{field}' is managed by the server"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_at(revision: &str, fields: Value) -> EntityState {
        let mut doc = Document::try_from(fields).unwrap();
        doc.set(ID_FIELD, "p1");
        doc.set(REVISION_FIELD, revision);
        EntityState::new(doc.clone(), doc, Phase::Active)
    }

    fn remote(revision: &str, fields: Value) -> Document {
        let mut doc = Document::try_from(fields).unwrap();
        doc.set(ID_FIELD, "p1");
        doc.set(REVISION_FIELD, revision);
        doc
    }

    fn edit(state: &mut EntityState, field: &str, value: Value) {
        let next = state.document.clone().with(field, value);
        let patch = Document::diff(&state.document, &next);
        state.queue.enqueue(patch);
        state.document = next;
    }

    fn replay_holds(state: &EntityState) -> bool {
        state.synced.apply(&state.queue.consolidate()).unwrap() == state.document
    }

    #[test]
    fn test_first_reconcile_populates() {
        let seed = Document::with_id("p1");
        let mut state = EntityState::new(seed.clone(), seed, Phase::Active);
        let fetched = remote("r1", json!({"label": "mail"}));

        assert_eq!(state.reconcile(&fetched, "r1"), Reconciled::Applied);
        assert!(state.populated);
        assert_eq!(state.document, fetched);
        assert_eq!(state.synced, fetched);
    }

    #[test]
    fn test_reconcile_keeps_pending_values() {
        let mut state = state_at("r1", json!({"label": "a", "username": "u"}));
        edit(&mut state, "label", json!("local"));

        let fetched = remote("r2", json!({"label": "a", "username": "remote"}));
        assert_eq!(state.reconcile(&fetched, "r2"), Reconciled::Rebased);

        assert_eq!(state.document.get("label").unwrap(), &json!("local"));
        assert_eq!(state.document.get("username").unwrap(), &json!("remote"));
        assert_eq!(state.document.revision().as_deref(), Some("r2"));
        assert!(replay_holds(&state));
    }

    #[test]
    fn test_reconcile_detects_overlap() {
        let mut state = state_at("r1", json!({"label": "a"}));
        edit(&mut state, "label", json!("local"));

        let fetched = remote("r2", json!({"label": "remote"}));
        let Reconciled::Conflict(conflict) = state.reconcile(&fetched, "r2") else {
            panic!("expected a conflict");
        };

        assert_eq!(conflict.paths, vec![FieldPath::field("label")]);
        assert_eq!(conflict.local_revision, "r1");
        assert_eq!(conflict.remote_value("label"), Some(&json!("remote")));
        // Nothing applied
        assert_eq!(state.document.revision().as_deref(), Some("r1"));
        assert_eq!(state.document.get("label").unwrap(), &json!("local"));
        assert_eq!(state.conflicts.len(), 1);
    }

    #[test]
    fn test_same_revision_with_pending_is_applied() {
        let mut state = state_at("r1", json!({"label": "a"}));
        edit(&mut state, "label", json!("local"));

        let fetched = remote("r1", json!({"label": "a"}));
        assert_eq!(state.reconcile(&fetched, "r1"), Reconciled::Applied);
        assert_eq!(state.document.get("label").unwrap(), &json!("local"));
        assert!(replay_holds(&state));
    }

    #[test]
    fn test_resolve_keep_remote() {
        let mut state = state_at("r1", json!({"label": "a", "notes": "n"}));
        edit(&mut state, "label", json!("local"));
        edit(&mut state, "notes", json!("mine"));
        let fetched = remote("r2", json!({"label": "remote", "notes": "n"}));
        state.reconcile(&fetched, "r2");

        assert_eq!(state.resolve(Resolution::KeepRemote), 1);
        assert!(state.conflicts.is_empty());
        assert_eq!(state.document.get("label").unwrap(), &json!("remote"));
        assert_eq!(state.document.get("notes").unwrap(), &json!("mine"));
        assert_eq!(state.queue.paths(), vec![FieldPath::field("notes")]);
        assert!(replay_holds(&state));
    }

    #[test]
    fn test_resolve_keep_local() {
        let mut state = state_at("r1", json!({"label": "a"}));
        edit(&mut state, "label", json!("local"));
        let fetched = remote("r2", json!({"label": "remote"}));
        state.reconcile(&fetched, "r2");

        assert_eq!(state.resolve(Resolution::KeepLocal), 1);
        assert_eq!(state.document.get("label").unwrap(), &json!("local"));
        assert_eq!(state.document.revision().as_deref(), Some("r2"));
        assert_eq!(state.synced.get("label").unwrap(), &json!("remote"));
        assert!(replay_holds(&state));
    }

    #[test]
    fn test_settled_by_phase() {
        let mut state = state_at("r1", json!({}));
        assert!(state.is_settled());
        edit(&mut state, "label", json!("x"));
        assert!(!state.is_settled());
        state.phase = Phase::Deleted;
        assert!(state.is_settled());
    }
}
