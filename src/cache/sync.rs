//! Pull/push protocol
//!
//! Remote half of [`Entity`]: fetching and reconciling the server copy,
//! pushing queued patches, the create path for entities without an id, and
//! deletion. Every remote call here runs with the entity's serialization
//! lock held and its member lock released. Registry updates happen only
//! after both are dropped.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::document::{Document, ID_FIELD, REVISION_FIELD};
use super::entity::{Conflict, Entity, Phase, Reconciled, SyncContext};
use super::error::{DocumentError, SyncError, SyncResult, TransportResult};
use super::gateway::Action;
use super::registry::EntityKey;
use super::worker::TaskKind;

/// Result of a pull
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// Debounced; no remote call was made
    Skipped,
    /// Remote record applied (first pull, nothing pending, or same revision)
    Applied,
    /// Remote changes applied underneath disjoint pending edits
    Rebased,
    /// Remote changes overlap pending edits; nothing was applied
    Conflict(Conflict),
}

/// Result of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing was queued
    Idle,
    /// Waiting for a first pull to learn the base revision
    Deferred,
    /// Recorded conflicts must be resolved before anything is sent
    Blocked,
    /// The record was created on the server
    Created {
        /// Server-assigned id
        id: String,
        /// Initial revision
        revision: String,
    },
    /// Queued patches were confirmed
    Updated {
        /// Number of queue entries confirmed
        acknowledged: usize,
        /// New revision
        revision: String,
    },
}

impl Entity {
    /// Fetch the remote record and reconcile it with local state.
    ///
    /// Pulls within the debounce window of the last successful pull are
    /// skipped. On a revision conflict nothing is applied and the conflict is
    /// recorded (see [`Entity::conflicts`]).
    pub fn pull(self: &Arc<Self>) -> SyncResult<PullOutcome> {
        let _serial = self.serial.lock();

        let id = {
            let state = self.state.read();
            match state.phase {
                Phase::Deleted => return Err(SyncError::Deleted(self.describe())),
                Phase::Creating => return Err(SyncError::NotCreated),
                Phase::Active => {}
            }
            if let Some(last) = state.last_pull {
                if last.elapsed() < self.ctx.config().pull_debounce() {
                    tracing::trace!(entity = %self.describe(), "pull debounced");
                    return Ok(PullOutcome::Skipped);
                }
            }
            self.id().ok_or(SyncError::NotCreated)?
        };

        let response = call(&self.ctx, Action::Show, self.kind, &Document::with_id(&id));
        let (fetched, revision) = expect_record(&id, response)?;
        Ok(self.reconcile(&fetched, &revision))
    }

    /// Apply a fetched record. Caller holds the serialization lock.
    fn reconcile(&self, fetched: &Document, revision: &str) -> PullOutcome {
        let outcome = {
            let mut state = self.state.write();
            let outcome = state.reconcile(fetched, revision);
            state.last_pull = Some(Instant::now());
            state.last_synced_at = Some(Utc::now());
            outcome
        };
        self.signal.notify();

        match outcome {
            Reconciled::Applied => {
                tracing::debug!(entity = %self.describe(), revision, "pulled");
                PullOutcome::Applied
            }
            Reconciled::Rebased => {
                tracing::debug!(entity = %self.describe(), revision, "pulled underneath pending edits");
                PullOutcome::Rebased
            }
            Reconciled::Conflict(conflict) => {
                tracing::warn!(
                    entity = %self.describe(),
                    local = %conflict.local_revision,
                    remote = %conflict.remote_revision,
                    paths = ?conflict.paths,
                    "revision conflict"
                );
                PullOutcome::Conflict(conflict)
            }
        }
    }

    /// Send pending changes: the create call for a new entity, otherwise one
    /// update carrying every queued patch.
    pub fn push(self: &Arc<Self>) -> SyncResult<PushOutcome> {
        let outcome = {
            let _serial = self.serial.lock();
            let phase = self.state.read().phase;
            match phase {
                Phase::Creating => self.push_create()?,
                Phase::Active => self.push_update()?,
                Phase::Deleted => return Err(SyncError::Deleted(self.describe())),
            }
        };

        if let PushOutcome::Created { .. } = &outcome {
            if let Some(displaced) = self.ctx.registry().promote_to_active(self) {
                let stranded = displaced.pending_patches();
                if stranded > 0 {
                    tracing::warn!(
                        entity = %self.describe(),
                        displaced = %displaced.handle,
                        stranded,
                        "replaced an instance holding unpushed edits"
                    );
                } else {
                    tracing::debug!(entity = %self.describe(), displaced = %displaced.handle, "replaced placeholder");
                }
            }
            self.schedule(TaskKind::Pull);
            if self.pending_patches() > 0 {
                self.schedule(TaskKind::Push);
            }
        }
        Ok(outcome)
    }

    fn push_create(&self) -> SyncResult<PushOutcome> {
        let body = {
            let mut state = self.state.write();
            match state.queue.begin_push() {
                Some(patch) => Document::new().merge(&patch),
                // Created with an empty payload
                None => state.document.clone(),
            }
        };

        let response = call(&self.ctx, Action::Create, self.kind, &body);
        let (id, revision) = match expect_created(response) {
            Ok(assigned) => assigned,
            Err(err) => {
                self.state.write().queue.abort_push();
                return Err(err);
            }
        };

        {
            let mut state = self.state.write();
            state.queue.acknowledge();
            let mut synced = body;
            synced.set(ID_FIELD, id.as_str());
            synced.set(REVISION_FIELD, revision.as_str());
            state.synced = synced;
            state.document.set(ID_FIELD, id.as_str());
            state.document.set(REVISION_FIELD, revision.as_str());
            state.phase = Phase::Active;
            state.populated = true;
        }
        if self.id.set(id.clone()).is_err() {
            tracing::warn!(entity = %self.describe(), "identity assigned twice");
        }
        self.signal.notify();

        tracing::info!(kind = self.kind, id = %id, revision = %revision, "created");
        Ok(PushOutcome::Created { id, revision })
    }

    fn push_update(&self) -> SyncResult<PushOutcome> {
        let id = self.id().ok_or(SyncError::NotCreated)?;
        let body = {
            let mut state = self.state.write();
            if state.queue.is_empty() {
                return Ok(PushOutcome::Idle);
            }
            if state.synced.revision().is_none() {
                return Ok(PushOutcome::Deferred);
            }
            // The base revision is stale until a resolution adopts the remote one
            if !state.conflicts.is_empty() {
                return Ok(PushOutcome::Blocked);
            }
            match state.queue.begin_push() {
                Some(patch) => state.synced.merge(&patch),
                None => return Ok(PushOutcome::Idle),
            }
        };

        let response = call(&self.ctx, Action::Update, self.kind, &body);
        let revision = match expect_record(&id, response) {
            Ok((_, revision)) => revision,
            Err(err) => {
                self.state.write().queue.abort_push();
                return Err(err);
            }
        };

        let acknowledged = {
            let mut state = self.state.write();
            let confirmed = state.queue.acknowledge();
            let mut synced = state.synced.clone();
            for patch in &confirmed {
                synced = synced.merge(patch);
            }
            synced.set(REVISION_FIELD, revision.as_str());
            state.synced = synced;
            state.document.set(REVISION_FIELD, revision.as_str());
            confirmed.len()
        };
        self.signal.notify();

        tracing::info!(entity = %self.describe(), acknowledged, revision = %revision, "pushed");
        Ok(PushOutcome::Updated {
            acknowledged,
            revision,
        })
    }

    /// Delete the record on the server and unregister this entity.
    ///
    /// Deleting an already deleted entity is a no-op.
    pub fn delete(self: &Arc<Self>) -> SyncResult<()> {
        {
            let _serial = self.serial.lock();
            let body = {
                let state = self.state.read();
                match state.phase {
                    Phase::Deleted => return Ok(()),
                    Phase::Creating => return Err(SyncError::NotCreated),
                    Phase::Active => {}
                }
                let id = self.id().ok_or(SyncError::NotCreated)?;
                let mut body = Document::with_id(&id);
                if let Some(revision) = state.synced.revision() {
                    body.set(REVISION_FIELD, revision);
                }
                body
            };

            let id = body.id().unwrap_or_default();
            let response = call(&self.ctx, Action::Delete, self.kind, &body);
            expect_record(&id, response)?;
            self.state.write().phase = Phase::Deleted;
        }
        self.signal.notify();

        self.ctx.registry().unregister(self);
        tracing::info!(entity = %self.describe(), "deleted");
        Ok(())
    }

    /// Fetch every record of `kind` and reconcile each with its local object.
    ///
    /// Records lacking an id or revision are skipped with a warning.
    pub fn fetch_all(ctx: &Arc<SyncContext>, kind: &'static str) -> SyncResult<Vec<Arc<Entity>>> {
        let response = call(ctx, Action::List, kind, &Document::new())?;
        let records: Vec<Value> = match response {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, record)| record).collect(),
            other => return Err(DocumentError::NotAnObject(other.to_string()).into()),
        };

        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            let fetched = match Document::try_from(record) {
                Ok(document) => document,
                Err(err) => {
                    tracing::warn!(kind, error = %err, "skipping malformed record");
                    continue;
                }
            };
            let (Some(id), Some(revision)) = (fetched.id(), fetched.revision()) else {
                tracing::warn!(kind, "skipping record without id or revision");
                continue;
            };

            let key = EntityKey::new(kind, &id);
            let entity = match ctx.registry().lookup(&key) {
                Some(existing) => existing,
                None => ctx
                    .registry()
                    .register(Arc::new(Entity::placeholder(ctx, kind, &id))),
            };
            if entity.phase() == Phase::Deleted {
                continue;
            }

            {
                let _serial = entity.serial.lock();
                entity.reconcile(&fetched, &revision);
            }
            entities.push(entity);
        }

        tracing::debug!(kind, count = entities.len(), "listed");
        Ok(entities)
    }

    pub(crate) fn run_pull(self: &Arc<Self>) {
        match self.pull() {
            Ok(PullOutcome::Conflict(_)) => {}
            Ok(_) => {
                if self.pending_patches() > 0 {
                    self.schedule(TaskKind::Push);
                }
            }
            Err(SyncError::NotCreated) => {
                tracing::trace!(entity = %self.describe(), "pull before creation ignored");
            }
            Err(err) => {
                tracing::warn!(
                    entity = %self.describe(),
                    error = %err,
                    retryable = err.is_retryable(),
                    "background pull failed"
                );
            }
        }
    }

    pub(crate) fn run_push(self: &Arc<Self>) {
        match self.push() {
            Ok(PushOutcome::Deferred) => self.schedule(TaskKind::Pull),
            Ok(PushOutcome::Blocked) => {
                tracing::debug!(entity = %self.describe(), "push held back by unresolved conflicts");
            }
            Ok(outcome) => {
                tracing::trace!(entity = %self.describe(), ?outcome, "background push done");
            }
            Err(err) => {
                tracing::warn!(
                    entity = %self.describe(),
                    error = %err,
                    retryable = err.is_retryable(),
                    "background push failed; changes stay queued"
                );
            }
        }
    }
}

fn call(ctx: &SyncContext, action: Action, kind: &str, body: &Document) -> TransportResult<Value> {
    let path = action.path(kind);
    tracing::trace!(method = %action.method(), path = %path, "remote call");
    ctx.gateway().call(action.method(), &path, body)
}

/// Check that a response is the record for `expected` and carries a revision.
fn expect_record(expected: &str, response: TransportResult<Value>) -> SyncResult<(Document, String)> {
    let record = match Document::try_from(response?) {
        Ok(document) => document,
        Err(_) => {
            return Err(SyncError::IdentityMismatch {
                expected: expected.to_string(),
                actual: String::new(),
            });
        }
    };

    let actual = record.id().unwrap_or_default();
    if actual != expected {
        return Err(SyncError::IdentityMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    let revision = record
        .revision()
        .ok_or_else(|| SyncError::MissingRevision(expected.to_string()))?;
    Ok((record, revision))
}

/// Extract the id and revision assigned by a create call.
fn expect_created(response: TransportResult<Value>) -> SyncResult<(String, String)> {
    let record = Document::try_from(response?).unwrap_or_default();
    let Some(id) = record.id() else {
        return Err(SyncError::IdentityMismatch {
            expected: "<new>".to_string(),
            actual: String::new(),
        });
    };
    let revision = record
        .revision()
        .ok_or_else(|| SyncError::MissingRevision(id.clone()))?;
    Ok((id, revision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::error::TransportError;
    use serde_json::json;

    #[test]
    fn test_expect_record_checks_identity() {
        let ok = expect_record("a", Ok(json!({"id": "a", "revision": "r1"}))).unwrap();
        assert_eq!(ok.1, "r1");

        let err = expect_record("a", Ok(json!({"id": "b", "revision": "r1"}))).unwrap_err();
        assert!(matches!(err, SyncError::IdentityMismatch { ref actual, .. } if actual == "b"));

        let err = expect_record("a", Ok(json!({"id": "a"}))).unwrap_err();
        assert!(matches!(err, SyncError::MissingRevision(_)));

        let err = expect_record("a", Ok(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, SyncError::IdentityMismatch { .. }));
    }

    #[test]
    fn test_expect_created() {
        let (id, revision) = expect_created(Ok(json!({"id": "n", "revision": "r0"}))).unwrap();
        assert_eq!((id.as_str(), revision.as_str()), ("n", "r0"));

        let err = expect_created(Err(TransportError::Network("down".into()))).unwrap_err();
        assert!(err.is_retryable());

        assert!(expect_created(Ok(json!({"revision": "r0"}))).is_err());
    }
}
