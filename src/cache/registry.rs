//! Instance registry
//!
//! Guarantees at most one live object per remote identity. Entries move
//! through three states:
//!
//! - *creating*: identity not confirmed yet (awaiting a server-assigned id)
//! - *active*: confirmed and reachable by id
//! - *deleting*: removed from active lookup but weakly tracked, so in-flight
//!   work still resolves to the same object instead of a duplicate
//!
//! One `RwLock` guards all three collections. It is never held while an
//! entity lock is held, nor across a remote call; identities are read
//! without taking entity locks.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of a cached record: API kind plus server id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// API path segment of the record type (e.g. `password`)
    pub kind: String,
    /// Server-assigned identifier
    pub id: String,
}

impl EntityKey {
    /// Create a key
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Objects the registry can track.
pub trait Tracked: Send + Sync {
    /// Identity once known. Must not block on the object's own locks.
    fn identity(&self) -> Option<EntityKey>;
}

/// Registry state of a tracked object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Waiting for a server-assigned identity
    Creating,
    /// Reachable by id
    Active,
    /// Unregistered, still alive somewhere
    Deleting,
}

/// Entry counts per lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    /// Entries awaiting identity
    pub creating: usize,
    /// Entries reachable by id
    pub active: usize,
    /// Unregistered entries still alive
    pub deleting: usize,
}

struct Slots<T> {
    creating: Vec<Arc<T>>,
    active: HashMap<EntityKey, Arc<T>>,
    deleting: Vec<Weak<T>>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            creating: Vec::new(),
            active: HashMap::new(),
            deleting: Vec::new(),
        }
    }
}

/// Identity-keyed registry of live objects
pub struct InstanceRegistry<T> {
    slots: RwLock<Slots<T>>,
}

impl<T> Default for InstanceRegistry<T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
        }
    }
}

impl<T: Tracked> InstanceRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object, returning the canonical instance for its identity.
    ///
    /// If an object with the same identity is already tracked (creating,
    /// active, or deleting but still alive) that object is returned and
    /// `entity` should be dropped by the caller. Objects without an identity
    /// are parked in *creating*.
    pub fn register(&self, entity: Arc<T>) -> Arc<T> {
        let Some(key) = entity.identity() else {
            self.mark_creating(entity.clone());
            return entity;
        };

        let slots = self.slots.upgradable_read();
        if let Some(existing) = find_live(&slots, &key) {
            return existing;
        }

        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        if let Some(existing) = find_deleting(&mut slots, &key) {
            return existing;
        }

        tracing::debug!(key = %key, "registering instance");
        slots.active.insert(key, entity.clone());
        entity
    }

    /// Park an object whose identity is not known yet.
    pub fn mark_creating(&self, entity: Arc<T>) {
        let mut slots = self.slots.write();
        if !slots.creating.iter().any(|e| Arc::ptr_eq(e, &entity)) {
            slots.creating.push(entity);
        }
    }

    /// Move an object from *creating* to *active* once its identity exists.
    ///
    /// The promoted object wins over any other object registered under the
    /// same identity in the meantime (typically a placeholder resolved by id
    /// while the create call was in flight). The displaced object moves to
    /// *deleting* and is returned. An object still lacking an identity stays
    /// in *creating*.
    pub fn promote_to_active(&self, entity: &Arc<T>) -> Option<Arc<T>> {
        let Some(key) = entity.identity() else {
            tracing::warn!("promote requested for an instance without identity");
            return None;
        };

        let mut slots = self.slots.write();
        slots.creating.retain(|e| !Arc::ptr_eq(e, entity));

        tracing::debug!(key = %key, "promoting instance to active");
        let displaced = slots
            .active
            .insert(key.clone(), entity.clone())
            .filter(|existing| !Arc::ptr_eq(existing, entity))?;

        tracing::debug!(key = %key, "promoted instance displaced an active one");
        slots.deleting.push(Arc::downgrade(&displaced));
        Some(displaced)
    }

    /// Move an object from *active* or *creating* to *deleting*.
    ///
    /// Returns false if the object was in neither.
    pub fn unregister(&self, entity: &Arc<T>) -> bool {
        let mut slots = self.slots.write();

        let removed = match entity.identity() {
            Some(key)
                if slots
                    .active
                    .get(&key)
                    .is_some_and(|e| Arc::ptr_eq(e, entity)) =>
            {
                slots.active.remove(&key)
            }
            _ => {
                let position = slots.creating.iter().position(|e| Arc::ptr_eq(e, entity));
                position.map(|index| slots.creating.remove(index))
            }
        };

        match removed {
            Some(entity) => {
                slots.deleting.push(Arc::downgrade(&entity));
                true
            }
            None => false,
        }
    }

    /// Find the object for an identity: creating, then active, then deleting.
    ///
    /// Expired deleting entries are pruned along the way.
    pub fn lookup(&self, key: &EntityKey) -> Option<Arc<T>> {
        let slots = self.slots.upgradable_read();
        if let Some(found) = find_live(&slots, key) {
            return Some(found);
        }
        if slots.deleting.is_empty() {
            return None;
        }

        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        find_deleting(&mut slots, key)
    }

    /// State an object is tracked in, if any
    pub fn lifecycle(&self, entity: &Arc<T>) -> Option<Lifecycle> {
        let slots = self.slots.read();
        if slots.creating.iter().any(|e| Arc::ptr_eq(e, entity)) {
            return Some(Lifecycle::Creating);
        }
        if slots.active.values().any(|e| Arc::ptr_eq(e, entity)) {
            return Some(Lifecycle::Active);
        }
        let target = Arc::as_ptr(entity);
        if slots.deleting.iter().any(|w| w.as_ptr() == target) {
            return Some(Lifecycle::Deleting);
        }
        None
    }

    /// All active objects, ordered by identity
    pub fn active(&self) -> Vec<Arc<T>> {
        let slots = self.slots.read();
        let mut entries: Vec<(&EntityKey, &Arc<T>)> = slots.active.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// Drop every tracked object, returning how many were released.
    ///
    /// Objects stay usable through outstanding handles but are no longer
    /// deduplicated.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.write();
        let released = slots.creating.len() + slots.active.len();
        *slots = Slots::default();
        tracing::debug!(released, "registry cleared");
        released
    }

    /// Entry counts; expired deleting entries are not counted
    pub fn counts(&self) -> RegistryCounts {
        let slots = self.slots.read();
        RegistryCounts {
            creating: slots.creating.len(),
            active: slots.active.len(),
            deleting: slots.deleting.iter().filter(|w| w.strong_count() > 0).count(),
        }
    }
}

fn find_live<T: Tracked>(slots: &Slots<T>, key: &EntityKey) -> Option<Arc<T>> {
    slots
        .creating
        .iter()
        .find(|e| e.identity().as_ref() == Some(key))
        .or_else(|| slots.active.get(key))
        .cloned()
}

fn find_deleting<T: Tracked>(slots: &mut Slots<T>, key: &EntityKey) -> Option<Arc<T>> {
    let mut found = None;
    slots.deleting.retain(|weak| match weak.upgrade() {
        None => false,
        Some(entity) => {
            if found.is_none() && entity.identity().as_ref() == Some(key) {
                found = Some(entity);
            }
            true
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::thread;

    struct Record {
        id: OnceLock<String>,
    }

    impl Record {
        fn with_id(id: &str) -> Arc<Self> {
            let record = Record { id: OnceLock::new() };
            let _ = record.id.set(id.to_string());
            Arc::new(record)
        }

        fn pending() -> Arc<Self> {
            Arc::new(Record { id: OnceLock::new() })
        }
    }

    impl Tracked for Record {
        fn identity(&self) -> Option<EntityKey> {
            self.id.get().map(|id| EntityKey::new("record", id))
        }
    }

    #[test]
    fn test_register_dedups_by_identity() {
        let registry = InstanceRegistry::new();
        let first = registry.register(Record::with_id("a"));
        let second = registry.register(Record::with_id("a"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.counts().active, 1);
    }

    #[test]
    fn test_concurrent_register_yields_one_instance() {
        let registry = Arc::new(InstanceRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.register(Record::with_id("same")))
            })
            .collect();

        let results: Vec<Arc<Record>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
        assert_eq!(registry.counts().active, 1);
    }

    #[test]
    fn test_creating_then_promote() {
        let registry = InstanceRegistry::new();
        let record = Record::pending();
        registry.mark_creating(record.clone());
        assert_eq!(registry.lifecycle(&record), Some(Lifecycle::Creating));

        record.id.set("new".to_string()).unwrap();
        let key = EntityKey::new("record", "new");
        // Found through the creating list before promotion
        assert!(Arc::ptr_eq(&registry.lookup(&key).unwrap(), &record));

        assert!(registry.promote_to_active(&record).is_none());
        assert_eq!(registry.lifecycle(&record), Some(Lifecycle::Active));
        assert_eq!(registry.counts().creating, 0);
    }

    #[test]
    fn test_promote_displaces_instance_registered_meanwhile() {
        let registry = InstanceRegistry::new();
        let created = Record::pending();
        registry.mark_creating(created.clone());

        // Resolved by id before the creator learned its identity
        let placeholder = registry.register(Record::with_id("new"));
        created.id.set("new".to_string()).unwrap();

        let displaced = registry.promote_to_active(&created).unwrap();
        assert!(Arc::ptr_eq(&displaced, &placeholder));
        assert_eq!(registry.lifecycle(&created), Some(Lifecycle::Active));
        assert_eq!(registry.lifecycle(&placeholder), Some(Lifecycle::Deleting));

        let key = EntityKey::new("record", "new");
        assert!(Arc::ptr_eq(&registry.lookup(&key).unwrap(), &created));
        assert!(Arc::ptr_eq(&registry.register(Record::with_id("new")), &created));
        assert_eq!(registry.counts().active, 1);
    }

    #[test]
    fn test_unregister_moves_to_deleting() {
        let registry = InstanceRegistry::new();
        let record = registry.register(Record::with_id("a"));

        assert!(registry.unregister(&record));
        assert!(!registry.unregister(&record));
        assert_eq!(registry.lifecycle(&record), Some(Lifecycle::Deleting));

        // Still resolves to the same object while alive
        let again = registry.register(Record::with_id("a"));
        assert!(Arc::ptr_eq(&again, &record));
        assert_eq!(registry.counts().active, 0);
    }

    #[test]
    fn test_deleting_entries_pruned_after_drop() {
        let registry = InstanceRegistry::new();
        let record = registry.register(Record::with_id("a"));
        registry.unregister(&record);
        drop(record);

        assert_eq!(registry.counts().deleting, 0);
        let key = EntityKey::new("record", "a");
        assert!(registry.lookup(&key).is_none());

        let fresh = registry.register(Record::with_id("a"));
        assert_eq!(registry.lifecycle(&fresh), Some(Lifecycle::Active));
    }

    #[test]
    fn test_clear_releases_entries() {
        let registry = InstanceRegistry::new();
        let record = registry.register(Record::with_id("a"));
        registry.mark_creating(Record::pending());
        let weak = Arc::downgrade(&record);
        drop(record);

        assert!(weak.upgrade().is_some());
        assert_eq!(registry.clear(), 2);
        assert!(weak.upgrade().is_none());
        assert_eq!(registry.counts(), RegistryCounts::default());
    }

    #[test]
    fn test_active_sorted() {
        let registry = InstanceRegistry::new();
        registry.register(Record::with_id("b"));
        registry.register(Record::with_id("a"));

        let ids: Vec<String> = registry
            .active()
            .iter()
            .map(|r| r.identity().unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
