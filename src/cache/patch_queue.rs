//! Pending-patch queue with coalescing
//!
//! Holds the patches an entity has applied locally but the server has not
//! acknowledged yet, oldest first. Applying the queue in order to the last
//! synced document reproduces the current local document.
//!
//! A new patch is folded into the newest entry when their paths are
//! disjoint; a patch touching a path already present in the newest entry
//! starts a new entry, so writes to the same field reach the server in the
//! order they were made.

use std::collections::VecDeque;

use super::document::{FieldPath, Patch, PatchOp};

/// What [`PatchQueue::enqueue`] did with a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Patch was empty and dropped
    Empty,
    /// Patch was merged into the newest entry
    Coalesced,
    /// Patch became a new entry
    Appended,
}

/// FIFO of unacknowledged patches for one entity
#[derive(Debug, Clone, Default)]
pub struct PatchQueue {
    entries: VecDeque<Patch>,
    /// Number of front entries sealed into an in-flight push
    in_flight: usize,
}

impl PatchQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of front entries belonging to an in-flight push
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Iterate over entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.entries.iter()
    }

    /// Add a patch, coalescing it into the newest entry when possible.
    ///
    /// Entries sealed by [`begin_push`](Self::begin_push) never absorb new
    /// operations.
    pub fn enqueue(&mut self, patch: Patch) -> Enqueued {
        if patch.is_empty() {
            return Enqueued::Empty;
        }

        let sealed = self.in_flight;
        let len = self.entries.len();
        match self.entries.back_mut() {
            Some(last) if len > sealed && !last.overlaps(&patch) => {
                last.extend(patch);
                Enqueued::Coalesced
            }
            _ => {
                self.entries.push_back(patch);
                Enqueued::Appended
            }
        }
    }

    /// Oldest entry
    pub fn peek_front(&self) -> Option<&Patch> {
        self.entries.front()
    }

    /// Remove the oldest entry
    pub fn pop_front(&mut self) -> Option<Patch> {
        let patch = self.entries.pop_front()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(patch)
    }

    /// Put a patch back at the front, ahead of anything newer.
    ///
    /// Must not be called while a push is in flight.
    pub fn requeue_front(&mut self, patch: Patch) {
        debug_assert_eq!(self.in_flight, 0, "requeue during an in-flight push");
        if !patch.is_empty() {
            self.entries.push_front(patch);
        }
    }

    /// Fold every entry, oldest first, into one equivalent patch.
    pub fn consolidate(&self) -> Patch {
        fold(self.entries.iter())
    }

    /// Seal all current entries for a push and return their consolidation.
    ///
    /// Returns `None` when nothing is pending.
    pub fn begin_push(&mut self) -> Option<Patch> {
        if self.entries.is_empty() {
            return None;
        }
        self.in_flight = self.entries.len();
        Some(fold(self.entries.iter().take(self.in_flight)))
    }

    /// Pop the sealed entries after the server confirmed them.
    pub fn acknowledge(&mut self) -> Vec<Patch> {
        let sealed = self.in_flight.min(self.entries.len());
        self.in_flight = 0;
        self.entries.drain(..sealed).collect()
    }

    /// Unseal entries after a failed push; the queue is otherwise unchanged.
    pub fn abort_push(&mut self) {
        self.in_flight = 0;
    }

    /// Distinct paths referenced by pending patches, in first-seen order
    pub fn paths(&self) -> Vec<FieldPath> {
        let mut paths: Vec<FieldPath> = Vec::new();
        for path in self.entries.iter().flat_map(Patch::paths) {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }

    /// True if any pending operation overlaps `path`
    pub fn touches(&self, path: &FieldPath) -> bool {
        self.entries.iter().any(|patch| patch.touches(path))
    }

    /// Drop pending operations overlapping any of `paths`.
    ///
    /// Entries left empty are removed; relative order is kept. Returns the
    /// number of operations dropped.
    pub fn discard_paths(&mut self, paths: &[FieldPath]) -> usize {
        let mut dropped = 0;
        let mut kept = VecDeque::with_capacity(self.entries.len());
        let mut sealed_kept = 0;

        for (index, patch) in self.entries.drain(..).enumerate() {
            let before = patch.len();
            let ops: Vec<PatchOp> = patch
                .into_ops()
                .into_iter()
                .filter(|op| !paths.iter().any(|path| path.overlaps(op.path())))
                .collect();
            dropped += before - ops.len();
            if !ops.is_empty() {
                if index < self.in_flight {
                    sealed_kept += 1;
                }
                kept.push_back(Patch::from_ops(ops));
            }
        }

        self.entries = kept;
        self.in_flight = sealed_kept;
        dropped
    }
}

/// Fold patches into one, combining successive operations on an identical
/// path when nothing overlapping sits between them.
fn fold<'a>(patches: impl Iterator<Item = &'a Patch>) -> Patch {
    let mut ops: Vec<PatchOp> = Vec::new();

    for op in patches.flat_map(Patch::ops) {
        let mut combined = None;
        for index in (0..ops.len()).rev() {
            if !ops[index].path().overlaps(op.path()) {
                continue;
            }
            if ops[index].path() == op.path() {
                combined = combine(&ops[index], op).map(|merged| (index, merged));
            }
            break;
        }

        match combined {
            Some((index, merged)) => ops[index] = merged,
            None => ops.push(op.clone()),
        }
    }

    Patch::from_ops(ops)
}

/// Single operation equivalent to `earlier` followed by `later` on the
/// same path, when one exists.
fn combine(earlier: &PatchOp, later: &PatchOp) -> Option<PatchOp> {
    let path = later.path().clone();
    match (earlier, later) {
        (PatchOp::Add { .. }, PatchOp::Add { value, .. } | PatchOp::Replace { value, .. }) => {
            Some(PatchOp::Add {
                path,
                value: value.clone(),
            })
        }
        (PatchOp::Replace { .. }, PatchOp::Add { value, .. } | PatchOp::Replace { value, .. }) => {
            Some(PatchOp::Replace {
                path,
                value: value.clone(),
            })
        }
        (PatchOp::Replace { .. }, PatchOp::Remove { .. }) => Some(PatchOp::Remove { path }),
        (PatchOp::Remove { .. }, PatchOp::Add { value, .. }) => Some(PatchOp::Replace {
            path,
            value: value.clone(),
        }),
        _ => None,
    }
}
