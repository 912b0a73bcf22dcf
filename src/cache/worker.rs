//! Background workers and change signalling
//!
//! Each entity owns one [`TaskSlot`] per task kind. A slot guarantees at most
//! one worker thread per (entity, kind); requests arriving while a worker runs
//! are folded into a single rerun. [`Signal`] wakes threads blocked on entity
//! state.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN: u8 = 2;

/// Kind of background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Fetch the remote copy and reconcile
    Pull,
    /// Send queued patches (or the initial create)
    Push,
}

impl TaskKind {
    fn thread_name(&self) -> &'static str {
        match self {
            TaskKind::Pull => "ncpass-pull",
            TaskKind::Push => "ncpass-push",
        }
    }
}

/// Single-flight guard for one background task
#[derive(Debug, Default)]
pub struct TaskSlot {
    state: AtomicU8,
}

impl TaskSlot {
    /// Create an idle slot
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Record a request. Returns true if the caller must start a worker.
    pub fn request(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => RUNNING,
                RUNNING => RERUN,
                _ => return false,
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    /// Called by the worker after each run. Returns true if it must run again.
    pub fn finish(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(_) => {
                self.state.store(RUNNING, Ordering::Release);
                true
            }
        }
    }

    /// Whether a worker is running or scheduled
    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    fn reset(&self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

/// Run `run` on a background thread unless a worker for `kind` is already
/// active on `owner`, in which case one more run is requested.
pub fn schedule<O, S, R>(owner: &Arc<O>, kind: TaskKind, slot: S, run: R)
where
    O: Send + Sync + 'static,
    S: Fn(&O) -> &TaskSlot + Copy + Send + 'static,
    R: Fn(&Arc<O>) + Send + 'static,
{
    if !slot(owner).request() {
        return;
    }

    let worker = Arc::clone(owner);
    let spawned = thread::Builder::new()
        .name(kind.thread_name().to_string())
        .spawn(move || {
            loop {
                run(&worker);
                if !slot(&worker).finish() {
                    break;
                }
            }
        });

    if let Err(err) = spawned {
        tracing::error!(?kind, error = %err, "failed to spawn worker thread");
        slot(owner).reset();
    }
}

/// Wakes threads waiting for a state change.
///
/// Waiters evaluate their predicate while holding the signal mutex; writers
/// release the state lock before calling [`Signal::notify`]. A change can
/// therefore never slip between a failed predicate check and the wait.
#[derive(Debug, Default)]
pub struct Signal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Signal {
    /// Create a signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Block until `ready` returns true, or until `timeout` elapses.
    ///
    /// Returns the final value of `ready`.
    pub fn wait_until<F>(&self, mut ready: F, timeout: Option<Duration>) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut generation = self.generation.lock();
        loop {
            if ready() {
                return true;
            }
            match deadline {
                None => self.condvar.wait(&mut generation),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut generation, deadline).timed_out() {
                        return ready();
                    }
                }
            }
        }
    }
}
