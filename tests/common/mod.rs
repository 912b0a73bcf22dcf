//! In-memory Passwords server for integration tests

#![allow(dead_code)]

use ncpass::cache::error::{TransportError, TransportResult};
use ncpass::cache::{CacheConfig, Document, Method, RemoteGateway, SyncContext};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

/// Generous bound for anything that should finish quickly
pub const PATIENCE: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Install a log subscriber once per test binary (`RUST_LOG=ncpass=debug`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `check` until it holds or [`PATIENCE`] runs out.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while !check() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

/// Fake server keeping records in memory and counting calls per action
#[derive(Default)]
pub struct FakeServer {
    records: Mutex<BTreeMap<String, Map<String, Value>>>,
    calls: Mutex<HashMap<String, usize>>,
    bodies: Mutex<Vec<(String, Value)>>,
    next: AtomicU64,
    offline: AtomicBool,
    reject_updates: AtomicBool,
    latency_ms: AtomicU64,
    create_ack_delay_ms: AtomicU64,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a record directly, returning its id
    pub fn seed(&self, fields: Value) -> String {
        let id = format!("pw-{}", self.next.fetch_add(1, Ordering::SeqCst));
        let mut record = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        record.insert("id".into(), json!(id));
        record.insert("revision".into(), json!(self.fresh_revision()));
        self.records.lock().insert(id.clone(), record);
        id
    }

    /// Edit a record as another client would, bumping its revision
    pub fn remote_edit(&self, id: &str, field: &str, value: Value) -> String {
        let revision = self.fresh_revision();
        let mut records = self.records.lock();
        let record = records.get_mut(id).expect("record exists");
        record.insert(field.into(), value);
        record.insert("revision".into(), json!(revision));
        revision
    }

    pub fn record(&self, id: &str) -> Option<Value> {
        self.records.lock().get(id).cloned().map(Value::Object)
    }

    pub fn field(&self, id: &str, field: &str) -> Option<Value> {
        self.records.lock().get(id).and_then(|r| r.get(field).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn calls(&self, action: &str) -> usize {
        self.calls.lock().get(action).copied().unwrap_or(0)
    }

    /// Bodies sent to `action`, oldest first
    pub fn bodies(&self, action: &str) -> Vec<Value> {
        self.bodies
            .lock()
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Hold back create responses after the record is already stored
    pub fn set_create_ack_delay(&self, delay: Duration) {
        self.create_ack_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn fresh_revision(&self) -> String {
        format!("rev-{}", uuid::Uuid::new_v4().simple())
    }

    fn not_found(id: &str) -> TransportError {
        TransportError::Rejected {
            status: 404,
            message: format!("no record '{id}'"),
        }
    }
}

impl RemoteGateway for FakeServer {
    fn call(&self, _method: Method, action: &str, body: &Document) -> TransportResult<Value> {
        *self.calls.lock().entry(action.to_string()).or_default() += 1;
        self.bodies
            .lock()
            .push((action.to_string(), body.clone().into_value()));

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            thread::sleep(Duration::from_millis(latency));
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".into()));
        }

        let id = body.id().unwrap_or_default();
        match action {
            "password/create" => {
                let id = self.seed(body.clone().into_value());
                let revision = {
                    let mut records = self.records.lock();
                    let record = records.get_mut(&id).expect("just seeded");
                    // Server-side defaults the client never sent
                    record.entry("favorite").or_insert(json!(false));
                    record.entry("status").or_insert(json!(0));
                    record["revision"].clone()
                };
                let delay = self.create_ack_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    thread::sleep(Duration::from_millis(delay));
                }
                Ok(json!({"id": id, "revision": revision}))
            }
            "password/show" => self
                .record(&id)
                .ok_or_else(|| Self::not_found(&id)),
            "password/update" => {
                if self.reject_updates.load(Ordering::SeqCst) {
                    return Err(TransportError::Rejected {
                        status: 503,
                        message: "maintenance".into(),
                    });
                }
                let revision = self.fresh_revision();
                let mut records = self.records.lock();
                let record = records.get_mut(&id).ok_or_else(|| Self::not_found(&id))?;
                // Updates must be based on the current revision
                if let Some(base) = body.revision() {
                    if record.get("revision") != Some(&json!(base)) {
                        return Err(TransportError::Rejected {
                            status: 409,
                            message: format!("stale revision '{base}'"),
                        });
                    }
                }
                for (field, value) in body.iter() {
                    if field != "id" && field != "revision" {
                        record.insert(field.clone(), value.clone());
                    }
                }
                record.insert("revision".into(), json!(revision));
                Ok(json!({"id": id, "revision": revision}))
            }
            "password/delete" => {
                let removed = self.records.lock().remove(&id);
                match removed {
                    Some(record) => Ok(json!({"id": id, "revision": record["revision"]})),
                    None => Err(Self::not_found(&id)),
                }
            }
            "password/list" => Ok(Value::Array(
                self.records
                    .lock()
                    .values()
                    .cloned()
                    .map(Value::Object)
                    .collect(),
            )),
            other => Err(TransportError::Rejected {
                status: 404,
                message: format!("unknown action '{other}'"),
            }),
        }
    }
}

/// Context with its own registry, talking to `server`
pub fn context(server: &Arc<FakeServer>, pull_debounce_ms: u64) -> Arc<SyncContext> {
    init_tracing();
    let config = CacheConfig {
        pull_debounce_ms,
        ..CacheConfig::default()
    };
    SyncContext::isolated(server.clone(), config)
}
