//! # In-Memory Survey Store
//!
//! A single-process stand-in for the document store. It behaves like a store
//! that assigns identifiers, enforces the unique idempotency index and stamps
//! timestamps, and it lets callers break it on purpose:
//!
//! - take the whole store offline (`set_reachable(false)`),
//! - drop every open connection (`simulate_disconnect`),
//! - fail the next inserts with a chosen error, either before or after the
//!   document lands (`fail_next_insert`, `fail_next_insert_after_apply`),
//! - make warm-up probes fail (`set_probe_failing`),
//! - make index builds hang (`set_index_builds_stalled`).
//!
//! Handles remember the connection generation they were opened in. Once the
//! generation moves on, every call on an old handle fails as `Unavailable`
//! and its `closed()` future resolves.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use super::store::{ConnectOptions, Durability, StoreConnector, StoreError, SurveyStore};
use crate::models::survey::{NewSurvey, SurveyRecord};

enum ScriptedFailure {
    Reject(StoreError),
    AfterApply(StoreError),
}

struct Shared {
    records: Mutex<Vec<SurveyRecord>>,
    scripted: Mutex<VecDeque<ScriptedFailure>>,
    durabilities: Mutex<Vec<Durability>>,
    reachable: AtomicBool,
    probe_failing: AtomicBool,
    index_builds_stalled: AtomicBool,
    generation: watch::Sender<u64>,
    next_id: AtomicU64,
    connects: AtomicUsize,
    inserts: AtomicUsize,
    probes: AtomicUsize,
    index_builds: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An in-memory document store that doubles as its own connector.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Vec::new()),
                scripted: Mutex::new(VecDeque::new()),
                durabilities: Mutex::new(Vec::new()),
                reachable: AtomicBool::new(true),
                probe_failing: AtomicBool::new(false),
                index_builds_stalled: AtomicBool::new(false),
                generation,
                next_id: AtomicU64::new(0),
                connects: AtomicUsize::new(0),
                inserts: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
                index_builds: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes the store offline or brings it back. Going offline also drops
    /// every open connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.simulate_disconnect();
        }
    }

    /// Drops every open connection without taking the store offline.
    pub fn simulate_disconnect(&self) {
        self.shared.generation.send_modify(|g| *g += 1);
    }

    /// Fails the next insert with `error` before anything is written.
    pub fn fail_next_insert(&self, error: StoreError) {
        lock(&self.shared.scripted).push_back(ScriptedFailure::Reject(error));
    }

    /// Writes the next insert but still reports `error`, like an acknowledgment
    /// lost on the way back.
    pub fn fail_next_insert_after_apply(&self, error: StoreError) {
        lock(&self.shared.scripted).push_back(ScriptedFailure::AfterApply(error));
    }

    /// Makes warm-up probes fail while `failing` is set.
    pub fn set_probe_failing(&self, failing: bool) {
        self.shared.probe_failing.store(failing, Ordering::SeqCst);
    }

    /// Makes index builds never complete while `stalled` is set.
    pub fn set_index_builds_stalled(&self, stalled: bool) {
        self.shared.index_builds_stalled.store(stalled, Ordering::SeqCst);
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn records(&self) -> Vec<SurveyRecord> {
        lock(&self.shared.records).clone()
    }

    /// Durability requirements received by inserts, in call order.
    pub fn durabilities(&self) -> Vec<Durability> {
        lock(&self.shared.durabilities).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.shared.inserts.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.shared.probes.load(Ordering::SeqCst)
    }

    pub fn index_build_count(&self) -> usize {
        self.shared.index_builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(
        &self,
        _target: &str,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn SurveyStore>, StoreError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        let generation = *self.shared.generation.borrow();
        Ok(Arc::new(MemoryHandle {
            shared: Arc::clone(&self.shared),
            generation,
        }))
    }
}

struct MemoryHandle {
    shared: Arc<Shared>,
    generation: u64,
}

impl MemoryHandle {
    fn check_live(&self) -> Result<(), StoreError> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("server selection timed out".to_string()));
        }
        if *self.shared.generation.borrow() != self.generation {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }

    fn apply(&self, draft: &NewSurvey) -> Result<SurveyRecord, StoreError> {
        let mut records = lock(&self.shared.records);
        if records
            .iter()
            .any(|r| r.idempotency_key == draft.idempotency_key)
        {
            return Err(StoreError::DuplicateKey(format!(
                "E11000 duplicate key error collection: surveys index: idempotencyKey_1 dup key: {{ idempotencyKey: \"{}\" }}",
                draft.idempotency_key
            )));
        }
        let id = format!("{:024x}", self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = SurveyRecord::from_draft(id, draft, Utc::now());
        records.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl SurveyStore for MemoryHandle {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_live()
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.check_live()?;
        self.shared.index_builds.fetch_add(1, Ordering::SeqCst);
        if self.shared.index_builds_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn insert_survey(
        &self,
        draft: &NewSurvey,
        durability: &Durability,
    ) -> Result<SurveyRecord, StoreError> {
        self.shared.inserts.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.durabilities).push(*durability);
        self.check_live()?;

        let scripted = lock(&self.shared.scripted).pop_front();
        match scripted {
            Some(ScriptedFailure::Reject(error)) => Err(error),
            Some(ScriptedFailure::AfterApply(error)) => {
                self.apply(draft)?;
                Err(error)
            }
            None => self.apply(draft),
        }
    }

    async fn find_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<SurveyRecord>, StoreError> {
        self.check_live()?;
        Ok(lock(&self.shared.records)
            .iter()
            .find(|r| r.idempotency_key == key)
            .cloned())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.shared.probes.fetch_add(1, Ordering::SeqCst);
        self.check_live()?;
        if self.shared.probe_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("probe query failed".to_string()));
        }
        Ok(())
    }

    async fn closed(&self) -> StoreError {
        let mut generation = self.shared.generation.subscribe();
        let _ = generation.wait_for(|g| *g != self.generation).await;
        StoreError::Unavailable("connection closed".to_string())
    }
}
