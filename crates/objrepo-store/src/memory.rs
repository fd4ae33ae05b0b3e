//! In-memory storage backend
//!
//! Reference implementation of [`Storage`]. Committed records live in
//! per-kind maps; changes seen on the repository's change stream are
//! buffered as pending inserts, updates and deletes until the next flush.
//!
//! ## Flush
//!
//! Changes are folded as they arrive: a delete drops any pending update of
//! the same record, an insert followed by a delete cancels out, and a delete
//! followed by a re-add becomes an update with the new record.
//!
//! 1. Write inserts, then updates, then deletes, in batches
//! 2. Re-queue every rejected write and report each failing batch on the
//!    error channel
//!
//! A flush requested while another runs returns at once. Clones share state,
//! so a clone handed to a fresh repository sees everything committed so far.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use objrepo_core::core_types::schema::OP_FLUSH;
use objrepo_core::errors::ExError;
use objrepo_core::event::{ChangeEvent, ChangeKind, ChangeStream, EventChannel};
use objrepo_core::storage::{Storage, StorageResult};
use objrepo_core::{log_op_end, log_op_start, ConcurrentList};

use crate::errors;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStorageOptions {
    /// Writes per batch
    pub batch_size: usize,
    /// Flush on this cadence once tracking starts, unless read-only
    pub auto_flush_interval_ms: Option<u64>,
}

impl Default for MemoryStorageOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            auto_flush_interval_ms: None,
        }
    }
}

/// Identity of one backend record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub kind: String,
    pub id: Uuid,
}

impl RecordKey {
    pub fn new(kind: impl Into<String>, id: Uuid) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl WriteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        }
    }
}

/// Hook consulted before each write; an `Err` rejects that write
pub type WriteCheck = Arc<dyn Fn(&RecordKey, WriteOp) -> Result<(), String> + Send + Sync>;

struct Shared {
    options: MemoryStorageOptions,
    committed: DashMap<String, DashMap<Uuid, serde_json::Value>>,
    inserts: ConcurrentList<RecordKey>,
    updates: ConcurrentList<RecordKey>,
    deletes: ConcurrentList<RecordKey>,
    snapshots: DashMap<RecordKey, serde_json::Value>,
    flushing: AtomicBool,
    errors: EventChannel<ExError>,
    write_check: RwLock<Option<WriteCheck>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    fn pending_len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    fn buffer(&self, event: &ChangeEvent) {
        let key = RecordKey::new(event.record_kind(), event.source_id());
        self.queue(key, event.kind(), event.record());
    }

    /// Fold one change into the pending sets
    ///
    /// A removal cancels a pending insert of the same record outright. An
    /// add of a record whose delete is still pending turns into an update
    /// carrying the new snapshot.
    fn queue(&self, key: RecordKey, kind: ChangeKind, record: &serde_json::Value) {
        match kind {
            ChangeKind::Added => {
                self.snapshots.insert(key.clone(), record.clone());
                if self.deletes.remove(&key) {
                    self.updates.add(key);
                } else {
                    self.inserts.add(key);
                }
            }
            ChangeKind::PropertyChanged => {
                self.snapshots.insert(key.clone(), record.clone());
                self.updates.add(key);
            }
            ChangeKind::Removed => {
                self.updates.remove(&key);
                if self.inserts.remove(&key) {
                    self.snapshots.remove(&key);
                } else {
                    self.deletes.add(key);
                }
            }
        }
    }

    fn flush(&self) {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            tracing::debug!(op = OP_FLUSH, "Flush already running; request coalesced");
            return;
        };
        let start = Instant::now();
        log_op_start!(OP_FLUSH, pending_count = self.pending_len());

        let failed = self.drain(&self.inserts, WriteOp::Insert)
            + self.drain(&self.updates, WriteOp::Update)
            + self.drain(&self.deletes, WriteOp::Delete);

        log_op_end!(
            OP_FLUSH,
            duration_ms = start.elapsed().as_millis() as u64,
            failed_count = failed,
            pending_count = self.pending_len()
        );
    }

    fn drain(&self, pending: &ConcurrentList<RecordKey>, op: WriteOp) -> usize {
        let batch_size = self.options.batch_size.max(1);
        let mut requeue = Vec::new();
        loop {
            let batch = pending.take_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            let rejected: Vec<(RecordKey, String)> = batch
                .into_iter()
                .filter_map(|key| self.write(&key, op).err().map(|reason| (key, reason)))
                .collect();
            if !rejected.is_empty() {
                let err = errors::partial_batch(op, &rejected, batch_len);
                tracing::warn!(
                    op = OP_FLUSH,
                    write = op.as_str(),
                    failed_count = rejected.len(),
                    error = %err,
                    "Batch partially failed"
                );
                self.errors.emit(&err);
                requeue.extend(rejected.into_iter().map(|(key, _)| key));
            }
        }
        let failed = requeue.len();
        for key in requeue {
            pending.add(key);
        }
        failed
    }

    fn write(&self, key: &RecordKey, op: WriteOp) -> Result<(), String> {
        let check = self.write_check.read().clone();
        if let Some(check) = check {
            check(key, op)?;
        }
        match op {
            WriteOp::Insert | WriteOp::Update => {
                let snapshot = self
                    .snapshots
                    .get(key)
                    .map(|s| s.value().clone())
                    .ok_or_else(|| "no buffered snapshot".to_string())?;
                if snapshot.is_null() {
                    return Err("record snapshot is null".to_string());
                }
                self.committed
                    .entry(key.kind.clone())
                    .or_default()
                    .insert(key.id, snapshot);
            }
            WriteOp::Delete => {
                if let Some(records) = self.committed.get(&key.kind) {
                    records.remove(&key.id);
                }
                if !self.inserts.contains(key) && !self.updates.contains(key) {
                    self.snapshots.remove(key);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Storage backend holding everything in process memory
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl MemoryStorage {
    pub fn new(options: MemoryStorageOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                committed: DashMap::new(),
                inserts: ConcurrentList::new(),
                updates: ConcurrentList::new(),
                deletes: ConcurrentList::new(),
                snapshots: DashMap::new(),
                flushing: AtomicBool::new(false),
                errors: EventChannel::new(),
                write_check: RwLock::new(None),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &MemoryStorageOptions {
        &self.shared.options
    }

    /// Commit records directly, bypassing the change stream
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a record without a UUID `id` field.
    pub fn seed(
        &self,
        kind: &str,
        records: impl IntoIterator<Item = serde_json::Value>,
    ) -> errors::Result<usize> {
        let table = self.shared.committed.entry(kind.to_string()).or_default();
        let mut count = 0;
        for record in records {
            let id = record
                .get("id")
                .and_then(|id| id.as_str())
                .and_then(|id| Uuid::parse_str(id).ok())
                .ok_or_else(|| errors::invalid_seed(kind, "record has no UUID id field"))?;
            table.insert(id, record);
            count += 1;
        }
        Ok(count)
    }

    /// Committed records of `kind`
    pub fn committed(&self, kind: &str) -> Vec<serde_json::Value> {
        self.shared
            .committed
            .get(kind)
            .map(|records| records.iter().map(|r| r.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn committed_record(&self, kind: &str, id: Uuid) -> Option<serde_json::Value> {
        let records = self.shared.committed.get(kind)?;
        let record = records.get(&id).map(|r| r.value().clone());
        record
    }

    /// Buffered writes not yet flushed
    pub fn pending_len(&self) -> usize {
        self.shared.pending_len()
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.flushing.load(Ordering::Acquire)
    }

    pub fn set_write_check<F>(&self, check: F)
    where
        F: Fn(&RecordKey, WriteOp) -> Result<(), String> + Send + Sync + 'static,
    {
        *self.shared.write_check.write() = Some(Arc::new(check));
    }

    pub fn clear_write_check(&self) {
        *self.shared.write_check.write() = None;
    }

    fn start_auto_flush(&self, every: Duration) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No tokio runtime; automatic flush disabled");
                return;
            }
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let timer = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(shared) => shared.flush(),
                    None => break,
                }
            }
        });
        if let Some(previous) = self.shared.timer.lock().replace(timer) {
            previous.abort();
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryStorageOptions::default())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch_all(&self, kind: &str) -> StorageResult<Vec<serde_json::Value>> {
        Ok(self.committed(kind))
    }

    fn track(&self, stream: &ChangeStream, read_only: bool) {
        let weak = Arc::downgrade(&self.shared);
        stream.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.buffer(event);
            }
        });

        if read_only {
            tracing::debug!("Read-only backend; automatic flush disabled");
            return;
        }
        if let Some(ms) = self.shared.options.auto_flush_interval_ms {
            self.start_auto_flush(Duration::from_millis(ms));
        }
    }

    async fn flush(&self) -> StorageResult<()> {
        self.shared.flush();
        Ok(())
    }

    fn errors(&self) -> &EventChannel<ExError> {
        &self.shared.errors
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("kinds", &self.shared.committed.len())
            .field("pending", &self.pending_len())
            .field("options", &self.shared.options)
            .finish()
    }
}
