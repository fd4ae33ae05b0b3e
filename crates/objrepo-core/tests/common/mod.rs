#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use objrepo_core::errors::{ExError, ExErrorKind};
use objrepo_core::{
    ChangeKind, ChangeStream, Entity, EventChannel, ForeignKey, Model, ModelBase, ObjectRepository,
    Property, Reference, Relation, RepositoryOptions, Result, Storage, StorageResult, Value,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

// ---------- Widget: a flat type with an indexable property ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetRecord {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub quantity: i64,
}

impl Entity for WidgetRecord {
    const KIND: &'static str = "widgets";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Widget {
    base: ModelBase<WidgetRecord>,
}

impl Widget {
    pub const SKU: Property<Widget> = Property::new("sku", |w: &Widget| Value::from(w.sku()));

    pub fn new(name: &str, sku: &str) -> Self {
        Self::from_record(WidgetRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            sku: sku.to_string(),
            quantity: 0,
        })
    }

    pub fn from_record(record: WidgetRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn name(&self) -> String {
        self.base.read(|r| r.name.clone())
    }

    pub fn set_name(&self, name: &str) -> Result<bool> {
        self.base.update("name", |r| &mut r.name, name.to_string())
    }

    pub fn sku(&self) -> String {
        self.base.read(|r| r.sku.clone())
    }

    pub fn set_sku(&self, sku: &str) -> Result<bool> {
        self.base.update("sku", |r| &mut r.sku, sku.to_string())
    }

    pub fn quantity(&self) -> i64 {
        self.base.read(|r| r.quantity)
    }

    pub fn set_quantity(&self, quantity: i64) -> Result<bool> {
        self.base.update("quantity", |r| &mut r.quantity, quantity)
    }
}

impl Model for Widget {
    type Record = WidgetRecord;
    fn base(&self) -> &ModelBase<WidgetRecord> {
        &self.base
    }
}

// ---------- Folder / Document / Note: a small object graph ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: Uuid,
    pub title: String,
}

impl Entity for FolderRecord {
    const KIND: &'static str = "folders";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Folder {
    base: ModelBase<FolderRecord>,
}

impl Folder {
    pub fn new(title: &str) -> Self {
        Self::from_record(FolderRecord {
            id: Uuid::now_v7(),
            title: title.to_string(),
        })
    }

    pub fn from_record(record: FolderRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn title(&self) -> String {
        self.base.read(|r| r.title.clone())
    }

    pub fn documents(&self) -> Result<Vec<Arc<Document>>> {
        self.multiple(&Document::FOLDER)
    }

    pub fn notes(&self) -> Result<Vec<Arc<Note>>> {
        self.multiple(&Note::FOLDER)
    }
}

impl Model for Folder {
    type Record = FolderRecord;
    fn base(&self) -> &ModelBase<FolderRecord> {
        &self.base
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::new("documents", |f: &Folder| {
            f.documents().map(|_| ())
        })]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub title: String,
}

impl Entity for DocumentRecord {
    const KIND: &'static str = "documents";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Document {
    base: ModelBase<DocumentRecord>,
}

impl Document {
    pub const FOLDER: ForeignKey<Document, Folder> =
        ForeignKey::new("folder_id", |d: &Document| Some(d.folder_id()));
    pub const TITLE: Property<Document> =
        Property::new("title", |d: &Document| Value::from(d.title()));

    pub fn new(folder: &Folder, title: &str) -> Self {
        Self::from_record(DocumentRecord {
            id: Uuid::now_v7(),
            folder_id: folder.id(),
            title: title.to_string(),
        })
    }

    pub fn from_record(record: DocumentRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn title(&self) -> String {
        self.base.read(|r| r.title.clone())
    }

    pub fn set_title(&self, title: &str) -> Result<bool> {
        self.base.update("title", |r| &mut r.title, title.to_string())
    }

    pub fn folder_id(&self) -> Uuid {
        self.base.read(|r| r.folder_id)
    }

    pub fn set_folder_id(&self, folder_id: Uuid) -> Result<bool> {
        self.base.update("folder_id", |r| &mut r.folder_id, folder_id)
    }

    pub fn folder(&self) -> Result<Option<Arc<Folder>>> {
        self.single(Some(self.folder_id()), "folder")
    }
}

impl Model for Document {
    type Record = DocumentRecord;
    fn base(&self) -> &ModelBase<DocumentRecord> {
        &self.base
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::new("folder", |d: &Document| d.folder().map(|_| ()))]
    }

    fn foreign_keys() -> Vec<Reference<Self>> {
        vec![Document::FOLDER.reference()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub body: String,
}

impl Entity for NoteRecord {
    const KIND: &'static str = "notes";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Note {
    base: ModelBase<NoteRecord>,
}

impl Note {
    pub const FOLDER: ForeignKey<Note, Folder> = ForeignKey::nullable(
        "folder_id",
        |n: &Note| n.folder_id(),
        |n: &Note| n.set_folder_id(None),
    );

    pub fn new(folder: Option<&Folder>, body: &str) -> Self {
        Self::from_record(NoteRecord {
            id: Uuid::now_v7(),
            folder_id: folder.map(|f| f.id()),
            body: body.to_string(),
        })
    }

    pub fn from_record(record: NoteRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn folder_id(&self) -> Option<Uuid> {
        self.base.read(|r| r.folder_id)
    }

    pub fn set_folder_id(&self, folder_id: Option<Uuid>) -> Result<bool> {
        self.base.update("folder_id", |r| &mut r.folder_id, folder_id)
    }

    pub fn folder(&self) -> Result<Option<Arc<Folder>>> {
        self.single(self.folder_id(), "folder")
    }
}

impl Model for Note {
    type Record = NoteRecord;
    fn base(&self) -> &ModelBase<NoteRecord> {
        &self.base
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::new("folder", |n: &Note| n.folder().map(|_| ()))]
    }

    fn foreign_keys() -> Vec<Reference<Self>> {
        vec![Note::FOLDER.reference()]
    }
}

// ---------- In-test storage backend ----------

/// Scriptable backend: seeded records, held or failing loads, failing
/// flushes, and a log of every change it was sent
pub struct TestStorage {
    records: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    failing_kinds: Mutex<HashSet<String>>,
    fail_flush: AtomicBool,
    hold: watch::Sender<bool>,
    seen: Arc<Mutex<Vec<(ChangeKind, Uuid)>>>,
    flushes: AtomicUsize,
    tracked: AtomicUsize,
    tracked_read_only: AtomicBool,
    errors: EventChannel<ExError>,
}

impl TestStorage {
    pub fn new() -> Arc<Self> {
        let (hold, _) = watch::channel(false);
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            failing_kinds: Mutex::new(HashSet::new()),
            fail_flush: AtomicBool::new(false),
            hold,
            seen: Arc::new(Mutex::new(Vec::new())),
            flushes: AtomicUsize::new(0),
            tracked: AtomicUsize::new(0),
            tracked_read_only: AtomicBool::new(false),
            errors: EventChannel::new(),
        })
    }

    pub fn seed<E: Entity>(&self, records: &[E]) {
        let values = records
            .iter()
            .map(|r| serde_json::to_value(r).unwrap());
        self.records
            .lock()
            .entry(E::KIND.to_string())
            .or_default()
            .extend(values);
    }

    pub fn seed_raw(&self, kind: &str, value: serde_json::Value) {
        self.records
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push(value);
    }

    /// Make every fetch wait until `release_loading`
    pub fn hold_loading(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_loading(&self) {
        self.hold.send_replace(false);
    }

    pub fn fail_kind(&self, kind: &str) {
        self.failing_kinds.lock().insert(kind.to_string());
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<(ChangeKind, Uuid)> {
        self.seen.lock().clone()
    }

    pub fn seen_for(&self, id: Uuid) -> Vec<ChangeKind> {
        self.seen
            .lock()
            .iter()
            .filter(|(_, seen)| *seen == id)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn track_count(&self) -> usize {
        self.tracked.load(Ordering::SeqCst)
    }

    pub fn tracked_read_only(&self) -> bool {
        self.tracked_read_only.load(Ordering::SeqCst)
    }

    /// Report a failure the way a backend does outside a direct call
    pub fn report(&self, err: ExError) {
        self.errors.emit(&err);
    }
}

#[async_trait]
impl Storage for TestStorage {
    async fn fetch_all(&self, kind: &str) -> StorageResult<Vec<serde_json::Value>> {
        let mut held = self.hold.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if self.failing_kinds.lock().contains(kind) {
            return Err(ExError::new(ExErrorKind::Persistence)
                .with_op("fetch_all")
                .with_model_type(kind.to_string())
                .with_message("backend unavailable"));
        }
        let records = self.records.lock().get(kind).cloned().unwrap_or_default();
        Ok(records)
    }

    fn track(&self, stream: &ChangeStream, read_only: bool) {
        self.tracked.fetch_add(1, Ordering::SeqCst);
        self.tracked_read_only.store(read_only, Ordering::SeqCst);
        let seen = Arc::clone(&self.seen);
        stream.subscribe(move |event| seen.lock().push((event.kind(), event.source_id())));
    }

    async fn flush(&self) -> StorageResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(ExError::new(ExErrorKind::Persistence)
                .with_op("flush")
                .with_message("disk full"));
        }
        Ok(())
    }

    fn errors(&self) -> &EventChannel<ExError> {
        &self.errors
    }
}

// ---------- Repository setup ----------

pub fn register_all(repo: &ObjectRepository) {
    repo.register_type::<Widget, _>(Widget::from_record).unwrap();
    repo.register_type::<Folder, _>(Folder::from_record).unwrap();
    repo.register_type::<Document, _>(Document::from_record).unwrap();
    repo.register_type::<Note, _>(Note::from_record).unwrap();
}

/// A repository with every test type registered and initialized
pub async fn ready_repository(
    storage: &Arc<TestStorage>,
    options: RepositoryOptions,
) -> ObjectRepository {
    let repo = ObjectRepository::new(Arc::clone(storage) as Arc<dyn Storage>, options).unwrap();
    register_all(&repo);
    repo.initialize().await.unwrap();
    repo
}
