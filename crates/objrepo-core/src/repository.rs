//! The object repository
//!
//! Owns one [`Table`] per registered model type, drives the asynchronous
//! load from a [`Storage`] backend, and fans every change out to indexes,
//! the backend and application subscribers.
//!
//! ## Lifecycle
//!
//! 1. `register_type` for every model type; each starts its fetch at once
//! 2. `initialize` waits for all fetches, then warms every table in parallel
//! 3. the repository is ready; mutations are accepted from here on
//!
//! Until step 3 completes every mutating call fails with
//! [`RepositoryError::LoadingInProgress`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{DeletePolicy, RepositoryOptions};
use crate::core_types::schema::{OP_INITIALIZE, OP_LOAD_TYPE, OP_SAVE_CHANGES, OP_WARM_UP};
use crate::entity::Entity;
use crate::errors::{ExError, RepositoryError, Result};
use crate::event::{ChangeEvent, ChangeStream, EventChannel, SubscriptionId};
use crate::foreign::{ChangeObserver, ForeignIndex};
use crate::model::{AnyModel, ForeignKey, Model, ReferenceLink};
use crate::storage::Storage;
use crate::table::{AnyTable, Table, WarmUpReport};
use crate::{log_op_end, log_op_error, log_op_start};

#[derive(Clone)]
struct TableSlot {
    erased: Arc<dyn AnyTable>,
    typed: Arc<dyn Any + Send + Sync>,
}

struct PendingLoad {
    type_name: &'static str,
    handle: JoinHandle<Result<()>>,
}

#[derive(Debug, Clone)]
enum LoadState {
    Loading,
    Ready,
    Failed(RepositoryError),
}

pub(crate) struct RepositoryInner {
    me: Weak<RepositoryInner>,
    storage: Arc<dyn Storage>,
    options: RepositoryOptions,
    runtime: Handle,
    tables: DashMap<TypeId, TableSlot>,
    references: DashMap<TypeId, Vec<Arc<dyn ReferenceLink>>>,
    observers: DashMap<TypeId, Vec<Arc<dyn ChangeObserver>>>,
    pending: Mutex<Vec<PendingLoad>>,
    loads_total: AtomicUsize,
    loads_done: AtomicUsize,
    initializing: AtomicBool,
    tracking: AtomicBool,
    state: watch::Sender<LoadState>,
    gate: Arc<RwLock<()>>,
    backend_stream: ChangeStream,
    model_changed: ChangeStream,
    exceptions: EventChannel<ExError>,
    error_subscription: SubscriptionId,
}

impl RepositoryInner {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), LoadState::Ready)
    }

    pub(crate) fn progress(&self) -> f64 {
        let total = self.loads_total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        self.loads_done.load(Ordering::SeqCst) as f64 / total as f64
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(RepositoryError::LoadingInProgress {
                progress: self.progress(),
            })
        }
    }

    /// Typed table lookup that ignores the loading gate
    pub(crate) fn table<T: Model>(&self) -> Result<Arc<Table<T>>> {
        let typed = self
            .tables
            .get(&TypeId::of::<T>())
            .map(|slot| Arc::clone(&slot.typed))
            .ok_or_else(|| RepositoryError::UnregisteredType {
                type_name: T::type_name().to_string(),
            })?;
        typed
            .downcast::<Table<T>>()
            .map_err(|_| RepositoryError::Internal {
                message: format!("table slot for {} holds another type", T::type_name()),
            })
    }

    pub(crate) fn observe(&self, model_type: TypeId, observer: Arc<dyn ChangeObserver>) {
        self.observers.entry(model_type).or_default().push(observer);
    }

    pub(crate) fn children<C: Model, P: Model>(
        &self,
        fk: &ForeignKey<C, P>,
        owner: Uuid,
    ) -> Result<Vec<Arc<C>>> {
        let index: Arc<ForeignIndex<C>> = self.table::<P>()?.foreign_index(fk, self)?;
        let children = self.table::<C>()?;
        Ok(index
            .bucket(owner)
            .into_iter()
            .filter_map(|id| children.find(id))
            .collect())
    }

    /// Deliver one event: owning table, foreign-key indexes, backend, app
    pub(crate) fn dispatch(&self, event: &ChangeEvent) {
        {
            let _gate = self.gate.read();
            let table = self
                .tables
                .get(&event.model_type())
                .map(|slot| Arc::clone(&slot.erased));
            if let Some(table) = table {
                table.apply(event);
            }
            let observers = self
                .observers
                .get(&event.model_type())
                .map(|observers| observers.value().clone());
            for observer in observers.into_iter().flatten() {
                observer.observe(event);
            }
        }
        self.backend_stream.emit(event);
        self.model_changed.emit(event);
    }

    fn raise(&self, err: ExError) {
        self.exceptions.emit(&err);
    }

    fn adopt<M: Model>(&self, object: &Arc<M>) -> Result<()> {
        let this: Arc<dyn AnyModel> = Arc::clone(object) as Arc<dyn AnyModel>;
        object
            .base()
            .attach(M::type_name(), self.me.clone(), Arc::downgrade(&this))
    }

    async fn load_type<M, F>(&self, table: &Table<M>, map: F) -> Result<()>
    where
        M: Model,
        F: Fn(M::Record) -> M,
    {
        let start = Instant::now();
        let kind = <M::Record as Entity>::KIND;
        log_op_start!(OP_LOAD_TYPE, model_type = M::type_name(), record_kind = kind);

        let records = match self.storage.fetch_all(kind).await {
            Ok(records) => records,
            Err(err) => {
                let err = RepositoryError::from(err);
                log_op_error!(
                    OP_LOAD_TYPE,
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    model_type = M::type_name()
                );
                return Err(err);
            }
        };

        let mut objects = Vec::with_capacity(records.len());
        for raw in records {
            let record: M::Record = match serde_json::from_value(raw) {
                Ok(record) => record,
                Err(err) if self.options.strict_decode => {
                    let err = RepositoryError::Decode {
                        kind: kind.to_string(),
                        message: err.to_string(),
                    };
                    log_op_error!(
                        OP_LOAD_TYPE,
                        err.clone(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        model_type = M::type_name()
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        model_type = M::type_name(),
                        record_kind = kind,
                        error = %err,
                        "Skipping record that failed to decode"
                    );
                    continue;
                }
            };
            let object = Arc::new(map(record));
            self.adopt(&object)?;
            objects.push(object);
        }

        let row_count = objects.len();
        table.load(objects);
        log_op_end!(
            OP_LOAD_TYPE,
            duration_ms = start.elapsed().as_millis() as u64,
            model_type = M::type_name(),
            row_count = row_count
        );
        Ok(())
    }

    async fn run_initialize(&self, loads: Vec<PendingLoad>) -> Result<()> {
        let mut first_error = None;
        for load in loads {
            let outcome = match load.handle.await {
                Ok(outcome) => outcome,
                Err(join) => Err(RepositoryError::Internal {
                    message: format!("load task for {} failed: {}", load.type_name, join),
                }),
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        self.warm_up().await
    }

    async fn warm_up(&self) -> Result<()> {
        let start = Instant::now();
        log_op_start!(OP_WARM_UP, table_count = self.tables.len());

        let strict = self.options.strict_warm_up;
        let tables: Vec<Arc<dyn AnyTable>> = self
            .tables
            .iter()
            .map(|slot| Arc::clone(&slot.erased))
            .collect();
        let handles: Vec<_> = tables
            .into_iter()
            .map(|table| {
                let type_name = table.type_name();
                let handle = self.runtime.spawn_blocking(move || table.warm_up(strict));
                (type_name, handle)
            })
            .collect();

        let mut report = WarmUpReport::default();
        let mut first_error = None;
        for (type_name, handle) in handles {
            match handle.await {
                Ok(Ok(table_report)) => {
                    report.objects += table_report.objects;
                    report.failures += table_report.failures;
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join) => {
                    first_error.get_or_insert(RepositoryError::Internal {
                        message: format!("warm-up of {} failed: {}", type_name, join),
                    });
                }
            }
        }

        if let Some(err) = first_error {
            log_op_error!(
                OP_WARM_UP,
                err.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            return Err(err);
        }
        log_op_end!(
            OP_WARM_UP,
            duration_ms = start.elapsed().as_millis() as u64,
            row_count = report.objects,
            failed_count = report.failures
        );
        Ok(())
    }

    /// Remove one object, applying the delete policy to its referrers
    pub(crate) fn remove_by_id<M: Model>(&self, id: Uuid) -> Result<()> {
        let table = self.table::<M>()?;
        let not_found = || RepositoryError::NotFound {
            type_name: M::type_name().to_string(),
            id,
        };
        if !table.contains(id) {
            return Err(not_found());
        }

        let links: Vec<Arc<dyn ReferenceLink>> = self
            .references
            .get(&TypeId::of::<M>())
            .map(|links| links.value().clone())
            .unwrap_or_default();
        let policy = self.options.delete_policy;
        match policy {
            DeletePolicy::Reject => {
                for link in &links {
                    self.restrict::<M>(link.as_ref(), id)?;
                }
            }
            DeletePolicy::Detach => {
                for link in links.iter().filter(|link| !link.is_nullable()) {
                    self.restrict::<M>(link.as_ref(), id)?;
                }
                for link in links.iter().filter(|link| link.is_nullable()) {
                    link.clear_all(self, id)?;
                }
            }
            DeletePolicy::Cascade => {}
        }

        let object = table.find(id).ok_or_else(not_found)?;
        {
            let _serial = object.base().serialize_writes();
            if !table.remove_row(&object) {
                return Err(not_found());
            }
            object.base().detach();
            self.dispatch(&ChangeEvent::removed(Arc::clone(&object) as Arc<dyn AnyModel>));
        }

        if policy == DeletePolicy::Cascade {
            for link in &links {
                link.remove_all(self, id)?;
            }
        }
        Ok(())
    }

    fn restrict<M: Model>(&self, link: &dyn ReferenceLink, id: Uuid) -> Result<()> {
        let child_count = link.count(self, id)?;
        if child_count > 0 {
            return Err(RepositoryError::DeleteRestricted {
                type_name: M::type_name().to_string(),
                id,
                referencing_type: link.referencing_type().to_string(),
                property: link.property().to_string(),
                child_count,
            });
        }
        Ok(())
    }

    async fn save(&self) {
        let start = Instant::now();
        log_op_start!(OP_SAVE_CHANGES);
        match self.storage.flush().await {
            Ok(()) => {
                log_op_end!(
                    OP_SAVE_CHANGES,
                    duration_ms = start.elapsed().as_millis() as u64
                );
            }
            Err(err) => {
                log_op_error!(
                    OP_SAVE_CHANGES,
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                self.raise(err);
            }
        }
    }
}

impl Drop for RepositoryInner {
    fn drop(&mut self) {
        self.storage.errors().unsubscribe(self.error_subscription);
    }
}

/// In-memory object repository over a pluggable [`Storage`] backend
///
/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct ObjectRepository {
    inner: Arc<RepositoryInner>,
}

impl ObjectRepository {
    /// Create a repository on the current tokio runtime
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Internal`] when called outside a tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, options: RepositoryOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| RepositoryError::Internal {
            message: format!("ObjectRepository requires a tokio runtime: {}", err),
        })?;
        Ok(Self::with_runtime(storage, options, runtime))
    }

    /// Create a repository whose loads and flushes run on `runtime`
    pub fn with_runtime(
        storage: Arc<dyn Storage>,
        options: RepositoryOptions,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new_cyclic(|me: &Weak<RepositoryInner>| {
            let forward = me.clone();
            let error_subscription = storage.errors().subscribe(move |err: &ExError| {
                if let Some(inner) = forward.upgrade() {
                    inner.raise(err.clone());
                }
            });
            let (state, _) = watch::channel(LoadState::Loading);
            RepositoryInner {
                me: me.clone(),
                storage,
                options,
                runtime,
                tables: DashMap::new(),
                references: DashMap::new(),
                observers: DashMap::new(),
                pending: Mutex::new(Vec::new()),
                loads_total: AtomicUsize::new(0),
                loads_done: AtomicUsize::new(0),
                initializing: AtomicBool::new(false),
                tracking: AtomicBool::new(false),
                state,
                gate: Arc::new(RwLock::new(())),
                backend_stream: ChangeStream::new(),
                model_changed: ChangeStream::new(),
                exceptions: EventChannel::new(),
                error_subscription,
            }
        });
        Self { inner }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.inner.options
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Register a model type and start loading its records
    ///
    /// `map` wraps each decoded record in its domain object. The first call
    /// also hands the change stream to the backend.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::AlreadyInitialized`] once `initialize` has started
    /// - [`RepositoryError::DuplicateRegistration`] for a type registered twice
    pub fn register_type<M, F>(&self, map: F) -> Result<()>
    where
        M: Model,
        F: Fn(M::Record) -> M + Send + Sync + 'static,
    {
        let inner = &self.inner;
        // held until the load is queued so initialize cannot miss it
        let mut pending = inner.pending.lock();
        if inner.initializing.load(Ordering::Acquire) {
            return Err(RepositoryError::AlreadyInitialized);
        }

        let table = Arc::new(Table::<M>::new(Arc::clone(&inner.gate)));
        match inner.tables.entry(TypeId::of::<M>()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::DuplicateRegistration {
                    type_name: M::type_name().to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(TableSlot {
                    erased: Arc::clone(&table) as Arc<dyn AnyTable>,
                    typed: Arc::clone(&table) as Arc<dyn Any + Send + Sync>,
                });
            }
        }

        if !inner.tracking.swap(true, Ordering::AcqRel) {
            inner
                .storage
                .track(&inner.backend_stream, inner.options.read_only);
        }
        for reference in M::foreign_keys() {
            let target = reference.target();
            let link: Arc<dyn ReferenceLink> = Arc::new(reference);
            inner.references.entry(target).or_default().push(link);
        }

        inner.loads_total.fetch_add(1, Ordering::SeqCst);
        let loader = Arc::clone(inner);
        let handle = inner.runtime.spawn(async move {
            let result = loader.load_type(&table, map).await;
            loader.loads_done.fetch_add(1, Ordering::SeqCst);
            result
        });
        pending.push(PendingLoad {
            type_name: M::type_name(),
            handle,
        });
        Ok(())
    }

    /// Wait for every registered load, warm up, and open for mutation
    ///
    /// A second call waits for the first and returns its outcome.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NothingRegistered`] when no type was registered
    /// - the first load failure (backend or decode error)
    /// - the first warm-up failure when `strict_warm_up` is set
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let loads = {
            let mut pending = inner.pending.lock();
            if inner.initializing.load(Ordering::Acquire) {
                None
            } else if pending.is_empty() {
                return Err(RepositoryError::NothingRegistered);
            } else {
                inner.initializing.store(true, Ordering::Release);
                Some(std::mem::take(&mut *pending))
            }
        };
        let Some(loads) = loads else {
            return self.wait_for_initialize().await;
        };

        let start = Instant::now();
        log_op_start!(OP_INITIALIZE, table_count = loads.len());
        let result = inner.run_initialize(loads).await;
        match &result {
            Ok(()) => {
                inner.state.send_replace(LoadState::Ready);
                log_op_end!(
                    OP_INITIALIZE,
                    duration_ms = start.elapsed().as_millis() as u64,
                    row_count = inner.tables.iter().map(|s| s.erased.row_count()).sum::<usize>()
                );
            }
            Err(err) => {
                log_op_error!(
                    OP_INITIALIZE,
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                inner.state.send_replace(LoadState::Failed(err.clone()));
            }
        }
        result
    }

    /// Resolve once `initialize` has finished
    ///
    /// # Errors
    ///
    /// The error `initialize` failed with, if it failed.
    pub async fn wait_for_initialize(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        let outcome = match state.wait_for(|s| !matches!(s, LoadState::Loading)).await {
            Ok(current) => match &*current {
                LoadState::Failed(err) => Err(err.clone()),
                LoadState::Loading | LoadState::Ready => Ok(()),
            },
            Err(_) => Err(RepositoryError::Internal {
                message: "repository state channel closed".to_string(),
            }),
        };
        outcome
    }

    pub fn is_loading(&self) -> bool {
        !self.inner.is_ready()
    }

    /// Fraction of registered types whose fetch has finished
    pub fn progress(&self) -> f64 {
        self.inner.progress()
    }

    /// Add a new object and take ownership of it
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::LoadingInProgress`] before initialization
    /// - [`RepositoryError::UnregisteredType`] when `M` was not registered
    /// - [`RepositoryError::DuplicateId`] when the id is already present
    pub fn add<M: Model>(&self, object: M) -> Result<Arc<M>> {
        self.add_shared(Arc::new(object))
    }

    /// Add an object that is already shared
    ///
    /// # Errors
    ///
    /// As [`ObjectRepository::add`], plus
    /// [`RepositoryError::OwnerAlreadySet`] for an object that already
    /// belongs to a repository, including one removed from this one.
    pub fn add_shared<M: Model>(&self, object: Arc<M>) -> Result<Arc<M>> {
        let inner = &self.inner;
        inner.ensure_ready()?;
        let table = inner.table::<M>()?;
        if object.base().has_owner() {
            return Err(RepositoryError::OwnerAlreadySet {
                type_name: M::type_name().to_string(),
                id: object.id(),
            });
        }
        {
            let _serial = object.base().serialize_writes();
            table.insert_row(&object)?;
            if let Err(err) = inner.adopt(&object) {
                table.remove_row(&object);
                return Err(err);
            }
            inner.dispatch(&ChangeEvent::added(Arc::clone(&object) as Arc<dyn AnyModel>));
        }
        Ok(object)
    }

    /// Remove an object, applying the configured delete policy
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::LoadingInProgress`] before initialization
    /// - [`RepositoryError::NotFound`] when the object is not in its table
    /// - [`RepositoryError::DeleteRestricted`] when references block removal
    pub fn remove<M: Model>(&self, object: &M) -> Result<()> {
        self.inner.ensure_ready()?;
        self.inner.remove_by_id::<M>(object.id())
    }

    /// Remove every object matching `predicate`; returns how many went
    ///
    /// The matches are snapshotted before the first removal. Objects that
    /// disappear in the meantime, for instance through a cascade, are
    /// skipped.
    ///
    /// # Errors
    ///
    /// As [`ObjectRepository::remove`], except `NotFound`.
    pub fn remove_where<M: Model>(&self, predicate: impl Fn(&M) -> bool) -> Result<usize> {
        self.inner.ensure_ready()?;
        let victims = self.inner.table::<M>()?.filter(predicate);
        let mut removed = 0;
        for victim in victims {
            match self.inner.remove_by_id::<M>(victim.id()) {
                Ok(()) => removed += 1,
                Err(RepositoryError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// Remove each of `objects`, stopping at the first failure
    ///
    /// # Errors
    ///
    /// As [`ObjectRepository::remove`]; removals before the failure stand.
    pub fn remove_range<M, I>(&self, objects: I) -> Result<usize>
    where
        M: Model,
        I: IntoIterator,
        I::Item: AsRef<M>,
    {
        self.inner.ensure_ready()?;
        let mut removed = 0;
        for object in objects {
            self.inner.remove_by_id::<M>(object.as_ref().id())?;
            removed += 1;
        }
        Ok(removed)
    }

    /// The live table of `T`
    ///
    /// # Errors
    ///
    /// [`RepositoryError::LoadingInProgress`] before initialization, then
    /// [`RepositoryError::UnregisteredType`] for an unknown type.
    pub fn set<T: Model>(&self) -> Result<Arc<Table<T>>> {
        self.inner.ensure_ready()?;
        self.inner.table::<T>()
    }

    /// Ask the backend to persist buffered changes in the background
    ///
    /// Returns `None` while loading. A failed flush is logged and raised on
    /// [`ObjectRepository::on_exception`].
    pub fn save_changes(&self) -> Option<JoinHandle<()>> {
        if self.is_loading() {
            tracing::debug!(op = OP_SAVE_CHANGES, "Ignored while loading");
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(self.inner.runtime.spawn(async move { inner.save().await }))
    }

    /// Every change to every object, delivered after indexes and backend
    ///
    /// Handlers run synchronously on the mutating thread while the changed
    /// object's write lock is held. Writing to that object from a handler is
    /// fine; waiting on another thread that writes to it is a deadlock.
    pub fn model_changed(&self) -> &ChangeStream {
        &self.inner.model_changed
    }

    /// Backend failures surfaced asynchronously
    pub fn on_exception(&self) -> &EventChannel<ExError> {
        &self.inner.exceptions
    }
}

impl fmt::Debug for ObjectRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRepository")
            .field("tables", &self.inner.tables.len())
            .field("loading", &self.is_loading())
            .field("options", &self.inner.options)
            .finish()
    }
}
