//! Domain objects and the descriptors that wire them into tables
//!
//! A domain object is any type implementing [`Model`]: it embeds a
//! [`ModelBase`] holding the persisted record, and exposes typed getters and
//! setters over it. Setters go through [`ModelBase::update`], which is the
//! single place where property changes are detected and published.
//!
//! Relationships are declared as data:
//!
//! - [`Property`] names a field that may key a secondary index
//! - [`ForeignKey`] names a child's reference to a parent; it backs to-many
//!   accessors and the delete policy
//! - [`Relation`] lists accessors touched during warm-up

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use uuid::Uuid;

use crate::entity::Entity;
use crate::errors::{RepositoryError, Result};
use crate::event::ChangeEvent;
use crate::repository::RepositoryInner;
use crate::value::Value;

/// Object-safe view of a domain object
///
/// Implemented for every [`Model`]; this is what change events carry.
pub trait AnyModel: Send + Sync + 'static {
    fn object_id(&self) -> Uuid;
    fn model_type(&self) -> TypeId;
    fn model_type_name(&self) -> &'static str;
    fn record_kind(&self) -> &'static str;

    /// JSON form of the current record
    fn record_snapshot(&self) -> serde_json::Value;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Model> AnyModel for M {
    fn object_id(&self) -> Uuid {
        self.base().id()
    }

    fn model_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn model_type_name(&self) -> &'static str {
        M::type_name()
    }

    fn record_kind(&self) -> &'static str {
        <M::Record as Entity>::KIND
    }

    fn record_snapshot(&self) -> serde_json::Value {
        self.base().snapshot()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A domain object stored in a repository table
pub trait Model: Send + Sync + Sized + 'static {
    type Record: Entity;

    fn base(&self) -> &ModelBase<Self::Record>;

    /// Accessors invoked for every object during warm-up
    fn relations() -> Vec<Relation<Self>> {
        Vec::new()
    }

    /// References this type holds to other types, consulted on removal
    fn foreign_keys() -> Vec<Reference<Self>> {
        Vec::new()
    }

    fn type_name() -> &'static str {
        short_type_name::<Self>()
    }

    fn id(&self) -> Uuid {
        self.base().id()
    }

    /// Resolve a to-one reference
    ///
    /// `None` resolves to `None`. A key matching no live `P` is an
    /// [`RepositoryError::UnresolvedReference`] naming `accessor`.
    fn single<P: Model>(&self, key: Option<Uuid>, accessor: &'static str) -> Result<Option<Arc<P>>> {
        self.base().resolve_single::<P>(key, accessor)
    }

    /// Resolve a to-many reference through the foreign-key index on `fk`
    ///
    /// Returns a snapshot of the children at the time of the call, not a
    /// live view; call again after changes to see them.
    fn multiple<C: Model>(&self, fk: &ForeignKey<C, Self>) -> Result<Vec<Arc<C>>> {
        self.base().resolve_multiple(self.id(), fk)
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

struct Owner {
    repository: Weak<RepositoryInner>,
    this: Weak<dyn AnyModel>,
}

/// State shared by every domain object
///
/// Holds the record behind a lock, the immutable id and the back-reference
/// to the owning repository. The owner can be set once; removal detaches the
/// object so later writes are silent.
pub struct ModelBase<R: Entity> {
    id: Uuid,
    record: RwLock<R>,
    mutation: ReentrantMutex<()>,
    owner: OnceLock<Owner>,
    attached: AtomicBool,
}

impl<R: Entity> ModelBase<R> {
    pub fn new(record: R) -> Self {
        Self {
            id: record.id(),
            record: RwLock::new(record),
            mutation: ReentrantMutex::new(()),
            owner: OnceLock::new(),
            attached: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn read<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.record.read())
    }

    /// Clone of the current record
    pub fn record(&self) -> R {
        self.record.read().clone()
    }

    /// True while the object is a live member of a repository
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Write one field and publish the change
    ///
    /// Returns `Ok(false)` without publishing when `value` equals the current
    /// value. Objects that were never added, or were removed, are written
    /// silently. While the owning repository is loading the write is refused
    /// with [`RepositoryError::LoadingInProgress`] and the record is left
    /// untouched.
    ///
    /// `field` must select the storage slot of `property`. The id field must
    /// never be written through this method.
    ///
    /// The object's write lock is held until every subscriber, including
    /// [`ObjectRepository::model_changed`](crate::ObjectRepository::model_changed)
    /// handlers, has returned. A handler may write to this object on the
    /// same thread, but handlers on two threads that each write to the
    /// other's object will deadlock.
    pub fn update<V>(
        &self,
        property: &'static str,
        field: impl FnOnce(&mut R) -> &mut V,
        value: V,
    ) -> Result<bool>
    where
        V: PartialEq + Clone + Into<Value>,
    {
        let _serial = self.mutation.lock();
        let live = self.live_owner();
        if let Some((repository, _)) = &live {
            repository.ensure_ready()?;
        }

        let old = {
            let mut record = self.record.write();
            let slot = field(&mut record);
            if *slot == value {
                return Ok(false);
            }
            std::mem::replace(slot, value.clone())
        };

        if let Some((repository, this)) = live {
            let event = ChangeEvent::property_changed(this, property, old.into(), value.into());
            repository.dispatch(&event);
        }
        Ok(true)
    }

    /// Serialize against `update`; held by add and remove through dispatch
    pub(crate) fn serialize_writes(&self) -> ReentrantMutexGuard<'_, ()> {
        self.mutation.lock()
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        match serde_json::to_value(&*self.record.read()) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    record_kind = R::KIND,
                    object_id = %self.id,
                    error = %err,
                    "Failed to serialize record snapshot"
                );
                serde_json::Value::Null
            }
        }
    }

    pub(crate) fn has_owner(&self) -> bool {
        self.owner.get().is_some()
    }

    pub(crate) fn attach(
        &self,
        type_name: &'static str,
        repository: Weak<RepositoryInner>,
        this: Weak<dyn AnyModel>,
    ) -> Result<()> {
        self.owner
            .set(Owner { repository, this })
            .map_err(|_| RepositoryError::OwnerAlreadySet {
                type_name: type_name.to_string(),
                id: self.id,
            })?;
        self.attached.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    fn live_owner(&self) -> Option<(Arc<RepositoryInner>, Arc<dyn AnyModel>)> {
        if !self.is_attached() {
            return None;
        }
        let owner = self.owner.get()?;
        Some((owner.repository.upgrade()?, owner.this.upgrade()?))
    }

    fn repository(&self) -> Result<Arc<RepositoryInner>> {
        self.owner
            .get()
            .and_then(|owner| owner.repository.upgrade())
            .ok_or_else(|| RepositoryError::Detached {
                type_name: R::KIND.to_string(),
                id: self.id,
            })
    }

    fn resolve_single<P: Model>(
        &self,
        key: Option<Uuid>,
        accessor: &'static str,
    ) -> Result<Option<Arc<P>>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let found = self.repository()?.table::<P>()?.find(key);
        match found {
            Some(parent) => Ok(Some(parent)),
            None => Err(RepositoryError::UnresolvedReference {
                expected_type: P::type_name().to_string(),
                id: key,
                accessor: accessor.to_string(),
            }),
        }
    }

    fn resolve_multiple<C: Model, P: Model>(
        &self,
        owner: Uuid,
        fk: &ForeignKey<C, P>,
    ) -> Result<Vec<Arc<C>>> {
        self.repository()?.children(fk, owner)
    }
}

impl<R: Entity> fmt::Debug for ModelBase<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBase")
            .field("kind", &R::KIND)
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// A named property usable as a secondary index key
pub struct Property<T> {
    name: &'static str,
    get: fn(&T) -> Value,
}

impl<T> Property<T> {
    pub const fn new(name: &'static str, get: fn(&T) -> Value) -> Self {
        Self { name, get }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value_of(&self, object: &T) -> Value {
        (self.get)(object)
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Property<T> {}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Property").field(&self.name).finish()
    }
}

/// A child's reference to its parent
///
/// `C` holds the key, `P` is the referenced type. `name` must match the
/// property name the child's setter publishes, so the index can follow
/// changes. A nullable key carries a `clear` function used by
/// [`DeletePolicy::Detach`](crate::config::DeletePolicy::Detach).
pub struct ForeignKey<C, P> {
    name: &'static str,
    get: fn(&C) -> Option<Uuid>,
    clear: Option<fn(&C) -> Result<bool>>,
    _target: PhantomData<fn() -> P>,
}

impl<C: Model, P: Model> ForeignKey<C, P> {
    pub const fn new(name: &'static str, get: fn(&C) -> Option<Uuid>) -> Self {
        Self {
            name,
            get,
            clear: None,
            _target: PhantomData,
        }
    }

    pub const fn nullable(
        name: &'static str,
        get: fn(&C) -> Option<Uuid>,
        clear: fn(&C) -> Result<bool>,
    ) -> Self {
        Self {
            name,
            get,
            clear: Some(clear),
            _target: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key_of(&self, child: &C) -> Option<Uuid> {
        (self.get)(child)
    }

    pub fn is_nullable(&self) -> bool {
        self.clear.is_some()
    }

    pub(crate) fn getter(&self) -> fn(&C) -> Option<Uuid> {
        self.get
    }

    /// Type-erased form for [`Model::foreign_keys`]
    pub fn reference(&self) -> Reference<C> {
        Reference {
            name: self.name,
            target: TypeId::of::<P>(),
            target_name: P::type_name(),
            get: self.get,
            clear: self.clear,
            children: children_via_index::<C, P>,
        }
    }
}

impl<C, P> Clone for ForeignKey<C, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, P> Copy for ForeignKey<C, P> {}

impl<C, P> fmt::Debug for ForeignKey<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignKey")
            .field("name", &self.name)
            .field("nullable", &self.clear.is_some())
            .finish()
    }
}

type ChildrenFn<C> =
    fn(&RepositoryInner, &'static str, fn(&C) -> Option<Uuid>, Uuid) -> Result<Vec<Arc<C>>>;

fn children_via_index<C: Model, P: Model>(
    repository: &RepositoryInner,
    name: &'static str,
    get: fn(&C) -> Option<Uuid>,
    owner: Uuid,
) -> Result<Vec<Arc<C>>> {
    repository.children(&ForeignKey::<C, P>::new(name, get), owner)
}

/// A [`ForeignKey`] with its target type erased
pub struct Reference<C> {
    name: &'static str,
    target: TypeId,
    target_name: &'static str,
    get: fn(&C) -> Option<Uuid>,
    clear: Option<fn(&C) -> Result<bool>>,
    children: ChildrenFn<C>,
}

impl<C: Model> Reference<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target_name(&self) -> &'static str {
        self.target_name
    }

    pub(crate) fn target(&self) -> TypeId {
        self.target
    }

    fn children_of(&self, repository: &RepositoryInner, owner: Uuid) -> Result<Vec<Arc<C>>> {
        (self.children)(repository, self.name, self.get, owner)
    }
}

/// Removal-time view of a reference, keyed by the referenced type
pub(crate) trait ReferenceLink: Send + Sync {
    fn referencing_type(&self) -> &'static str;
    fn property(&self) -> &'static str;
    fn is_nullable(&self) -> bool;
    fn count(&self, repository: &RepositoryInner, owner: Uuid) -> Result<usize>;
    fn clear_all(&self, repository: &RepositoryInner, owner: Uuid) -> Result<()>;
    fn remove_all(&self, repository: &RepositoryInner, owner: Uuid) -> Result<()>;
}

impl<C: Model> ReferenceLink for Reference<C> {
    fn referencing_type(&self) -> &'static str {
        C::type_name()
    }

    fn property(&self) -> &'static str {
        self.name
    }

    fn is_nullable(&self) -> bool {
        self.clear.is_some()
    }

    fn count(&self, repository: &RepositoryInner, owner: Uuid) -> Result<usize> {
        Ok(self.children_of(repository, owner)?.len())
    }

    fn clear_all(&self, repository: &RepositoryInner, owner: Uuid) -> Result<()> {
        let Some(clear) = self.clear else {
            return Ok(());
        };
        for child in self.children_of(repository, owner)? {
            clear(&child)?;
        }
        Ok(())
    }

    fn remove_all(&self, repository: &RepositoryInner, owner: Uuid) -> Result<()> {
        for child in self.children_of(repository, owner)? {
            match repository.remove_by_id::<C>(child.id()) {
                Ok(()) | Err(RepositoryError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// A warm-up accessor
pub struct Relation<M> {
    name: &'static str,
    touch: fn(&M) -> Result<()>,
}

impl<M> Relation<M> {
    pub const fn new(name: &'static str, touch: fn(&M) -> Result<()>) -> Self {
        Self { name, touch }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn touch(&self, object: &M) -> Result<()> {
        (self.touch)(object)
    }
}

impl<M> Clone for Relation<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Relation<M> {}
