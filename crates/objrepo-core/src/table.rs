//! Typed in-memory tables
//!
//! A table owns the primary index of one model type, any secondary indexes
//! declared on it, and the foreign-key indexes of children that reference
//! it. Index construction takes the repository's fan-out gate exclusively,
//! so a build never interleaves with event delivery.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::errors::{RepositoryError, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::foreign::{ChangeObserver, ForeignIndex};
use crate::model::{ForeignKey, Model, Property};
use crate::repository::RepositoryInner;
use crate::value::Value;

struct SecondaryIndex<T> {
    property: Property<T>,
    entries: DashMap<Value, Arc<T>>,
}

impl<T: Model> SecondaryIndex<T> {
    fn insert(&self, key: Value, object: &Arc<T>) {
        if !key.is_null() {
            self.entries.insert(key, Arc::clone(object));
        }
    }

    /// Drop the slot only while it still holds this exact object
    fn remove_if_same(&self, key: &Value, object: &Arc<T>) {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, object));
    }
}

/// Outcome of warming one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmUpReport {
    pub objects: usize,
    pub failures: usize,
}

pub struct Table<T: Model> {
    rows: DashMap<Uuid, Arc<T>>,
    indexes: DashMap<&'static str, Arc<SecondaryIndex<T>>>,
    foreign: DashMap<(TypeId, &'static str), Arc<dyn Any + Send + Sync>>,
    build_lock: Mutex<()>,
    gate: Arc<RwLock<()>>,
}

impl<T: Model> Table<T> {
    pub(crate) fn new(gate: Arc<RwLock<()>>) -> Self {
        Self {
            rows: DashMap::new(),
            indexes: DashMap::new(),
            foreign: DashMap::new(),
            build_lock: Mutex::new(()),
            gate,
        }
    }

    pub fn find(&self, id: Uuid) -> Option<Arc<T>> {
        self.rows.get(&id).map(|row| Arc::clone(row.value()))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.rows.iter().map(|row| *row.key()).collect()
    }

    /// Snapshot of every object, in no particular order
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.rows.iter().map(|row| Arc::clone(row.value())).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<T>> {
        self.to_vec().into_iter()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.to_vec()
            .into_iter()
            .filter(|object| predicate(object))
            .collect()
    }

    /// Declare a secondary index over `property` and build it
    ///
    /// Returns false when an index of that name already exists. When several
    /// objects share a key the last one written wins the slot; `Null` keys
    /// are not indexed.
    pub fn add_index(&self, property: Property<T>) -> bool {
        if self.indexes.contains_key(property.name()) {
            return false;
        }
        let _build = self.build_lock.lock();
        if self.indexes.contains_key(property.name()) {
            return false;
        }
        let _gate = self.gate.write();

        let index = SecondaryIndex {
            property,
            entries: DashMap::new(),
        };
        for row in self.to_vec() {
            index.insert(property.value_of(&row), &row);
        }
        tracing::debug!(
            model_type = T::type_name(),
            property = property.name(),
            entries = index.entries.len(),
            "Secondary index built"
        );
        self.indexes.insert(property.name(), Arc::new(index));
        true
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Look up the object whose `property` currently equals `value`
    pub fn find_by_index(
        &self,
        property: &Property<T>,
        value: impl Into<Value>,
    ) -> Result<Option<Arc<T>>> {
        let index = self
            .indexes
            .get(property.name())
            .map(|index| Arc::clone(index.value()))
            .ok_or_else(|| RepositoryError::UnknownIndex {
                type_name: T::type_name().to_string(),
                index: property.name().to_string(),
            })?;
        let found = index
            .entries
            .get(&value.into())
            .map(|entry| Arc::clone(entry.value()));
        Ok(found)
    }

    pub(crate) fn load(&self, objects: Vec<Arc<T>>) {
        for object in objects {
            if self.rows.insert(object.id(), object).is_some() {
                tracing::warn!(
                    model_type = T::type_name(),
                    "Backend returned a duplicate id; keeping the last record"
                );
            }
        }
    }

    /// Claim the primary slot for a new object
    pub(crate) fn insert_row(&self, object: &Arc<T>) -> Result<()> {
        match self.rows.entry(object.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::DuplicateId {
                type_name: T::type_name().to_string(),
                id: object.id(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(object));
                Ok(())
            }
        }
    }

    /// Release the primary slot if `object` still holds it
    ///
    /// A slot already taken over by another object with the same id is left
    /// alone.
    pub(crate) fn remove_row(&self, object: &Arc<T>) -> bool {
        self.rows
            .remove_if(&object.id(), |_, current| Arc::ptr_eq(current, object))
            .is_some()
    }

    /// True while `object` itself occupies its primary slot
    pub(crate) fn holds(&self, object: &Arc<T>) -> bool {
        self.rows
            .get(&object.id())
            .is_some_and(|current| Arc::ptr_eq(current.value(), object))
    }

    fn secondary_indexes(&self) -> Vec<Arc<SecondaryIndex<T>>> {
        self.indexes
            .iter()
            .map(|index| Arc::clone(index.value()))
            .collect()
    }

    /// Foreign-key index of children `C` referencing this table through `fk`
    ///
    /// Built once, under the gate, from the child table's current contents.
    pub(crate) fn foreign_index<C: Model>(
        &self,
        fk: &ForeignKey<C, T>,
        repository: &RepositoryInner,
    ) -> Result<Arc<ForeignIndex<C>>> {
        let key = (TypeId::of::<C>(), fk.name());
        if let Some(index) = self.cached_foreign::<C>(&key) {
            return Ok(index);
        }

        let _build = self.build_lock.lock();
        if let Some(index) = self.cached_foreign::<C>(&key) {
            return Ok(index);
        }
        let children = repository.table::<C>()?;
        let _gate = self.gate.write();

        let index = Arc::new(ForeignIndex::build(
            fk.name(),
            fk.getter(),
            Arc::downgrade(&children),
            children.to_vec(),
        ));
        repository.observe(TypeId::of::<C>(), Arc::clone(&index) as Arc<dyn ChangeObserver>);
        self.foreign
            .insert(key, Arc::clone(&index) as Arc<dyn Any + Send + Sync>);
        tracing::debug!(
            model_type = T::type_name(),
            referencing_type = C::type_name(),
            property = fk.name(),
            "Foreign-key index built"
        );
        Ok(index)
    }

    fn cached_foreign<C: Model>(
        &self,
        key: &(TypeId, &'static str),
    ) -> Option<Arc<ForeignIndex<C>>> {
        let erased = self.foreign.get(key).map(|index| Arc::clone(index.value()))?;
        erased.downcast::<ForeignIndex<C>>().ok()
    }
}

impl<T: Model> fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("model_type", &T::type_name())
            .field("rows", &self.rows.len())
            .field("indexes", &self.indexes.len())
            .field("foreign_indexes", &self.foreign.len())
            .finish()
    }
}

/// Type-erased table operations used by the repository
pub(crate) trait AnyTable: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn row_count(&self) -> usize;

    /// Secondary index maintenance for one event
    ///
    /// The primary index is owned by the add and remove paths and is never
    /// written here.
    fn apply(&self, event: &ChangeEvent);

    fn warm_up(&self, strict: bool) -> Result<WarmUpReport>;
}

impl<T: Model> AnyTable for Table<T> {
    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn apply(&self, event: &ChangeEvent) {
        let Some(object) = event.source_as::<T>() else {
            return;
        };
        match event.kind() {
            ChangeKind::Added => {
                if !self.holds(&object) {
                    return;
                }
                for index in self.secondary_indexes() {
                    index.insert(index.property.value_of(&object), &object);
                }
            }
            ChangeKind::Removed => {
                for index in self.secondary_indexes() {
                    index.remove_if_same(&index.property.value_of(&object), &object);
                }
            }
            ChangeKind::PropertyChanged => {
                let Some(property) = event.property() else {
                    return;
                };
                let index = self.indexes.get(property).map(|i| Arc::clone(i.value()));
                if let Some(index) = index {
                    if let Some(old) = event.old_value() {
                        index.remove_if_same(old, &object);
                    }
                    if let Some(new) = event.new_value().filter(|_| self.holds(&object)) {
                        index.insert(new.clone(), &object);
                    }
                }
            }
        }
    }

    fn warm_up(&self, strict: bool) -> Result<WarmUpReport> {
        let relations = T::relations();
        let mut report = WarmUpReport::default();
        for object in self.to_vec() {
            report.objects += 1;
            for relation in &relations {
                if let Err(err) = relation.touch(&object) {
                    if strict {
                        return Err(RepositoryError::WarmUp {
                            type_name: T::type_name().to_string(),
                            id: object.id(),
                            accessor: relation.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                    report.failures += 1;
                    tracing::warn!(
                        model_type = T::type_name(),
                        object_id = %object.id(),
                        accessor = relation.name(),
                        error = %err,
                        "Warm-up accessor failed"
                    );
                }
            }
        }
        Ok(report)
    }
}
