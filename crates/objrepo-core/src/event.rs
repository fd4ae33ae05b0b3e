//! Change events and subscriber channels
//!
//! Every mutation that reaches a repository becomes a [`ChangeEvent`]. Events
//! are delivered synchronously, on the mutating thread, in a fixed order:
//! the owning table, foreign-key indexes, the storage backend's change
//! stream and finally application subscribers.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{AnyModel, Model};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    PropertyChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::PropertyChanged => "property_changed",
        }
    }
}

/// A single model change
///
/// `record` is the JSON form of the source's record taken when the event was
/// built, after the change was applied. Storage backends persist it as-is.
#[derive(Clone)]
pub struct ChangeEvent {
    kind: ChangeKind,
    source: Arc<dyn AnyModel>,
    record: serde_json::Value,
    property: Option<&'static str>,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl ChangeEvent {
    pub fn added(source: Arc<dyn AnyModel>) -> Self {
        Self::build(ChangeKind::Added, source, None, None, None)
    }

    pub fn removed(source: Arc<dyn AnyModel>) -> Self {
        Self::build(ChangeKind::Removed, source, None, None, None)
    }

    pub fn property_changed(
        source: Arc<dyn AnyModel>,
        property: &'static str,
        old_value: Value,
        new_value: Value,
    ) -> Self {
        Self::build(
            ChangeKind::PropertyChanged,
            source,
            Some(property),
            Some(old_value),
            Some(new_value),
        )
    }

    fn build(
        kind: ChangeKind,
        source: Arc<dyn AnyModel>,
        property: Option<&'static str>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        let record = source.record_snapshot();
        Self {
            kind,
            source,
            record,
            property,
            old_value,
            new_value,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn source(&self) -> &Arc<dyn AnyModel> {
        &self.source
    }

    /// Downcast the source to a concrete model type
    pub fn source_as<M: Model>(&self) -> Option<Arc<M>> {
        Arc::clone(&self.source).into_any().downcast::<M>().ok()
    }

    pub fn source_id(&self) -> Uuid {
        self.source.object_id()
    }

    pub fn model_type(&self) -> TypeId {
        self.source.model_type()
    }

    pub fn model_type_name(&self) -> &'static str {
        self.source.model_type_name()
    }

    pub fn record_kind(&self) -> &'static str {
        self.source.record_kind()
    }

    pub fn record(&self) -> &serde_json::Value {
        &self.record
    }

    pub fn property(&self) -> Option<&'static str> {
        self.property
    }

    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    pub fn new_value(&self) -> Option<&Value> {
        self.new_value.as_ref()
    }

    /// True for a property change of `property` on a `M`
    pub fn is_change_of<M: Model>(&self, property: &str) -> bool {
        self.kind == ChangeKind::PropertyChanged
            && self.model_type() == TypeId::of::<M>()
            && self.property == Some(property)
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("kind", &self.kind)
            .field("model_type", &self.model_type_name())
            .field("id", &self.source_id())
            .field("property", &self.property)
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .finish()
    }
}

/// Handle returned by [`EventChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous multi-subscriber channel
///
/// Handlers run in subscription order on the emitting thread. The handler
/// list is snapshotted before delivery, so a handler may subscribe or
/// unsubscribe without deadlocking.
pub struct EventChannel<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

/// The stream of model changes handed to storage backends
pub type ChangeStream = EventChannel<ChangeEvent>;

impl<E> EventChannel<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false when `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<E> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
