use std::sync::{Arc, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::concurrent_list::ConcurrentList;
use crate::event::{ChangeEvent, ChangeKind};
use crate::model::Model;
use crate::table::Table;

/// Receives every event for one model type, inside the fan-out gate
pub(crate) trait ChangeObserver: Send + Sync {
    fn observe(&self, event: &ChangeEvent);
}

/// Foreign-key index: parent id to the ids of referencing children
///
/// Built on first use from a snapshot of the child table and kept current
/// by observing child events. Buckets hold ids, resolved against the child
/// table on read.
pub(crate) struct ForeignIndex<C: Model> {
    name: &'static str,
    get: fn(&C) -> Option<Uuid>,
    children: Weak<Table<C>>,
    buckets: DashMap<Uuid, Arc<ConcurrentList<Uuid>>>,
}

impl<C: Model> ForeignIndex<C> {
    pub(crate) fn build(
        name: &'static str,
        get: fn(&C) -> Option<Uuid>,
        table: Weak<Table<C>>,
        children: impl IntoIterator<Item = Arc<C>>,
    ) -> Self {
        let index = Self {
            name,
            get,
            children: table,
            buckets: DashMap::new(),
        };
        for child in children {
            if let Some(parent) = get(&child) {
                index.link(parent, child.id());
            }
        }
        index
    }

    pub(crate) fn bucket(&self, parent: Uuid) -> Vec<Uuid> {
        self.buckets
            .get(&parent)
            .map(|bucket| bucket.to_vec())
            .unwrap_or_default()
    }

    fn link(&self, parent: Uuid, child: Uuid) {
        let bucket = Arc::clone(self.buckets.entry(parent).or_default().value());
        bucket.add(child);
    }

    /// A newer object re-added under the same id and parent keeps the link
    fn relinked(&self, removed: &Arc<C>, parent: Uuid) -> bool {
        let Some(current) = self.children.upgrade().and_then(|t| t.find(removed.id())) else {
            return false;
        };
        !Arc::ptr_eq(&current, removed) && (self.get)(&current) == Some(parent)
    }

    fn unlink(&self, parent: Uuid, child: Uuid) {
        let bucket = self.buckets.get(&parent).map(|b| Arc::clone(b.value()));
        if let Some(bucket) = bucket {
            bucket.remove(&child);
        }
    }
}

impl<C: Model> ChangeObserver for ForeignIndex<C> {
    fn observe(&self, event: &ChangeEvent) {
        let child = event.source_id();
        match event.kind() {
            ChangeKind::Added => {
                if let Some(parent) = event.source_as::<C>().and_then(|c| (self.get)(&c)) {
                    self.link(parent, child);
                }
            }
            ChangeKind::Removed => {
                let Some(removed) = event.source_as::<C>() else {
                    return;
                };
                if let Some(parent) = (self.get)(&removed) {
                    if !self.relinked(&removed, parent) {
                        self.unlink(parent, child);
                    }
                }
            }
            ChangeKind::PropertyChanged => {
                if event.property() != Some(self.name) {
                    return;
                }
                if let Some(old) = event.old_value().and_then(|v| v.as_id()) {
                    self.unlink(old, child);
                }
                if let Some(new) = event.new_value().and_then(|v| v.as_id()) {
                    self.link(new, child);
                }
            }
        }
    }
}
