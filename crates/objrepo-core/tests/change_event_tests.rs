#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::*;
use objrepo_core::errors::RepositoryError;
use objrepo_core::{ChangeEvent, ChangeKind, Model, RepositoryOptions, Value};
use parking_lot::Mutex;

fn record_events(repo: &objrepo_core::ObjectRepository) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    repo.model_changed()
        .subscribe(move |event| sink.lock().push(event.clone()));
    events
}

#[tokio::test]
async fn test_add_and_remove_publish_events() {
    // GIVEN a subscribed application handler
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let events = record_events(&repo);

    // WHEN an object is added and removed
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    repo.remove(&*widget).unwrap();

    // THEN the handler and the backend both saw Added then Removed
    let kinds: Vec<ChangeKind> = events.lock().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Removed]);
    assert_eq!(
        storage.seen_for(widget.id()),
        vec![ChangeKind::Added, ChangeKind::Removed]
    );

    let events = events.lock();
    let added = &events[0];
    assert_eq!(added.source_id(), widget.id());
    assert_eq!(added.model_type_name(), "Widget");
    assert_eq!(added.record_kind(), "widgets");
    assert_eq!(added.record()["sku"], "G-1");
    assert!(added.property().is_none());
}

#[tokio::test]
async fn test_property_change_carries_old_and_new_values() {
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    let events = record_events(&repo);

    assert!(widget.set_quantity(7).unwrap());

    let events = events.lock();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind(), ChangeKind::PropertyChanged);
    assert!(event.is_change_of::<Widget>("quantity"));
    assert!(!event.is_change_of::<Document>("quantity"));
    assert_eq!(event.old_value(), Some(&Value::Int(0)));
    assert_eq!(event.new_value(), Some(&Value::Int(7)));
    assert_eq!(event.record()["quantity"], 7);
    let source = event.source_as::<Widget>().expect("widget source");
    assert!(Arc::ptr_eq(&source, &widget));
}

#[tokio::test]
async fn test_setting_equal_value_publishes_nothing() {
    // GIVEN an owned widget
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    let events = record_events(&repo);

    // WHEN the same value is written again
    let changed = widget.set_name("gear").unwrap();

    // THEN nothing is reported to anyone
    assert!(!changed);
    assert!(events.lock().is_empty());
    assert_eq!(storage.seen_for(widget.id()), vec![ChangeKind::Added]);
}

#[tokio::test]
async fn test_backend_sees_change_before_application() {
    // GIVEN an application handler that inspects the backend log
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let storage = Arc::clone(&storage);
        let observed = Arc::clone(&observed);
        repo.model_changed().subscribe(move |event| {
            let backend_has_it = storage.seen_for(event.source_id()).contains(&event.kind());
            observed.lock().push(backend_has_it);
        });
    }

    // WHEN changes happen
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    widget.set_sku("G-2").unwrap();

    // THEN the backend had every event first
    assert_eq!(*observed.lock(), vec![true, true]);
}

#[tokio::test]
async fn test_indexes_are_current_inside_handlers() {
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let widgets = repo.set::<Widget>().unwrap();
    widgets.add_index(Widget::SKU);
    let found = Arc::new(Mutex::new(Vec::new()));
    {
        let widgets = Arc::clone(&widgets);
        let found = Arc::clone(&found);
        repo.model_changed().subscribe(move |event| {
            if event.is_change_of::<Widget>("sku") {
                let sku = event.new_value().and_then(|v| v.as_str()).unwrap_or_default();
                let hit = widgets.find_by_index(&Widget::SKU, sku).ok().flatten();
                found.lock().push(hit.map(|w| w.id()));
            }
        });
    }

    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    widget.set_sku("G-2").unwrap();

    assert_eq!(*found.lock(), vec![Some(widget.id())]);
}

#[tokio::test]
async fn test_removed_object_writes_silently() {
    // GIVEN a widget that was removed
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();
    repo.remove(&*widget).unwrap();
    let events = record_events(&repo);

    // WHEN it is changed afterwards
    let changed = widget.set_name("renamed").unwrap();

    // THEN the write lands but nobody hears about it
    assert!(changed);
    assert_eq!(widget.name(), "renamed");
    assert!(!widget.base().is_attached());
    assert!(events.lock().is_empty());

    // AND it cannot be added back
    let again = repo.add_shared(Arc::clone(&widget));
    assert!(matches!(again, Err(RepositoryError::OwnerAlreadySet { .. })));
}

#[tokio::test]
async fn test_unowned_object_writes_silently() {
    let widget = Widget::new("loose", "L-1");

    assert!(widget.set_sku("L-2").unwrap());
    assert_eq!(widget.sku(), "L-2");
    assert!(!widget.base().is_attached());
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    let count = Arc::new(Mutex::new(0usize));
    let id = {
        let count = Arc::clone(&count);
        repo.model_changed().subscribe(move |_| *count.lock() += 1)
    };

    repo.add(Widget::new("a", "A")).unwrap();
    assert!(repo.model_changed().unsubscribe(id));
    repo.add(Widget::new("b", "B")).unwrap();

    assert_eq!(*count.lock(), 1);
    assert!(!repo.model_changed().unsubscribe(id));
}

#[tokio::test]
async fn test_handler_may_write_to_the_repository() {
    // GIVEN a handler that stamps every new widget's quantity
    let storage = TestStorage::new();
    let repo = ready_repository(&storage, RepositoryOptions::default()).await;
    repo.model_changed().subscribe(|event| {
        if event.kind() == ChangeKind::Added {
            if let Some(widget) = event.source_as::<Widget>() {
                widget.set_quantity(1).unwrap();
            }
        }
    });

    // WHEN a widget is added
    let widget = repo.add(Widget::new("gear", "G-1")).unwrap();

    // THEN the nested write went through and was published
    assert_eq!(widget.quantity(), 1);
    assert_eq!(
        storage.seen_for(widget.id()),
        vec![ChangeKind::Added, ChangeKind::PropertyChanged]
    );
}
