use kmsync_core::{
    BroadcastAction, BroadcastBus, BroadcastMessage, EntityKind, EntityRecord, RecordKey,
    Subscription,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn entry(tag: &str, message: &BroadcastMessage) -> String {
    format!("{tag}:{}:{}:{}", message.kind(), message.action().as_str(), message.id())
}

#[test]
fn publish_inside_handler_is_delivered_after_current_message() {
    let bus = BroadcastBus::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let weak = bus.downgrade();
    let first_log = Arc::clone(&log);
    let _projects = bus.subscribe(EntityKind::ResearchProject, move |message: &BroadcastMessage| {
        first_log.lock().unwrap().push(entry("first", message));
        if message.action() == BroadcastAction::Delete {
            if let Some(bus) = weak.upgrade() {
                bus.publish_upsert(EntityRecord::with_id(EntityKind::Note, "n1"));
            }
        }
    });
    let second_log = Arc::clone(&log);
    let _projects_too =
        bus.subscribe(EntityKind::ResearchProject, move |message: &BroadcastMessage| {
            second_log.lock().unwrap().push(entry("second", message));
        });
    let note_log = Arc::clone(&log);
    let _notes = bus.subscribe(EntityKind::Note, move |message: &BroadcastMessage| {
        note_log.lock().unwrap().push(entry("note", message));
    });

    bus.publish_delete(RecordKey::new(EntityKind::ResearchProject, "s1"));

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first:research_project:delete:s1",
            "second:research_project:delete:s1",
            "note:note:upsert:n1",
        ]
    );
    assert_eq!(bus.delivered_count(), 2);
}

#[test]
fn subscriber_added_during_delivery_sees_only_later_messages() {
    let bus = BroadcastBus::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let late: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

    let weak = bus.downgrade();
    let late_slot = Arc::clone(&late);
    let late_log = Arc::clone(&log);
    let _opener = bus.subscribe_to(
        EntityKind::Review,
        BroadcastAction::Upsert,
        move |_message: &BroadcastMessage| {
            let mut slot = late_slot.lock().unwrap();
            if !slot.is_empty() {
                return;
            }
            if let Some(bus) = weak.upgrade() {
                let sink = Arc::clone(&late_log);
                slot.push(bus.subscribe(EntityKind::Review, move |message: &BroadcastMessage| {
                    sink.lock().unwrap().push(entry("late", message));
                }));
            }
        },
    );

    bus.publish_upsert(EntityRecord::with_id(EntityKind::Review, "r1"));
    assert!(log.lock().unwrap().is_empty());

    bus.publish_upsert(EntityRecord::with_id(EntityKind::Review, "r2"));
    assert_eq!(*log.lock().unwrap(), vec!["late:review:upsert:r2"]);
    assert_eq!(bus.subscriber_count(), 2);
}

#[test]
fn explicit_unsubscribe_stops_delivery() {
    let bus = BroadcastBus::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let subscription = bus.subscribe(EntityKind::LibraryItem, move |message: &BroadcastMessage| {
        sink.lock().unwrap().push(entry("view", message));
    });

    bus.publish_delete(RecordKey::new(EntityKind::LibraryItem, "p1"));
    subscription.unsubscribe();
    bus.publish_delete(RecordKey::new(EntityKind::LibraryItem, "p2"));

    assert_eq!(*log.lock().unwrap(), vec!["view:library_item:delete:p1"]);
    assert_eq!(bus.subscriber_count(), 0);
}

#[test]
fn panicking_handler_does_not_wedge_the_bus() {
    let bus = BroadcastBus::new();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let _faulty = bus.subscribe(EntityKind::Note, |message: &BroadcastMessage| {
        if message.id() == "boom" {
            panic!("handler failure");
        }
    });
    let sink = Arc::clone(&log);
    let _view = bus.subscribe(EntityKind::Note, move |message: &BroadcastMessage| {
        sink.lock().unwrap().push(entry("view", message));
    });

    let result = catch_unwind(AssertUnwindSafe(|| {
        bus.publish_delete(RecordKey::new(EntityKind::Note, "boom"));
    }));
    assert!(result.is_err());

    bus.publish_delete(RecordKey::new(EntityKind::Note, "n2"));
    assert_eq!(*log.lock().unwrap(), vec!["view:note:delete:n2"]);
}

#[test]
fn clones_share_one_subscriber_set() {
    let bus = BroadcastBus::new();
    let clone = bus.clone();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _view = clone.subscribe(EntityKind::Review, move |message: &BroadcastMessage| {
        sink.lock().unwrap().push(entry("view", message));
    });

    bus.publish_upsert(EntityRecord::with_id(EntityKind::Review, "r1"));
    assert_eq!(log.lock().unwrap().len(), 1);
}
