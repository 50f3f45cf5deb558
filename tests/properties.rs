//! The observable property bag: change detection under same-value
//! semantics and the records it produces.

use std::sync::{Arc, Mutex};

use change_flow::{ChangeRecord, Dispatcher, FieldValue, Observer, PropertyMap};

fn recording_observer() -> (Observer, Arc<Mutex<Vec<Vec<ChangeRecord>>>>) {
    let batches: Arc<Mutex<Vec<Vec<ChangeRecord>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = batches.clone();
    let observer = Observer::new(move |records| {
        sink.lock().unwrap().push(records.to_vec());
    });
    (observer, batches)
}

fn delivered(batches: &Arc<Mutex<Vec<Vec<ChangeRecord>>>>) -> Vec<ChangeRecord> {
    batches.lock().unwrap().iter().flatten().cloned().collect()
}

#[test]
fn first_assignment_then_update_then_removal() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher.observe(&bag, &observer);

    bag.set("balance", 10);
    bag.set("balance", 25);
    bag.remove("balance");
    dispatcher.run_turn();

    let records = delivered(&batches);
    let kinds: Vec<&str> = records.iter().map(|r| r.change_type()).collect();
    assert_eq!(kinds, vec!["added", "updated", "deleted"]);

    assert_eq!(records[0].get("name"), Some(&FieldValue::Str("balance".into())));
    assert_eq!(records[1].get("oldValue"), Some(&FieldValue::Int(10)));
    assert_eq!(records[2].get("oldValue"), Some(&FieldValue::Int(25)));
    assert!(records.iter().all(|r| r.object_is(&bag)));

    assert_eq!(bag.get("balance"), None);
}

#[test]
fn assigning_the_same_value_notifies_nothing() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher.observe(&bag, &observer);

    bag.set("name", "ada");
    bag.set("name", "ada");
    dispatcher.run_turn();

    let records = delivered(&batches);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change_type(), "added");
    assert_eq!(bag.get("name"), Some(FieldValue::Str("ada".into())));
}

#[test]
fn nan_reassignment_is_not_a_change() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher.observe(&bag, &observer);

    bag.set("ratio", f64::NAN);
    bag.set("ratio", f64::NAN);
    dispatcher.run_turn();

    let records = delivered(&batches);
    assert_eq!(records.len(), 1, "only the first assignment notified");
    assert_eq!(records[0].change_type(), "added");
}

#[test]
fn flipping_zero_sign_is_a_change() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher.observe(&bag, &observer);

    bag.set("offset", 0.0);
    bag.set("offset", -0.0);
    dispatcher.run_turn();

    let records = delivered(&batches);
    let kinds: Vec<&str> = records.iter().map(|r| r.change_type()).collect();
    assert_eq!(kinds, vec!["added", "updated"]);
}

#[test]
fn removing_an_absent_slot_notifies_nothing() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher.observe(&bag, &observer);

    bag.remove("missing");
    dispatcher.run_turn();
    assert!(batches.lock().unwrap().is_empty());
}

#[test]
fn bag_updates_compose_with_accept_lists() {
    let dispatcher = Dispatcher::new();
    let bag = PropertyMap::new(&dispatcher);
    let (observer, batches) = recording_observer();
    dispatcher
        .observe_accepting(&bag, &observer, ["updated"])
        .unwrap();

    bag.set("x", 1); // "added": filtered out
    bag.set("x", 2); // "updated": delivered
    bag.remove("x"); // "deleted": filtered out
    dispatcher.run_turn();

    let records = delivered(&batches);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change_type(), "updated");
}
