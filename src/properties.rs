//! Observable property bags.
//!
//! A thin convenience layer over the core: a bag of named value slots
//! whose mutators report their own changes through the owning
//! dispatcher's notifier. It holds no invariants of its own.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::notifier::Notifier;
use crate::record::ChangeDraft;
use crate::value::FieldValue;

/// An observable bag of named [`FieldValue`] slots.
///
/// Assignments compare old and new values with
/// [`FieldValue::same_value`], so re-assigning an identical value (with
/// `NaN` identical to itself and the two zeros distinct) notifies nothing.
/// Actual changes notify `"updated"` records carrying `name` and
/// `oldValue`; first assignments notify `"added"`, removals `"deleted"`.
///
/// ```ignore
/// let bag = PropertyMap::new(&dispatcher);
/// dispatcher.observe(&bag, &observer);
/// bag.set("x", 1);            // queues {type: "added", name: "x"}
/// bag.set("x", 2);            // queues {type: "updated", name: "x", oldValue: 1}
/// bag.set("x", 2);            // queues nothing
/// ```
pub struct PropertyMap {
    dispatcher: Dispatcher,
    /// Self-handle: the bag itself is the observable object, so its
    /// mutators need the owning `Arc` to reach the right notifier.
    handle: Weak<PropertyMap>,
    slots: Mutex<BTreeMap<String, FieldValue>>,
}

impl PropertyMap {
    /// Creates an empty bag observed through `dispatcher`.
    ///
    /// Returned behind an `Arc` because the bag itself is the observable
    /// object: pass the `Arc` to [`Dispatcher::observe`] and friends.
    pub fn new(dispatcher: &Dispatcher) -> Arc<Self> {
        Arc::new_cyclic(|handle| Self {
            dispatcher: dispatcher.clone(),
            handle: handle.clone(),
            slots: Mutex::new(BTreeMap::new()),
        })
    }

    fn notifier(&self) -> Option<Notifier> {
        let this = self.handle.upgrade()?;
        Some(self.dispatcher.notifier(&this))
    }

    /// Current value of the named slot.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.slots.lock().get(name).cloned()
    }

    /// Whether the named slot exists.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Assigns a slot, notifying observers only when the value actually
    /// changes under [`FieldValue::same_value`].
    pub fn set(&self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        let previous = {
            let mut slots = self.slots.lock();
            slots.insert(name.to_string(), value.clone())
        };
        let Some(notifier) = self.notifier() else {
            return;
        };
        match previous {
            Some(old) if old.same_value(&value) => {}
            Some(old) => {
                notifier.notify(
                    &ChangeDraft::new("updated")
                        .field("name", name)
                        .field("oldValue", old),
                );
            }
            None => {
                notifier.notify(&ChangeDraft::new("added").field("name", name));
            }
        }
    }

    /// Removes a slot, notifying `"deleted"` if it existed.
    pub fn remove(&self, name: &str) {
        let previous = self.slots.lock().remove(name);
        let Some(notifier) = self.notifier() else {
            return;
        };
        if let Some(old) = previous {
            notifier.notify(
                &ChangeDraft::new("deleted")
                    .field("name", name)
                    .field("oldValue", old),
            );
        }
    }
}

impl std::fmt::Debug for PropertyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyMap")
            .field("slots", &*self.slots.lock())
            .finish_non_exhaustive()
    }
}
