//! Per-object notifiers: change reporting and transaction spans.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::dispatcher::Shared;
use crate::observer::{AcceptList, Observer};
use crate::record::{ChangeDraft, ChangeRecord};

/// One observer's registration against a notifier.
pub(crate) struct ObserverEntry {
    pub observer: Observer,
    /// `None` admits every change type.
    pub accept: Option<AcceptList>,
}

/// Shared per-object state, owned by the identity registry and referenced
/// by every [`Notifier`] handle for the same object.
pub(crate) struct NotifierState {
    /// Back-reference to the observed object; never an ownership edge.
    pub target: Weak<dyn Any + Send + Sync>,
    /// Registered observers, in arrival order, at most one per callback.
    pub entries: Mutex<Vec<ObserverEntry>>,
    /// Open `perform_change` spans, counted per change type.
    active: Mutex<HashMap<String, usize, ahash::RandomState>>,
}

impl NotifierState {
    pub fn new(target: &Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            target: Arc::downgrade(target),
            entries: Mutex::new(Vec::new()),
            active: Mutex::new(HashMap::default()),
        }
    }
}

/// Admission filter: decides whether a record of `change_type` reaches an
/// entry, given the notifier's currently open `perform_change` spans.
///
/// An entry without an accept list admits everything. An entry with one is
/// denied outright while any listed type has an open span (a transaction's
/// internal mutations must not self-notify the observers filtering on it);
/// otherwise it admits the record only if its type is listed. A type absent
/// from a non-empty accept list is dropped silently, not an error.
fn should_deliver(
    accept: Option<&AcceptList>,
    change_type: &str,
    active: &HashMap<String, usize, ahash::RandomState>,
) -> bool {
    let Some(accept) = accept else {
        return true;
    };
    if accept
        .iter()
        .any(|listed| active.get(listed).is_some_and(|count| *count > 0))
    {
        return false;
    }
    accept.contains(change_type)
}

/// Decrements an active-change counter on scope exit, including unwinding,
/// so a `perform_change` body that panics still restores the counter
/// before the panic reaches the caller.
struct ActiveChangeGuard<'a> {
    state: &'a NotifierState,
    change_type: &'a str,
}

impl Drop for ActiveChangeGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.state.active.lock();
        if let Some(count) = active.get_mut(self.change_type) {
            *count -= 1;
            if *count == 0 {
                active.remove(self.change_type);
            }
        }
    }
}

/// The per-object handle through which changes are reported.
///
/// Obtained from [`Dispatcher::notifier`](crate::Dispatcher::notifier);
/// the same object always yields the same notifier (handles compare equal
/// and share state). Cloning is cheap.
///
/// A notifier holds only a weak reference to its object. Once the object
/// is dropped the notifier is torn down: [`notify`](Notifier::notify)
/// returns quietly and [`perform_change`](Notifier::perform_change)
/// returns `None` without invoking its body.
#[derive(Clone)]
pub struct Notifier {
    state: Arc<NotifierState>,
    shared: Arc<Shared>,
}

impl Notifier {
    pub(crate) fn new(state: Arc<NotifierState>, shared: Arc<Shared>) -> Self {
        Self { state, shared }
    }

    /// Reports one change against this notifier's object.
    ///
    /// The draft is borrowed: its fields are copied into a sealed,
    /// immutable [`ChangeRecord`] whose `object` is pinned to the observed
    /// target, so the caller may reuse the draft afterwards. The record is
    /// appended to the pending queue of every observer the admission
    /// filter admits, and the delivery flush is re-armed — any number of
    /// notifications within one turn coalesce into a single flush.
    ///
    /// With no registered observers this returns without allocating.
    /// On a torn-down notifier it returns without effect.
    pub fn notify(&self, draft: &ChangeDraft) {
        let Some(target) = self.state.target.upgrade() else {
            return;
        };
        let admitted: Vec<Observer> = {
            let entries = self.state.entries.lock();
            if entries.is_empty() {
                return;
            }
            let active = self.state.active.lock();
            entries
                .iter()
                .filter(|entry| should_deliver(entry.accept.as_ref(), draft.change_type(), &active))
                .map(|entry| entry.observer.clone())
                .collect()
        };
        if admitted.is_empty() {
            return;
        }
        let record = ChangeRecord::seal(draft, target);
        self.shared.enqueue_and_arm(&admitted, record);
    }

    /// Runs `f` inside an active-change span for `change_type`.
    ///
    /// While the span is open, observers whose accept list names
    /// `change_type` receive none of this notifier's records (see the
    /// admission rule on [`notify`](Notifier::notify)). Spans nest: the
    /// span is a counter, not a flag, so re-entrant calls for the same
    /// type compose. The counter is restored on every exit path; if `f`
    /// panics, the panic propagates to the caller after the restore.
    ///
    /// Returns `None` without invoking `f` when the notifier's object is
    /// already gone.
    pub fn perform_change<R>(&self, change_type: &str, f: impl FnOnce() -> R) -> Option<R> {
        if self.state.target.strong_count() == 0 {
            return None;
        }
        {
            let mut active = self.state.active.lock();
            *active.entry(change_type.to_string()).or_insert(0) += 1;
        }
        let _guard = ActiveChangeGuard {
            state: &*self.state,
            change_type,
        };
        Some(f())
    }

    /// Whether this notifier's object is `target`.
    pub fn target_is<T: Send + Sync + 'static>(&self, target: &Arc<T>) -> bool {
        self.state
            .target
            .upgrade()
            .is_some_and(|object| Arc::as_ptr(&object) as *const () == Arc::as_ptr(target) as *const ())
    }
}

impl PartialEq for Notifier {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Notifier {}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("alive", &(self.state.target.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_with(change_type: &str) -> HashMap<String, usize, ahash::RandomState> {
        let mut map: HashMap<String, usize, ahash::RandomState> = HashMap::default();
        map.insert(change_type.to_string(), 1);
        map
    }

    #[test]
    fn no_accept_list_admits_everything() {
        assert!(should_deliver(None, "deleted", &HashMap::default()));
        assert!(should_deliver(None, "deleted", &active_with("deleted")));
    }

    #[test]
    fn accept_list_admits_only_listed_types() {
        let accept = AcceptList::new(["updated"]).unwrap();
        assert!(should_deliver(Some(&accept), "updated", &HashMap::default()));
        assert!(!should_deliver(Some(&accept), "deleted", &HashMap::default()));
    }

    #[test]
    fn open_span_suppresses_listed_observers() {
        let accept = AcceptList::new(["updated", "deleted"]).unwrap();
        // Any listed type being active denies the whole entry.
        assert!(!should_deliver(Some(&accept), "updated", &active_with("deleted")));
        assert!(!should_deliver(Some(&accept), "updated", &active_with("updated")));
        // A span for an unlisted type changes nothing.
        assert!(should_deliver(Some(&accept), "updated", &active_with("reconfigured")));
    }
}
