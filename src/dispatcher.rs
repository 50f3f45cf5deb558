//! The dispatcher: the single owned instance holding all routing state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::NotifyError;
use crate::notifier::{Notifier, ObserverEntry};
use crate::observer::{AcceptList, Observer, ObserverId, ObserverTable};
use crate::record::ChangeRecord;
use crate::registry::{IdentityRegistry, ObjectId};
use crate::scheduler::{ScheduleSoon, TaskHandle, TurnQueue};

/// Engine internals shared by the dispatcher and every notifier handle.
///
/// Lock order, where multiple locks are held: `registry` → notifier entry
/// list → `observers` → `armed`. No lock is ever held across an observer
/// callback invocation, since a callback may re-enter any public
/// operation.
pub(crate) struct Shared {
    registry: Mutex<IdentityRegistry>,
    observers: Mutex<ObserverTable>,
    timer: Arc<dyn ScheduleSoon>,
    /// The single not-yet-fired flush, if one is armed.
    armed: Mutex<Option<TaskHandle>>,
    /// Handed to flush tasks so a queued flush does not keep the engine
    /// alive on its own.
    self_ref: Weak<Shared>,
}

impl Shared {
    fn new(timer: Arc<dyn ScheduleSoon>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry: Mutex::new(IdentityRegistry::new()),
            observers: Mutex::new(ObserverTable::new()),
            timer,
            armed: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Appends `record` to each admitted observer's queue and re-arms the
    /// flush. Called by [`Notifier::notify`].
    pub(crate) fn enqueue_and_arm(&self, admitted: &[Observer], record: ChangeRecord) {
        {
            let mut observers = self.observers.lock();
            for observer in admitted {
                observers.enqueue(observer, record.clone());
            }
        }
        self.arm_flush();
    }

    /// Cancel-and-reschedule arming: a prior unfired flush is superseded,
    /// so a burst of notifications in one turn yields exactly one flush.
    fn arm_flush(&self) {
        let weak = self.self_ref.clone();
        let task: Box<dyn FnOnce() + Send> = Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.flush();
            }
        });
        let mut armed = self.armed.lock();
        if let Some(previous) = armed.take() {
            self.timer.cancel(previous);
        }
        *armed = Some(self.timer.schedule(task));
    }

    /// One scheduled delivery pass: prune dead objects, then deliver each
    /// snapshotted observer's pending batch, in first-registration order.
    ///
    /// The pass walks a snapshot of the current membership; observers and
    /// records produced by callbacks during the pass surface on the next
    /// flush, never this one.
    fn flush(&self) {
        let _ = self.armed.lock().take();

        let released = self.registry.lock().prune_dead();
        self.release_entries(released);

        let ids = self.observers.lock().snapshot_ids();
        for id in ids {
            self.deliver_one(id);
        }
    }

    /// Single-batch delivery step shared by the scheduled flush and the
    /// manual drain: snapshot-and-clear the queue, invoke the callback
    /// once with the whole batch, contain any failure, then clean up.
    ///
    /// Returns whether a batch was delivered.
    pub(crate) fn deliver_one(&self, id: ObserverId) -> bool {
        let Some((observer, batch)) = self.observers.lock().take_pending(id) else {
            return false;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.invoke(&batch)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(%error, dropped = batch.len(), "observer callback failed; batch discarded");
            }
            Err(_) => {
                tracing::warn!(dropped = batch.len(), "observer callback panicked; batch discarded");
            }
        }
        self.observers.lock().cleanup(id);
        true
    }

    /// Releases the registration counts of entries evicted by the
    /// registry (their object was dropped).
    fn release_entries(&self, released: Vec<ObserverEntry>) {
        if released.is_empty() {
            return;
        }
        tracing::debug!(count = released.len(), "released registrations of dropped observables");
        let mut observers = self.observers.lock();
        for entry in released {
            let id = entry.observer.id();
            observers.release_registration(id);
            observers.cleanup(id);
        }
    }
}

// ============================================================================
// Public surface
// ============================================================================

/// The notification engine.
///
/// One dispatcher owns the whole dispatch table for its objects: the
/// identity-keyed notifier registry, the process-wide observer table with
/// per-callback pending queues, and the debounced flush timer. All
/// mutation of that state goes through the operations below; there is no
/// global instance — construct one and share it (cloning is cheap, clones
/// are the same engine).
///
/// # Delivery model
///
/// Mutation is synchronous, delivery is deferred: `notify` only enqueues
/// and (re)arms the flush. With [`Dispatcher::new`] the flush runs when
/// the embedder pumps [`run_turn`](Dispatcher::run_turn); with
/// [`Dispatcher::with_timer`] it runs wherever the supplied timer runs its
/// tasks. [`deliver_change_records`](Dispatcher::deliver_change_records)
/// drains one callback synchronously, on demand.
pub struct Dispatcher {
    shared: Arc<Shared>,
    /// The built-in cooperative queue, when `new()` constructed us.
    turn: Option<Arc<TurnQueue>>,
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            turn: self.turn.clone(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher backed by the built-in cooperative
    /// [`TurnQueue`]; pump it with [`run_turn`](Dispatcher::run_turn).
    pub fn new() -> Self {
        let queue = Arc::new(TurnQueue::new());
        Self {
            shared: Shared::new(queue.clone()),
            turn: Some(queue),
        }
    }

    /// Creates a dispatcher that defers flushes through `timer`.
    pub fn with_timer(timer: Arc<dyn ScheduleSoon>) -> Self {
        Self {
            shared: Shared::new(timer),
            turn: None,
        }
    }

    /// Returns the notifier for `target`, creating it on first call.
    ///
    /// Memoized and idempotent: the same object always yields the same
    /// notifier (handles compare equal). Acquiring a notifier associates
    /// no strong reference with the object.
    pub fn notifier<T: Send + Sync + 'static>(&self, target: &Arc<T>) -> Notifier {
        let erased: Arc<dyn Any + Send + Sync> = target.clone();
        let id = ObjectId::of(&erased);
        let (state, stale) = self.shared.registry.lock().acquire(id, &erased);
        self.shared.release_entries(stale);
        Notifier::new(state, self.shared.clone())
    }

    /// Registers `observer` against `target`, admitting every change type.
    ///
    /// Re-observing with the same observer replaces its accept list (here:
    /// clears it) rather than adding a second registration, so one change
    /// still produces one record for it.
    pub fn observe<T: Send + Sync + 'static>(&self, target: &Arc<T>, observer: &Observer) {
        self.observe_entry(target, observer, None);
    }

    /// Registers `observer` against `target`, restricted to the change
    /// types in `accept`.
    ///
    /// # Errors
    ///
    /// [`NotifyError::InvalidArgument`] if `accept` is empty. The error is
    /// raised before any state changes.
    pub fn observe_accepting<T, I, S>(
        &self,
        target: &Arc<T>,
        observer: &Observer,
        accept: I,
    ) -> Result<(), NotifyError>
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accept = AcceptList::new(accept)?;
        self.observe_entry(target, observer, Some(accept));
        Ok(())
    }

    fn observe_entry<T: Send + Sync + 'static>(
        &self,
        target: &Arc<T>,
        observer: &Observer,
        accept: Option<AcceptList>,
    ) {
        let erased: Arc<dyn Any + Send + Sync> = target.clone();
        let id = ObjectId::of(&erased);
        let (state, stale) = self.shared.registry.lock().acquire(id, &erased);
        self.shared.release_entries(stale);

        let is_new = {
            let mut entries = state.entries.lock();
            match entries.iter_mut().find(|entry| entry.observer == *observer) {
                Some(entry) => {
                    // Re-observe: update the filter, do not duplicate.
                    entry.accept = accept;
                    false
                }
                None => {
                    entries.push(ObserverEntry {
                        observer: observer.clone(),
                        accept,
                    });
                    true
                }
            }
        };
        if is_new {
            self.shared.observers.lock().add_registration(observer);
        }
    }

    /// Removes `observer`'s registration against `target`, if any.
    ///
    /// Records already queued before this call stay queued and will still
    /// be delivered; records notified after it never reach the observer.
    /// Silently a no-op when no matching registration exists.
    pub fn unobserve<T: Send + Sync + 'static>(&self, target: &Arc<T>, observer: &Observer) {
        let id = ObjectId::of(target);
        let Some(state) = self.shared.registry.lock().get(id) else {
            return;
        };
        let removed = {
            let mut entries = state.entries.lock();
            let before = entries.len();
            entries.retain(|entry| entry.observer != *observer);
            before != entries.len()
        };
        if removed {
            let mut observers = self.shared.observers.lock();
            observers.release_registration(observer.id());
            observers.cleanup(observer.id());
        }
    }

    /// Synchronously drains `observer`'s pending records.
    ///
    /// Repeats the single-batch delivery step until the queue stays empty,
    /// which covers callbacks that re-notify themselves from within their
    /// own delivery. A callback with nothing pending is a no-op, not an
    /// error. Failures raised by the callback are contained here: logged,
    /// discarded, never propagated.
    pub fn deliver_change_records(&self, observer: &Observer) {
        while self.shared.deliver_one(observer.id()) {}
    }

    /// Pumps the built-in cooperative queue for one turn, running any
    /// armed flush. Returns whether anything ran.
    ///
    /// No-op (returns `false`) on a dispatcher constructed with a custom
    /// timer; that timer's host runs the flush instead.
    pub fn run_turn(&self) -> bool {
        match &self.turn {
            Some(queue) => queue.run_turn(),
            None => false,
        }
    }
}
