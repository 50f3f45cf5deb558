//! Observer callbacks, accept lists, and the process-wide observer table.

use std::fmt;
use std::sync::Arc;

use crate::error::NotifyError;
use crate::record::ChangeRecord;

type Callback = dyn Fn(&[ChangeRecord]) -> anyhow::Result<()> + Send + Sync;

/// Identity of an observer callback.
///
/// Clones of one [`Observer`] share an identity; independently constructed
/// observers are always distinct, even when built from identical closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObserverId(usize);

/// A registered change-record callback.
///
/// The engine attaches its bookkeeping (pending queue, registration count,
/// position in the delivery order) to the observer's identity, so the same
/// handle must be used for [`observe`](crate::Dispatcher::observe),
/// [`unobserve`](crate::Dispatcher::unobserve), and
/// [`deliver_change_records`](crate::Dispatcher::deliver_change_records).
/// Clone it freely: clones refer to the same callback.
///
/// The callback receives each pending batch as a single slice, in notify
/// order. Errors it returns (and panics it raises) are contained at the
/// delivery site and never reach the code that triggered the notification.
#[derive(Clone)]
pub struct Observer {
    callback: Arc<Callback>,
}

impl Observer {
    /// Wraps an infallible callback.
    pub fn new(f: impl Fn(&[ChangeRecord]) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(move |records: &[ChangeRecord]| {
                f(records);
                Ok(())
            }),
        }
    }

    /// Wraps a callback that may fail.
    ///
    /// A returned error is logged and discarded by the delivery site; it
    /// does not interrupt delivery to other observers.
    pub fn fallible(
        f: impl Fn(&[ChangeRecord]) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Arc::new(f),
        }
    }

    pub(crate) fn id(&self) -> ObserverId {
        ObserverId(Arc::as_ptr(&self.callback) as *const () as usize)
    }

    pub(crate) fn invoke(&self, batch: &[ChangeRecord]) -> anyhow::Result<()> {
        (self.callback)(batch)
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Observer {}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observer").field(&self.id()).finish()
    }
}

/// Allow-list of change types an observer entry admits.
///
/// An accept list must name at least one type. Duplicates are dropped,
/// preserving first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptList {
    types: Vec<String>,
}

impl AcceptList {
    /// Builds an accept list from a sequence of change-type strings.
    ///
    /// # Errors
    ///
    /// [`NotifyError::InvalidArgument`] if the sequence is empty.
    pub fn new<I, S>(types: I) -> Result<Self, NotifyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for change_type in types {
            let change_type = change_type.into();
            if !out.contains(&change_type) {
                out.push(change_type);
            }
        }
        if out.is_empty() {
            return Err(NotifyError::invalid(
                "accept list must contain at least one change type",
            ));
        }
        Ok(Self { types: out })
    }

    /// Whether `change_type` is named by this list.
    pub fn contains(&self, change_type: &str) -> bool {
        self.types.iter().any(|t| t == change_type)
    }

    /// The listed types, in first-occurrence order.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }
}

/// One callback's slot in the process-wide table.
pub(crate) struct ObserverSlot {
    pub observer: Observer,
    /// FIFO of undelivered records, cleared atomically at delivery.
    pub pending: Vec<ChangeRecord>,
    /// How many notifiers currently hold an entry for this callback.
    pub registrations: usize,
}

/// Process-wide, insertion-ordered table of callbacks that hold at least
/// one active registration or one undelivered batch.
///
/// The scheduled flush walks this table in first-registration order, which
/// is what makes cross-object delivery order deterministic. A slot is
/// dropped exactly when its registration count is zero and its queue is
/// empty, never merely because a batch was delivered.
pub(crate) struct ObserverTable {
    slots: Vec<ObserverSlot>,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn position(&self, id: ObserverId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.observer.id() == id)
    }

    fn ensure(&mut self, observer: &Observer) -> &mut ObserverSlot {
        let index = match self.position(observer.id()) {
            Some(index) => index,
            None => {
                self.slots.push(ObserverSlot {
                    observer: observer.clone(),
                    pending: Vec::new(),
                    registrations: 0,
                });
                self.slots.len() - 1
            }
        };
        &mut self.slots[index]
    }

    /// Appends a record to the callback's pending queue, registering the
    /// callback if it is not yet present.
    pub fn enqueue(&mut self, observer: &Observer, record: ChangeRecord) {
        self.ensure(observer).pending.push(record);
    }

    /// Atomically snapshots and clears the callback's pending queue.
    ///
    /// Returns the observer handle alongside the batch so the caller can
    /// invoke it after releasing the table lock.
    pub fn take_pending(&mut self, id: ObserverId) -> Option<(Observer, Vec<ChangeRecord>)> {
        let index = self.position(id)?;
        let slot = &mut self.slots[index];
        if slot.pending.is_empty() {
            return None;
        }
        Some((slot.observer.clone(), std::mem::take(&mut slot.pending)))
    }

    /// Records that one more notifier holds an entry for this callback.
    pub fn add_registration(&mut self, observer: &Observer) {
        self.ensure(observer).registrations += 1;
    }

    /// Records that one notifier dropped its entry for this callback.
    pub fn release_registration(&mut self, id: ObserverId) {
        if let Some(index) = self.position(id) {
            let slot = &mut self.slots[index];
            slot.registrations = slot.registrations.saturating_sub(1);
        }
    }

    /// Drops the slot if it holds neither registrations nor pending work.
    pub fn cleanup(&mut self, id: ObserverId) {
        if let Some(index) = self.position(id) {
            let slot = &self.slots[index];
            if slot.registrations == 0 && slot.pending.is_empty() {
                self.slots.remove(index);
            }
        }
    }

    /// Registration-order snapshot of the current membership, taken at the
    /// start of a flush pass so that observers added or removed while the
    /// pass runs do not affect it.
    pub fn snapshot_ids(&self) -> Vec<ObserverId> {
        self.slots.iter().map(|slot| slot.observer.id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_but_new_observers_do_not() {
        let a = Observer::new(|_| {});
        let b = a.clone();
        let c = Observer::new(|_| {});
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn accept_list_rejects_empty_input() {
        let err = AcceptList::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, NotifyError::InvalidArgument { .. }));
    }

    #[test]
    fn accept_list_dedupes_preserving_order() {
        let list = AcceptList::new(["updated", "deleted", "updated"]).unwrap();
        assert_eq!(list.types(), ["updated".to_string(), "deleted".to_string()]);
        assert!(list.contains("deleted"));
        assert!(!list.contains("added"));
    }

    #[test]
    fn slot_survives_delivery_while_registered() {
        let mut table = ObserverTable::new();
        let observer = Observer::new(|_| {});
        table.add_registration(&observer);

        assert!(table.take_pending(observer.id()).is_none());
        table.cleanup(observer.id());
        assert_eq!(table.snapshot_ids(), vec![observer.id()]);

        table.release_registration(observer.id());
        table.cleanup(observer.id());
        assert!(table.snapshot_ids().is_empty());
    }

    #[test]
    fn pending_batch_retains_an_unregistered_slot() {
        let mut table = ObserverTable::new();
        let observer = Observer::new(|_| {});
        table.add_registration(&observer);
        table.enqueue(
            &observer,
            crate::record::ChangeRecord::seal(
                &crate::record::ChangeDraft::new("updated"),
                std::sync::Arc::new(()),
            ),
        );
        table.release_registration(observer.id());
        table.cleanup(observer.id());
        // Still queued, so still a member.
        assert_eq!(table.snapshot_ids(), vec![observer.id()]);

        let (_, batch) = table.take_pending(observer.id()).unwrap();
        assert_eq!(batch.len(), 1);
        table.cleanup(observer.id());
        assert!(table.snapshot_ids().is_empty());
    }
}
