//! Identity-keyed registry of notifier state.
//!
//! An ownership-free side table: observed objects are keyed by the address
//! of their managed allocation, and the table holds only weak references
//! back to them, so observation never keeps an object alive. Entries whose
//! object is gone are replaced on acquisition (the address may have been
//! reused by a new allocation) and pruned during flushes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::notifier::{NotifierState, ObserverEntry};

/// Identity of an observed allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectId(usize);

impl ObjectId {
    pub fn of<T: ?Sized>(target: &Arc<T>) -> Self {
        ObjectId(Arc::as_ptr(target) as *const () as usize)
    }
}

pub(crate) struct IdentityRegistry {
    map: HashMap<ObjectId, Arc<NotifierState>, ahash::RandomState>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            map: HashMap::default(),
        }
    }

    /// Memoized acquisition: the same live object always yields the same
    /// state. A stale slot — its object dropped, the address since reused —
    /// is replaced; the stale slot's observer entries are returned so the
    /// caller can release their registration counts.
    pub fn acquire(
        &mut self,
        id: ObjectId,
        target: &Arc<dyn Any + Send + Sync>,
    ) -> (Arc<NotifierState>, Vec<ObserverEntry>) {
        let mut released = Vec::new();
        if let Some(state) = self.map.get(&id) {
            if state.target.strong_count() > 0 {
                return (state.clone(), released);
            }
            released.extend(state.entries.lock().drain(..));
        }
        let state = Arc::new(NotifierState::new(target));
        self.map.insert(id, state.clone());
        (state, released)
    }

    /// Looks up the state for a live object, if any. A stale slot under
    /// the same address belongs to a previous occupant and never matches.
    pub fn get(&self, id: ObjectId) -> Option<Arc<NotifierState>> {
        self.map
            .get(&id)
            .filter(|state| state.target.strong_count() > 0)
            .cloned()
    }

    /// Drops every slot whose object is gone, returning their observer
    /// entries so the caller can release the registration counts.
    pub fn prune_dead(&mut self) -> Vec<ObserverEntry> {
        let mut released = Vec::new();
        self.map.retain(|_, state| {
            if state.target.strong_count() > 0 {
                true
            } else {
                released.extend(state.entries.lock().drain(..));
                false
            }
        });
        released
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
