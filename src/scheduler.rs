//! Deferred-delivery scheduling.
//!
//! The engine never delivers from inside [`notify`](crate::Notifier::notify);
//! it arms a timer instead. The timer contract is deliberately thin — run a
//! task once, soon, cancelable — so embedders can supply whatever deferral
//! primitive their host environment has. [`TurnQueue`] is the built-in
//! cooperative implementation used by [`Dispatcher::new`](crate::Dispatcher::new).

use parking_lot::Mutex;
use slab::Slab;

/// A deferred task: runs once, soon, unless cancelled first.
pub type Task = Box<dyn FnOnce() + Send>;

/// Opaque cancellation handle returned by [`ScheduleSoon::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(usize);

/// Contract for the deferral collaborator.
///
/// `schedule` must run the task once, asynchronously, after the current
/// synchronous execution unwinds. `cancel` must be a no-op when the task
/// has already run or the handle is unknown.
pub trait ScheduleSoon: Send + Sync {
    /// Queues `task` to run once, soon.
    fn schedule(&self, task: Task) -> TaskHandle;

    /// Revokes a queued task. No-op if it already ran.
    fn cancel(&self, handle: TaskHandle);
}

struct TurnQueueInner {
    tasks: Slab<Task>,
    order: Vec<usize>,
}

/// Cooperative task queue.
///
/// The embedder pumps it with [`run_turn`](TurnQueue::run_turn) once the
/// current unit of synchronous work is done; that call is the turn
/// boundary. Tasks scheduled while a turn is running — for example by an
/// observer callback raising fresh notifications — wait for the next turn,
/// so an in-flight delivery pass is never extended retroactively.
pub struct TurnQueue {
    inner: Mutex<TurnQueueInner>,
}

impl TurnQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TurnQueueInner {
                tasks: Slab::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Runs the tasks that were queued before this call, in schedule order.
    ///
    /// Returns whether any task ran.
    pub fn run_turn(&self) -> bool {
        let keys = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.order)
        };
        let mut ran = false;
        for key in keys {
            // A slot cancelled mid-turn vanishes here.
            let task = {
                let mut inner = self.inner.lock();
                inner.tasks.try_remove(key)
            };
            if let Some(task) = task {
                task();
                ran = true;
            }
        }
        ran
    }

    /// Whether nothing is queued for the next turn.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleSoon for TurnQueue {
    fn schedule(&self, task: Task) -> TaskHandle {
        let mut inner = self.inner.lock();
        let key = inner.tasks.insert(task);
        inner.order.push(key);
        TaskHandle(key)
    }

    fn cancel(&self, handle: TaskHandle) {
        let mut inner = self.inner.lock();
        if inner.tasks.try_remove(handle.0).is_some() {
            // Keep the key out of the order list so the slab can reuse it
            // without the stale position firing the replacement early.
            inner.order.retain(|key| *key != handle.0);
        }
    }
}
