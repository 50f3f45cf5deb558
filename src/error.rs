//! Error types for the notification engine.

use thiserror::Error;

/// Errors raised synchronously at the public API boundary.
///
/// `InvalidArgument` is the only user-visible failure kind: it is raised by
/// the call that violates a contract and is never deferred into delivery.
/// A call that returns it has made no state change at all.
///
/// Failures inside observer callbacks are a separate, contained kind: they
/// are caught at the delivery site, logged, and discarded (see
/// [`Dispatcher::deliver_change_records`](crate::Dispatcher::deliver_change_records)),
/// so they never surface through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// An argument had the wrong shape at a public boundary.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What the caller got wrong.
        reason: String,
    },
}

impl NotifyError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        NotifyError::InvalidArgument {
            reason: reason.into(),
        }
    }
}
