//! Change drafts and sealed change records.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::value::FieldValue;

/// Field names the engine owns. Caller-supplied values under these names
/// are discarded when a draft is sealed: `object` is always pinned to the
/// notifier's target and `type` is the record's structural type.
const RESERVED_FIELDS: [&str; 2] = ["object", "type"];

/// Caller-side description of one change, passed to
/// [`Notifier::notify`](crate::Notifier::notify).
///
/// A draft is plain data. Notifying borrows it and copies its fields into
/// the sealed record, so a draft may be reused for further notifications
/// and later mutation of it never affects records already enqueued.
///
/// ```ignore
/// let draft = ChangeDraft::new("updated")
///     .field("name", "balance")
///     .field("oldValue", 10);
/// notifier.notify(&draft);
/// ```
#[derive(Debug, Clone)]
pub struct ChangeDraft {
    change_type: String,
    fields: BTreeMap<String, FieldValue>,
}

impl ChangeDraft {
    /// Creates a draft for a change of the given type.
    pub fn new(change_type: impl Into<String>) -> Self {
        Self {
            change_type: change_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attaches a named field to the draft, replacing any previous value
    /// under the same name.
    ///
    /// The names `"object"` and `"type"` are reserved; values supplied
    /// under them are ignored when the record is sealed.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The change type this draft describes.
    pub fn change_type(&self) -> &str {
        &self.change_type
    }
}

struct RecordInner {
    change_type: String,
    object: Arc<dyn Any + Send + Sync>,
    fields: BTreeMap<String, FieldValue>,
}

/// One delivered change event.
///
/// Records are sealed at [`notify`](crate::Notifier::notify) time and
/// immutable afterwards; cloning is cheap and clones observe the same
/// record. The `object` accessor is always the observed target the record
/// was notified through, regardless of what the draft carried.
#[derive(Clone)]
pub struct ChangeRecord {
    inner: Arc<RecordInner>,
}

impl ChangeRecord {
    pub(crate) fn seal(draft: &ChangeDraft, object: Arc<dyn Any + Send + Sync>) -> Self {
        let mut fields = draft.fields.clone();
        for reserved in RESERVED_FIELDS {
            fields.remove(reserved);
        }
        ChangeRecord {
            inner: Arc::new(RecordInner {
                change_type: draft.change_type.clone(),
                object,
                fields,
            }),
        }
    }

    /// The change type, e.g. `"updated"`.
    pub fn change_type(&self) -> &str {
        &self.inner.change_type
    }

    /// The object this change was reported against.
    pub fn object(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.inner.object
    }

    /// Downcasts the source object to its concrete type.
    pub fn object_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.object.clone().downcast::<T>().ok()
    }

    /// Whether this record was reported against `target`.
    ///
    /// Compares object identity, not value.
    pub fn object_is<T: ?Sized>(&self, target: &Arc<T>) -> bool {
        let record_ptr = Arc::as_ptr(&self.inner.object) as *const ();
        let target_ptr = Arc::as_ptr(target) as *const ();
        std::ptr::eq(record_ptr, target_ptr)
    }

    /// Looks up a caller-supplied field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.inner.fields.get(name)
    }

    /// Iterates the caller-supplied fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.inner.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ChangeRecord");
        dbg.field("type", &self.inner.change_type);
        for (name, value) in self.inner.fields.iter() {
            dbg.field(name, value);
        }
        dbg.finish_non_exhaustive()
    }
}
