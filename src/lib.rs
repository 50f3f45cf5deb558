#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod dispatcher;
mod error;
mod notifier;
mod observer;
mod properties;
mod record;
mod registry;
mod scheduler;
mod value;

pub use dispatcher::Dispatcher;
pub use error::NotifyError;
pub use notifier::Notifier;
pub use observer::{AcceptList, Observer};
pub use properties::PropertyMap;
pub use record::{ChangeDraft, ChangeRecord};
pub use scheduler::{ScheduleSoon, Task, TaskHandle, TurnQueue};
pub use value::FieldValue;
