//! Event log: event records and the history they are appended to.

pub mod event;
pub mod history;

pub use event::{Event, EventId, EventKind, Role, StoredEvent, ThreadId};
pub use history::{EventQuery, History, InMemoryHistory};
