//! Append-only event log
//!
//! [`Recorder::record`] is the only way to add an event. Stored events are
//! write-once values: the store creates them and readers see them only
//! through accessors.

mod event;
pub mod payload;
mod recorder;
mod store;

pub use event::{StoredEvent, WireEvent};
pub use recorder::{RecordError, Recorded, Recorder};
pub(crate) use store::events_for_conversation;
