//! Core conversation state machine
//!
//! Pure state transitions, invoked by the projector for every appended event.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::EventType;
pub use state::ConvState;
pub use transition::{transition, Transition};
