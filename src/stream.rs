//! Stream gateway
//!
//! Cursor-resumable delivery of a conversation's event log over SSE: a
//! bounded replay, a `replay.complete` marker, then a time-boxed live tail.
//! Each connection is one task; nothing is shared between connections.

mod frame;
mod gateway;

pub use frame::StreamFrame;
pub use gateway::{StreamConfig, StreamGateway};
