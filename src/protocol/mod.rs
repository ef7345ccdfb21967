//! Wire protocol for the realtime channel
//!
//! Defines the inbound/outbound message shapes and close codes.
//! Messages are JSON objects discriminated by their `type` field.

mod close;
mod messages;

pub use close::*;
pub use messages::*;
