//! Realtime connection management
//!
//! - [`ConnectionManager`]: the public handle (connect, send, disconnect, destroy)
//! - the driver task running the connection state machine
//! - [`Connector`] / [`ChannelHandle`]: the seam to the physical socket

mod channel;
mod driver;
mod manager;

pub use channel::*;
pub use manager::*;
