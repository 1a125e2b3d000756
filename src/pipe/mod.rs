//! Named-pipe session with a scripting host
//!
//! Commands go out on one pipe, replies come back on the other. A reply is
//! any number of body lines closed by a sentinel line, and replies arrive
//! strictly in command order.

pub mod client;
pub mod monitor;
pub mod reply;
pub mod transport;

pub use client::{ClientSettings, PipeClient, WriteOptions};
pub use monitor::ConnectionState;
pub use reply::{Reply, SENTINEL_PREFIX};
