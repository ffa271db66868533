//! Transport module - TCP and Unix Domain Socket connections.
//!
//! Addresses are `host:port` for TCP or `unix:<path>` for a Unix socket.

mod socket;

pub use socket::{connect, Address, Listener, Stream};
