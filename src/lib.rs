//! # textwire-rpc
//!
//! Schema-less request/response RPC over a self-delimiting text format.
//!
//! A client invokes named methods on a server over one persistent stream
//! connection (TCP or Unix socket). Many calls may be in flight at once;
//! each is tagged with a sequence number and matched to its response by that
//! number, so responses can arrive in any order.
//!
//! ## Architecture
//!
//! - **Codec**: a serde data format for the text grammar; values are written
//!   back to back with no length prefix
//! - **Client**: pending-call table, response-dispatch task, per-call timeout
//!   with one retry
//! - **Server**: method registry, one read loop per connection, one task per
//!   request
//!
//! ## Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use textwire_rpc::{Client, Server};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Pair {
//!     #[serde(rename = "A")]
//!     a: i64,
//!     #[serde(rename = "B")]
//!     b: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> textwire_rpc::Result<()> {
//!     let mut server = Server::new();
//!     server.register("add", |p: Pair| async move { Ok::<_, String>(p.a + p.b) })?;
//!     tokio::spawn(server.accept("127.0.0.1:9000"));
//!
//!     let client = Client::dial("127.0.0.1:9000").await?;
//!     let sum: i64 = client.call("add", &Pair { a: 1, b: 2 }).await?;
//!     assert_eq!(sum, 3);
//!     client.close()
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;
mod pending;
mod server;

pub use client::{Client, ClientBuilder, DEFAULT_CALL_TIMEOUT, DEFAULT_RETRIES};
pub use error::{Result, RpcError};
pub use server::{Server, ServerBuilder, UNKNOWN_METHOD};
