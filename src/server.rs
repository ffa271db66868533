//! Server builder and per-connection request loop.
//!
//! Each accepted connection gets its own task. That task is the only reader
//! of the connection: it reads requests in order and spawns one task per
//! request, so a slow handler never blocks the requests behind it. Responses
//! go out through the connection's writer task in completion order.
//!
//! Connection lifecycle: `Reading` until end of stream or a framing/transport
//! failure, then `Draining` while outstanding handlers finish, then `Closed`
//! once the writer has flushed and shut the connection down.
//!
//! # Example
//!
//! ```no_run
//! use textwire_rpc::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new();
//!     server.register("add", |(a, b): (i64, i64)| async move {
//!         Ok::<_, String>(a + b)
//!     })?;
//!     server.accept("127.0.0.1:9000").await?;
//!     Ok(())
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};

use crate::codec;
use crate::error::Result;
use crate::handler::MethodRegistry;
use crate::protocol::{
    error_frame, response_frame, RequestHeader, WireReader, DEFAULT_MAX_VALUE_SIZE,
};
use crate::transport::Listener;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Error text sent for a method that is not registered.
pub const UNKNOWN_METHOD: &str = "the name has not been register";

/// Builder for configuring a server.
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    channel_capacity: usize,
    max_value_size: usize,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }

    /// Set the per-connection writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the largest request value accepted.
    ///
    /// Default: 16 MiB
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Build a server with an empty registry.
    pub fn build(self) -> Server {
        Server {
            registry: MethodRegistry::new(),
            config: self,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An RPC server: a method registry plus connection handling.
#[derive(Debug)]
pub struct Server {
    registry: MethodRegistry,
    config: ServerBuilder,
}

impl Server {
    /// Create a server with the default configuration.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Register a method handler.
    ///
    /// See [`MethodRegistry::register`] for the accepted handler shapes and
    /// the errors returned.
    pub fn register<F, A, R, E, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.registry.register(name, handler)
    }

    /// The method registry.
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Bind `address` and serve connections until accepting fails.
    pub async fn accept(self, address: &str) -> Result<()> {
        let listener = Listener::bind(address).await?;
        self.serve(listener).await
    }

    /// Serve connections from a bound listener until accepting fails.
    pub async fn serve(self, listener: Listener) -> Result<()> {
        let server = Arc::new(self);
        tracing::debug!(address = %listener.local_addr()?, "serving");

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "accepted connection");

            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_stream(stream).await {
                    tracing::warn!(peer = %peer, "connection ended: {}", e);
                }
            });
        }
    }

    /// Serve one connected stream until it is closed and drained.
    ///
    /// Returns the framing or transport error that ended the read loop, if
    /// any.
    pub async fn serve_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(
            write_half,
            WriterConfig {
                channel_capacity: self.config.channel_capacity,
            },
        );
        let mut reader = WireReader::with_max_value_size(read_half, self.config.max_value_size);
        let mut handlers = JoinSet::new();

        tracing::debug!("connection reading");
        let outcome = self.read_requests(&mut reader, &writer, &mut handlers).await;
        if let Err(e) = &outcome {
            tracing::error!("read loop failed: {}", e);
        }

        tracing::debug!(outstanding = handlers.len(), "connection draining");
        while let Some(joined) = handlers.join_next().await {
            reap(joined);
        }

        drop(writer);
        match writer_task.await {
            Ok(Err(e)) => tracing::debug!("writer ended with error: {}", e),
            Err(e) => tracing::error!("writer task failed: {}", e),
            Ok(Ok(())) => {}
        }
        tracing::debug!("connection closed");

        outcome
    }

    /// Read requests until end of stream or a fatal error.
    async fn read_requests<R>(
        &self,
        reader: &mut WireReader<R>,
        writer: &WriterHandle,
        handlers: &mut JoinSet<()>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            while let Some(joined) = handlers.try_join_next() {
                reap(joined);
            }

            let Some(header) = reader.next_value().await? else {
                return Ok(());
            };
            let header: RequestHeader = match codec::decode_slice(&header) {
                Ok(header) => header,
                Err(e) => {
                    // Discard the paired payload; no Seq is known.
                    if reader.next_value().await?.is_none() {
                        return Ok(());
                    }
                    tracing::warn!("bad request header: {}", e);
                    writer.send(error_frame(0, &e.to_string())?).await?;
                    continue;
                }
            };
            let Some(payload) = reader.next_value().await? else {
                return Ok(());
            };

            let seq = header.seq;
            let method = header.method_name;

            let Some(descriptor) = self.registry.get(&method) else {
                tracing::warn!(method = %method, seq, "{}", UNKNOWN_METHOD);
                writer.send(error_frame(seq, UNKNOWN_METHOD)?).await?;
                continue;
            };

            let call = match descriptor.prepare(&payload) {
                Ok(call) => call,
                Err(e) => {
                    tracing::warn!(method = %method, seq, "bad arguments: {}", e);
                    writer.send(error_frame(seq, &e.to_string())?).await?;
                    continue;
                }
            };

            let writer = writer.clone();
            handlers.spawn(async move {
                let frame = match call.await {
                    Ok(reply) => response_frame(seq, Bytes::from(reply)),
                    Err(text) => {
                        tracing::warn!(method = %method, seq, "handler failed: {}", text);
                        error_frame(seq, &text)
                    }
                };
                match frame {
                    Ok(frame) => {
                        if writer.send(frame).await.is_err() {
                            tracing::debug!(seq, "connection gone, response dropped");
                        }
                    }
                    Err(e) => tracing::error!(seq, "failed to build response: {}", e),
                }
            });
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("handler panicked: {}", e);
        }
    }
}
