//! Client builder and response-dispatch loop.
//!
//! The [`ClientBuilder`] configures timeouts and buffer sizes and connects.
//! A connected [`Client`] owns two background tasks:
//! 1. the writer task, which serializes outgoing requests
//! 2. the dispatch loop, which reads responses and completes waiting calls
//!
//! # Example
//!
//! ```no_run
//! use textwire_rpc::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("127.0.0.1:9000").await?;
//!     let sum: i64 = client.call("add", &(1, 2)).await?;
//!     println!("1 + 2 = {sum}");
//!     client.close()?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};

use crate::codec;
use crate::error::{RpcError, Result};
use crate::pending::{InPlaceReply, PendingCalls, PendingReply, TypedReply};
use crate::protocol::{
    encode_payload, request_frame, ResponseHeader, WireReader, DEFAULT_MAX_VALUE_SIZE,
};
use crate::transport;
use crate::writer::{
    signalled, spawn_writer_task_with_shutdown, WriterConfig, WriterHandle,
    DEFAULT_CHANNEL_CAPACITY,
};

/// Default time to wait for a response before reissuing the call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of reissues after the first timeout.
pub const DEFAULT_RETRIES: u32 = 1;

const CLOSED_BY_PEER: &str = "connection closed by peer";
const CLOSED_BY_CLIENT: &str = "client closed";

/// Builder for configuring and connecting a client.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    call_timeout: Duration,
    retries: u32,
    channel_capacity: usize,
    max_value_size: usize,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retries: DEFAULT_RETRIES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }

    /// Set how long each attempt waits for its response.
    ///
    /// Default: 5 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set how many times a timed-out call is reissued under a new Seq.
    ///
    /// Default: 1
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the largest response value accepted.
    ///
    /// Default: 16 MiB
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Connect to `address` (`host:port` or `unix:<path>`).
    pub async fn dial(self, address: &str) -> Result<Client> {
        let stream = transport::connect(address).await?;
        tracing::debug!(peer = address, "dialed");
        Ok(self.connect_stream(stream))
    }

    /// Start a session over an already-connected stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect_stream<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (writer, _writer_task) = spawn_writer_task_with_shutdown(
            write_half,
            WriterConfig {
                channel_capacity: self.channel_capacity,
            },
            shutdown_rx.clone(),
        );

        let pending = Arc::new(PendingCalls::new());
        let reader = WireReader::with_max_value_size(read_half, self.max_value_size);
        tokio::spawn(dispatch_loop(reader, pending.clone(), shutdown_rx));

        Client {
            inner: Arc::new(Inner {
                pending,
                writer,
                shutdown: shutdown_tx,
                call_timeout: self.call_timeout,
                retries: self.retries,
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    pending: Arc<PendingCalls>,
    writer: WriterHandle,
    shutdown: watch::Sender<bool>,
    call_timeout: Duration,
    retries: u32,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A connected client session.
///
/// Cheap to clone; clones share the connection and may call concurrently.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `address` with the default configuration.
    pub async fn dial(address: &str) -> Result<Client> {
        ClientBuilder::new().dial(address).await
    }

    /// Invoke `method` with `args` and wait for the typed reply.
    ///
    /// The arguments are encoded once. Each attempt gets a fresh Seq; a
    /// response arriving for a superseded Seq is discarded.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Application`] with the handler's error text
    /// - [`RpcError::Timeout`] once every attempt has timed out
    /// - [`RpcError::Decode`] if the reply does not decode into `R`
    /// - [`RpcError::ConnectionClosed`] if the session ends first
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.invoke(method, args, || {
            let (tx, rx) = oneshot::channel();
            (Box::new(TypedReply::<R>::new(tx)) as Box<dyn PendingReply>, rx)
        })
        .await
    }

    /// Invoke `method` and decode the reply into `reply` in place.
    ///
    /// A [`Dynamic`](crate::codec::Dynamic) reply decodes as the concrete
    /// type it already holds; any other reply is overwritten. A `null` reply
    /// leaves `reply` unchanged. Errors are those of [`call`](Client::call).
    ///
    /// ```no_run
    /// # async fn run(client: textwire_rpc::Client) -> textwire_rpc::Result<()> {
    /// use textwire_rpc::codec::Dynamic;
    ///
    /// let mut sum = Dynamic::new(0i64);
    /// client.call_into("add", &(1, 2), &mut sum).await?;
    /// assert_eq!(sum.downcast_ref::<i64>(), Some(&3));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call_into<A, R>(&self, method: &str, args: &A, reply: &mut R) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Default + Send + 'static,
    {
        let place = Arc::new(Mutex::new(std::mem::take(reply)));
        let result = self
            .invoke(method, args, || {
                let (tx, rx) = oneshot::channel();
                let slot = InPlaceReply::new(place.clone(), tx);
                (Box::new(slot) as Box<dyn PendingReply>, rx)
            })
            .await;
        *reply = std::mem::take(&mut *place.lock());
        result
    }

    /// Send `args` under a fresh Seq per attempt and wait on the slot made
    /// by `slot`, reissuing after each timeout up to the retry limit.
    async fn invoke<A, T, F>(&self, method: &str, args: &A, mut slot: F) -> Result<T>
    where
        A: Serialize + ?Sized,
        F: FnMut() -> (Box<dyn PendingReply>, oneshot::Receiver<Result<T>>),
    {
        let inner = &self.inner;
        let payload = Bytes::from(encode_payload(args)?);

        for attempt in 0..=inner.retries {
            let (reply, mut rx) = slot();
            let seq = inner.pending.register(reply)?;

            let sent = match request_frame(method, seq, payload.clone()) {
                Ok(frame) => inner.writer.send(frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                inner.pending.remove(seq);
                return Err(e);
            }

            match tokio::time::timeout(inner.call_timeout, &mut rx).await {
                Ok(result) => return result.unwrap_or_else(|_| Err(session_ended())),
                Err(_) => {
                    if !inner.pending.remove(seq) {
                        // Already taken by the dispatch loop; delivery is imminent.
                        return rx.await.unwrap_or_else(|_| Err(session_ended()));
                    }
                    tracing::warn!(method, seq, attempt, "call timed out");
                }
            }
        }

        Err(RpcError::Timeout)
    }

    /// Close the session.
    ///
    /// Outstanding calls resolve with [`RpcError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// [`RpcError::AlreadyClosed`] if the session was already closing.
    pub fn close(&self) -> Result<()> {
        let first = self.inner.pending.close(CLOSED_BY_CLIENT);
        let _ = self.inner.shutdown.send(true);
        if !first {
            return Err(RpcError::AlreadyClosed);
        }
        tracing::debug!("client closed");
        Ok(())
    }

    /// True once the session is closing.
    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

fn session_ended() -> RpcError {
    RpcError::ConnectionClosed("session ended".into())
}

/// Read the next value unless the session is shutting down.
async fn next_value<R>(
    reader: &mut WireReader<R>,
    shutdown: &mut watch::Receiver<bool>,
) -> std::result::Result<Bytes, String>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = signalled(shutdown) => Err(CLOSED_BY_CLIENT.to_owned()),
        value = reader.next_value() => match value {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CLOSED_BY_PEER.to_owned()),
            Err(e) => Err(e.to_string()),
        },
    }
}

/// Response-dispatch loop; the only reader of the connection.
async fn dispatch_loop<R>(
    mut reader: WireReader<R>,
    pending: Arc<PendingCalls>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let cause = loop {
        let header = match next_value(&mut reader, &mut shutdown).await {
            Ok(value) => value,
            Err(cause) => break cause,
        };
        let header: ResponseHeader = match codec::decode_slice(&header) {
            Ok(header) => header,
            Err(e) => break e.to_string(),
        };
        let payload = match next_value(&mut reader, &mut shutdown).await {
            Ok(value) => value,
            Err(cause) => break cause,
        };

        let Some(reply) = pending.take(header.seq) else {
            tracing::trace!(seq = header.seq, "discarding response for unknown call");
            continue;
        };
        if header.is_error() {
            reply.fail(RpcError::Application(header.error));
            continue;
        }
        if let Err(cause) = reply.resolve(&payload) {
            break cause;
        }
    };

    if cause == CLOSED_BY_CLIENT || cause == CLOSED_BY_PEER {
        tracing::debug!(cause = %cause, "dispatch loop ended");
    } else {
        tracing::error!(cause = %cause, "dispatch loop failed");
    }
    pending.close(&cause);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Dynamic;
    use crate::protocol::{error_frame, response_frame, RequestHeader};
    use crate::writer::spawn_writer_task;
    use tokio::io::{duplex, DuplexStream};

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .call_timeout(Duration::from_millis(50))
            .retries(3)
            .channel_capacity(8)
            .max_value_size(1024);

        assert_eq!(builder.call_timeout, Duration::from_millis(50));
        assert_eq!(builder.retries, 3);
        assert_eq!(builder.channel_capacity, 8);
        assert_eq!(builder.max_value_size, 1024);
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(builder.retries, DEFAULT_RETRIES);
    }

    /// Peer side of a scripted session: the requests read so far and a
    /// handle for writing raw response frames.
    struct Peer {
        reader: WireReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: WriterHandle,
    }

    impl Peer {
        async fn next_request(&mut self) -> (RequestHeader, Bytes) {
            let header = self.reader.next_value().await.unwrap().unwrap();
            let payload = self.reader.next_value().await.unwrap().unwrap();
            (codec::decode_slice(&header).unwrap(), payload)
        }

        async fn reply(&self, seq: u64, payload: &'static str) {
            let frame = response_frame(seq, Bytes::from_static(payload.as_bytes())).unwrap();
            self.writer.send(frame).await.unwrap();
        }
    }

    fn session(builder: ClientBuilder) -> (Client, Peer) {
        let (ours, theirs) = duplex(1 << 16);
        let client = builder.connect_stream(ours);
        let (read_half, write_half) = tokio::io::split(theirs);
        let (writer, _task) = spawn_writer_task(write_half, WriterConfig::default());
        let peer = Peer {
            reader: WireReader::new(read_half),
            writer,
        };
        (client, peer)
    }

    #[tokio::test]
    async fn test_request_layout_and_reply() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("add", &[1, 2]).await }
        });

        let (header, payload) = peer.next_request().await;
        assert_eq!(header, RequestHeader::new("add", 1));
        assert_eq!(&payload[..], br#"{"Reply":[1,2]}"#);

        peer.reply(1, r#"{"Reply":3}"#).await;
        assert_eq!(call.await.unwrap().unwrap(), 3);
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_into_held_dynamic() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                let mut sum = Dynamic::new(0i64);
                client.call_into("add", &(1, 2), &mut sum).await.map(|()| sum)
            }
        });
        let (header, _) = peer.next_request().await;
        peer.reply(header.seq, r#"{"Reply":3}"#).await;

        let sum = call.await.unwrap().unwrap();
        assert_eq!(sum.downcast_ref::<i64>(), Some(&3));
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_call_into_survives_retry() {
        let builder = ClientBuilder::new().call_timeout(Duration::from_millis(100));
        let (client, mut peer) = session(builder);

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                let mut names = vec!["stale".to_string()];
                client.call_into("names", &(), &mut names).await.map(|()| names)
            }
        });
        peer.next_request().await;
        let (second, _) = peer.next_request().await;
        peer.reply(second.seq, r#"{"Reply":["a","b"]}"#).await;

        assert_eq!(call.await.unwrap().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_call_into_restores_reply_on_error() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                let mut held = Dynamic::new(7u32);
                let result = client.call_into("div", &(1, 0), &mut held).await;
                (result, held)
            }
        });
        let (header, _) = peer.next_request().await;
        peer.writer
            .send(error_frame(header.seq, "division by zero").unwrap())
            .await
            .unwrap();

        let (result, held) = call.await.unwrap();
        assert!(matches!(result, Err(RpcError::Application(_))));
        assert_eq!(held.downcast_ref::<u32>(), Some(&7));
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (client, mut peer) = session(ClientBuilder::new());

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, String>("echo", "a").await }
        });
        let (one, _) = peer.next_request().await;
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, String>("echo", "b").await }
        });
        let (two, _) = peer.next_request().await;

        peer.reply(two.seq, r#"{"Reply":"b"}"#).await;
        peer.reply(one.seq, r#"{"Reply":"a"}"#).await;

        assert_eq!(first.await.unwrap().unwrap(), "a");
        assert_eq!(second.await.unwrap().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_application_error() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("div", &(1, 0)).await }
        });
        let (header, _) = peer.next_request().await;
        peer.writer
            .send(error_frame(header.seq, "division by zero").unwrap())
            .await
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Application(ref text) if text == "division by zero"));
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_retry_uses_new_seq_and_drops_late_reply() {
        let builder = ClientBuilder::new().call_timeout(Duration::from_millis(100));
        let (client, mut peer) = session(builder);

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("slow", &()).await }
        });

        let (first, _) = peer.next_request().await;
        let (second, _) = peer.next_request().await;
        assert_eq!((first.seq, second.seq), (1, 2));

        // Late reply for the superseded attempt is discarded.
        peer.reply(first.seq, r#"{"Reply":1}"#).await;
        peer.reply(second.seq, r#"{"Reply":2}"#).await;
        assert_eq!(call.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_timeout_after_retry() {
        let builder = ClientBuilder::new().call_timeout(Duration::from_millis(50));
        let (client, mut peer) = session(builder);

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("never", &()).await }
        });
        peer.next_request().await;
        peer.next_request().await;

        assert!(matches!(call.await.unwrap(), Err(RpcError::Timeout)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_reply_ends_session() {
        let (client, mut peer) = session(ClientBuilder::new());

        let bad = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, Vec<i64>>("list", &()).await }
        });
        let (first, _) = peer.next_request().await;
        let other = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("other", &()).await }
        });
        peer.next_request().await;

        peer.reply(first.seq, r#"{"Reply":{"A":1}}"#).await;

        assert!(matches!(bad.await.unwrap(), Err(RpcError::Decode(_))));
        assert!(matches!(
            other.await.unwrap(),
            Err(RpcError::ConnectionClosed(_))
        ));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_pending_calls() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("add", &()).await }
        });
        peer.next_request().await;
        drop(peer);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed(ref cause) if cause == CLOSED_BY_PEER));
        assert!(matches!(
            client.call::<_, i64>("add", &()).await,
            Err(RpcError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_twice() {
        let (client, _peer) = session(ClientBuilder::new());
        client.close().unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.close(), Err(RpcError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_close_resolves_outstanding_call() {
        let (client, mut peer) = session(ClientBuilder::new());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call::<_, i64>("add", &()).await }
        });
        peer.next_request().await;

        client.close().unwrap();
        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_method_with_quote_rejected() {
        let (client, _peer) = session(ClientBuilder::new());
        let err = client.call::<_, i64>("a\"b", &()).await.unwrap_err();
        assert!(matches!(err, RpcError::Encode(_)));
        assert_eq!(client.pending_calls(), 0);
    }
}
