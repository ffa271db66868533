//! Pending-call table for a client session.
//!
//! Maps each in-flight Seq to the slot its caller is waiting on. The table
//! and the Seq counter share one lock, which is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::codec;
use crate::error::{RpcError, Result};
use crate::protocol::{decode_payload_into, Payload};

/// The waiting side of one call.
pub(crate) trait PendingReply: Send {
    /// Decode `payload` into the caller's reply type and deliver it.
    ///
    /// On a decode failure the caller receives the decode error and the
    /// failure text is returned so the session can be ended with it.
    fn resolve(self: Box<Self>, payload: &[u8]) -> std::result::Result<(), String>;

    /// Deliver an error to the caller.
    fn fail(self: Box<Self>, error: RpcError);
}

/// Reply slot for a caller expecting an `R`.
pub(crate) struct TypedReply<R> {
    tx: oneshot::Sender<Result<R>>,
}

impl<R> TypedReply<R> {
    pub(crate) fn new(tx: oneshot::Sender<Result<R>>) -> Self {
        Self { tx }
    }
}

impl<R: DeserializeOwned + Send + 'static> PendingReply for TypedReply<R> {
    fn resolve(self: Box<Self>, payload: &[u8]) -> std::result::Result<(), String> {
        match codec::decode_slice::<Payload<R>>(payload) {
            Ok(reply) => {
                // The caller may have given up already.
                let _ = self.tx.send(Ok(reply.into_inner()));
                Ok(())
            }
            Err(e) => {
                let cause = e.to_string();
                let _ = self.tx.send(Err(e));
                Err(cause)
            }
        }
    }

    fn fail(self: Box<Self>, error: RpcError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Reply slot that decodes into a value the caller already holds.
///
/// The place is shared with the caller so it outlives a superseded attempt.
pub(crate) struct InPlaceReply<R> {
    place: Arc<Mutex<R>>,
    tx: oneshot::Sender<Result<()>>,
}

impl<R> InPlaceReply<R> {
    pub(crate) fn new(place: Arc<Mutex<R>>, tx: oneshot::Sender<Result<()>>) -> Self {
        Self { place, tx }
    }
}

impl<R: DeserializeOwned + Send + 'static> PendingReply for InPlaceReply<R> {
    fn resolve(self: Box<Self>, payload: &[u8]) -> std::result::Result<(), String> {
        let decoded = decode_payload_into(payload, &mut *self.place.lock());
        match decoded {
            Ok(()) => {
                let _ = self.tx.send(Ok(()));
                Ok(())
            }
            Err(e) => {
                let cause = e.to_string();
                let _ = self.tx.send(Err(e));
                Err(cause)
            }
        }
    }

    fn fail(self: Box<Self>, error: RpcError) {
        let _ = self.tx.send(Err(error));
    }
}

struct State {
    calls: HashMap<u64, Box<dyn PendingReply>>,
    next_seq: u64,
    /// Set once the session is closing; holds the terminal cause.
    closed: Option<String>,
}

/// In-flight calls keyed by Seq.
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: HashMap::new(),
                next_seq: 1,
                closed: None,
            }),
        }
    }

    /// Allocate the next Seq and register `reply` under it.
    ///
    /// Fails with [`RpcError::ConnectionClosed`] once the session is closing.
    pub(crate) fn register(&self, reply: Box<dyn PendingReply>) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(cause) = &state.closed {
            return Err(RpcError::ConnectionClosed(cause.clone()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.calls.insert(seq, reply);
        Ok(seq)
    }

    /// Remove and return the call registered under `seq`.
    pub(crate) fn take(&self, seq: u64) -> Option<Box<dyn PendingReply>> {
        self.state.lock().calls.remove(&seq)
    }

    /// Drop the call registered under `seq`; false if it was already gone.
    pub(crate) fn remove(&self, seq: u64) -> bool {
        self.take(seq).is_some()
    }

    /// Mark the session closing and fail every remaining call with
    /// `ConnectionClosed(cause)`.
    ///
    /// Returns false if the session was already closing.
    pub(crate) fn close(&self, cause: &str) -> bool {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return false;
            }
            state.closed = Some(cause.to_owned());
            state.calls.drain().map(|(_, reply)| reply).collect()
        };

        for reply in drained {
            reply.fail(RpcError::ConnectionClosed(cause.to_owned()));
        }
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Dynamic;

    fn slot<R: DeserializeOwned + Send + 'static>() -> (Box<dyn PendingReply>, oneshot::Receiver<Result<R>>) {
        let (tx, rx) = oneshot::channel();
        (Box::new(TypedReply::new(tx)), rx)
    }

    #[test]
    fn test_seq_starts_at_one_and_increments() {
        let pending = PendingCalls::new();
        let (a, _ra) = slot::<i64>();
        let (b, _rb) = slot::<i64>();
        assert_eq!(pending.register(a).unwrap(), 1);
        assert_eq!(pending.register(b).unwrap(), 2);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_resolve_delivers_typed_reply() {
        let pending = PendingCalls::new();
        let (reply, mut rx) = slot::<i64>();
        let seq = pending.register(reply).unwrap();

        pending.take(seq).unwrap().resolve(br#"{"Reply":3}"#).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), 3);
        assert!(pending.take(seq).is_none());
    }

    #[test]
    fn test_resolve_decode_failure_reaches_caller() {
        let pending = PendingCalls::new();
        let (reply, mut rx) = slot::<Vec<i64>>();
        let seq = pending.register(reply).unwrap();

        let cause = pending.take(seq).unwrap().resolve(br#"{"Reply":{"A":1}}"#);
        assert!(cause.unwrap_err().contains("decode failed"));
        assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::Decode(_))));
    }

    #[test]
    fn test_in_place_reply_keeps_dynamic_type() {
        let pending = PendingCalls::new();
        let place = Arc::new(Mutex::new(Dynamic::new(0i64)));
        let (tx, mut rx) = oneshot::channel();
        let seq = pending
            .register(Box::new(InPlaceReply::new(place.clone(), tx)))
            .unwrap();

        pending.take(seq).unwrap().resolve(br#"{"Reply":3}"#).unwrap();
        rx.try_recv().unwrap().unwrap();
        assert_eq!(place.lock().downcast_ref::<i64>(), Some(&3));
    }

    #[test]
    fn test_remove_superseded_call() {
        let pending = PendingCalls::new();
        let (reply, _rx) = slot::<i64>();
        let seq = pending.register(reply).unwrap();
        assert!(pending.remove(seq));
        assert!(!pending.remove(seq));
    }

    #[test]
    fn test_close_fails_everything_once() {
        let pending = PendingCalls::new();
        let (a, mut ra) = slot::<i64>();
        let (b, mut rb) = slot::<String>();
        pending.register(a).unwrap();
        pending.register(b).unwrap();

        assert!(pending.close("connection closed by peer"));
        assert!(!pending.close("again"));
        assert!(pending.is_closed());
        assert_eq!(pending.len(), 0);

        assert!(matches!(
            ra.try_recv().unwrap(),
            Err(RpcError::ConnectionClosed(cause)) if cause == "connection closed by peer"
        ));
        assert!(matches!(rb.try_recv().unwrap(), Err(RpcError::ConnectionClosed(_))));

        let (c, _rc) = slot::<i64>();
        assert!(matches!(
            pending.register(c),
            Err(RpcError::ConnectionClosed(_))
        ));
    }
}
