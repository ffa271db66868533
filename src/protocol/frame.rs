//! Outbound frame construction.
//!
//! A frame is an encoded header, an encoded payload, and a single space.
//! The payload is encoded once by the caller and shared across retries.
//!
//! # Example
//!
//! ```
//! use textwire_rpc::protocol::{encode_payload, request_frame};
//! use bytes::Bytes;
//!
//! let payload = Bytes::from(encode_payload(&[1, 2]).unwrap());
//! let frame = request_frame("add", 1, payload).unwrap();
//!
//! assert_eq!(&frame.header[..], br#"{"MethodName":"add","Seq":1}"#);
//! assert_eq!(&frame.payload[..], br#"{"Reply":[1,2]}"#);
//! ```

use bytes::Bytes;

use super::envelope::{RequestHeader, ResponseHeader, ABSENT_PAYLOAD};
use crate::codec;
use crate::error::{RpcError, Result};

/// Written after every payload.
pub const FRAME_DELIMITER: &[u8] = b" ";

/// A frame ready to be written to the connection.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Encoded header value.
    pub header: Bytes,
    /// Encoded payload value.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: Bytes, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Total size of this frame on the wire, delimiter included.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.len() + self.payload.len() + FRAME_DELIMITER.len()
    }
}

/// Build a request frame.
///
/// # Errors
///
/// Text is written without escaping, so a method name containing `"` is
/// rejected.
pub fn request_frame(method: &str, seq: u64, payload: Bytes) -> Result<OutboundFrame> {
    if method.contains('"') {
        return Err(RpcError::encode(format!(
            "method name {method:?} contains a quote"
        )));
    }
    let header = codec::encode(&RequestHeader::new(method, seq))?;
    Ok(OutboundFrame::new(Bytes::from(header), payload))
}

/// Build a successful response frame.
pub fn response_frame(seq: u64, payload: Bytes) -> Result<OutboundFrame> {
    let header = codec::encode(&ResponseHeader::ok(seq))?;
    Ok(OutboundFrame::new(Bytes::from(header), payload))
}

/// Build a failed response frame with an absent reply.
///
/// Quotes in `error` become `'` so the header stays well-formed.
pub fn error_frame(seq: u64, error: &str) -> Result<OutboundFrame> {
    let error = if error.is_empty() {
        "unknown error".to_owned()
    } else {
        error.replace('"', "'")
    };
    let header = codec::encode(&ResponseHeader::failed(seq, error))?;
    Ok(OutboundFrame::new(
        Bytes::from(header),
        Bytes::from_static(ABSENT_PAYLOAD.as_bytes()),
    ))
}
