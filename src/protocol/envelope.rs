//! Envelope records exchanged on every call.
//!
//! A request is a [`RequestHeader`] followed by a [`Payload`] holding the
//! arguments; a response is a [`ResponseHeader`] followed by a [`Payload`]
//! holding the reply (or `null` on error).

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{self, Decoder, Dynamic};
use crate::error::{RpcError, Result};

/// Payload text used when a response carries no reply.
pub const ABSENT_PAYLOAD: &str = r#"{"Reply":null}"#;

const REPLY_FIELD: &str = "Reply";

/// Header written before the arguments of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RequestHeader {
    /// Registered method name.
    pub method_name: String,
    /// Client-assigned sequence number.
    pub seq: u64,
}

impl RequestHeader {
    pub fn new(method_name: impl Into<String>, seq: u64) -> Self {
        Self {
            method_name: method_name.into(),
            seq,
        }
    }
}

/// Header written before the reply of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResponseHeader {
    /// Sequence number of the request being answered.
    pub seq: u64,
    /// Error text; empty on success.
    pub error: String,
}

impl ResponseHeader {
    /// A successful response header.
    pub fn ok(seq: u64) -> Self {
        Self {
            seq,
            error: String::new(),
        }
    }

    /// A failed response header.
    pub fn failed(seq: u64, error: impl Into<String>) -> Self {
        Self {
            seq,
            error: error.into(),
        }
    }

    /// Check if the response carries an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Generic wrapper around the argument or reply value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload<T> {
    pub reply: T,
}

impl<T> Payload<T> {
    pub fn new(reply: T) -> Self {
        Self { reply }
    }

    pub fn into_inner(self) -> T {
        self.reply
    }
}

/// Encode `value` wrapped in a [`Payload`].
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    codec::encode(&Payload { reply: value })
}

/// Decode the value carried by a [`Payload`] into `place`.
///
/// A [`Dynamic`] place decodes as the type it already holds; any other place
/// is overwritten. `null` or an absent `Reply` leaves `place` unchanged.
pub fn decode_payload_into<T>(payload: &[u8], place: &mut T) -> Result<()>
where
    T: DeserializeOwned + 'static,
{
    let text = std::str::from_utf8(payload)
        .map_err(|e| RpcError::decode(format!("invalid UTF-8: {}", e)))?;
    let mut decoder = Decoder::new(text);
    decoder.decode_field_with(REPLY_FIELD, |decoder| {
        if let Some(dynamic) = (&mut *place as &mut dyn Any).downcast_mut::<Dynamic>() {
            return dynamic.decode_from(decoder);
        }
        *place = decoder.decode()?;
        Ok(())
    })?;
    decoder.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout() {
        let header = RequestHeader::new("add", 7);
        assert_eq!(
            codec::encode(&header).unwrap(),
            r#"{"MethodName":"add","Seq":7}"#
        );
    }

    #[test]
    fn test_response_header_layout() {
        assert_eq!(
            codec::encode(&ResponseHeader::ok(3)).unwrap(),
            r#"{"Seq":3,"Error":""}"#
        );
        let failed = ResponseHeader::failed(4, "boom");
        assert!(failed.is_error());
        assert_eq!(
            codec::decode::<ResponseHeader>(r#"{"Seq":4,"Error":"boom"}"#).unwrap(),
            failed
        );
    }

    #[test]
    fn test_missing_header_fields_default() {
        let header: ResponseHeader = codec::decode(r#"{"Seq":9}"#).unwrap();
        assert_eq!(header, ResponseHeader::ok(9));
    }

    #[test]
    fn test_payload_wraps_value() {
        assert_eq!(encode_payload(&3).unwrap(), r#"{"Reply":3}"#);
        assert_eq!(encode_payload(&()).unwrap(), ABSENT_PAYLOAD);

        let payload: Payload<Vec<u8>> = codec::decode(r#"{"Reply":[1,2]}"#).unwrap();
        assert_eq!(payload.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_decode_payload_into_held_dynamic() {
        let mut place = Dynamic::new(0i64);
        decode_payload_into(br#"{"Reply":3}"#, &mut place).unwrap();
        assert_eq!(place.downcast_ref::<i64>(), Some(&3));

        let mut empty = Dynamic::empty();
        assert!(matches!(
            decode_payload_into(br#"{"Reply":3}"#, &mut empty),
            Err(RpcError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_payload_into_plain_value() {
        let mut place = vec![9u8];
        decode_payload_into(br#"{"Reply":[1,2]}"#, &mut place).unwrap();
        assert_eq!(place, vec![1, 2]);

        // Absent reply leaves the place alone.
        decode_payload_into(ABSENT_PAYLOAD.as_bytes(), &mut place).unwrap();
        assert_eq!(place, vec![1, 2]);

        assert!(decode_payload_into(br#"{"Reply":1} 2"#, &mut place).is_err());
    }
}
