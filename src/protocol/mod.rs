//! Protocol module - envelopes, value framing, and outbound frames.
//!
//! Every message is a header value followed by a payload value:
//! - header/payload records shared by client and server
//! - value buffer for splitting a byte stream at value boundaries
//! - outbound frame builders

mod envelope;
mod frame;
mod reader;
mod value_buffer;

pub use envelope::{
    decode_payload_into, encode_payload, Payload, RequestHeader, ResponseHeader, ABSENT_PAYLOAD,
};
pub use frame::{error_frame, request_frame, response_frame, OutboundFrame, FRAME_DELIMITER};
pub use reader::WireReader;
pub use value_buffer::{ValueBuffer, DEFAULT_MAX_VALUE_SIZE};
