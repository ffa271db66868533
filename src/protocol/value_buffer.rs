//! Value buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. The grammar has no length
//! prefix, so value boundaries are found by scanning:
//! - `Idle`: between values, skipping whitespace
//! - `Composite`: inside `{...}` or `[...]`, tracking depth and quoted text
//! - `Text` / `Atom`: inside a top-level scalar
//!
//! Scanning resumes where the previous push stopped, so each byte is looked
//! at once.
//!
//! # Example
//!
//! ```
//! use textwire_rpc::protocol::ValueBuffer;
//!
//! let mut buffer = ValueBuffer::new();
//! assert!(buffer.push(br#"{"Seq":1,"Err"#).unwrap().is_empty());
//!
//! let values = buffer.push(br#"or":""}{"Reply":3} "#).unwrap();
//! assert_eq!(values.len(), 2);
//! assert_eq!(&values[1][..], br#"{"Reply":3}"#);
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::lexer::is_separator;
use crate::error::{RpcError, Result};

/// Default maximum size of a single top-level value (16 MiB).
pub const DEFAULT_MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;

/// State machine for value scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between values.
    Idle,
    /// Inside a composite value.
    Composite { depth: usize, in_text: bool },
    /// Inside top-level quoted text.
    Text,
    /// Inside a top-level bare atom.
    Atom,
}

/// Buffer for accumulating incoming bytes and extracting complete values.
pub struct ValueBuffer {
    /// Accumulated bytes; index 0 is the start of the current value.
    buffer: BytesMut,
    /// Bytes of the current value already scanned.
    scanned: usize,
    /// Current scanning state.
    state: State,
    /// Maximum allowed value size.
    max_value_size: usize,
}

impl ValueBuffer {
    /// Create a new value buffer with default settings.
    ///
    /// Default capacity: 64KB, max value: 16 MiB.
    pub fn new() -> Self {
        Self::with_max_value_size(DEFAULT_MAX_VALUE_SIZE)
    }

    /// Create a new value buffer with a custom max value size.
    pub fn with_max_value_size(max_value_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scanned: 0,
            state: State::Idle,
            max_value_size,
        }
    }

    /// Push data into the buffer and extract all complete values.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] on a closing delimiter between values
    /// or a value larger than the configured maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.extend(data);

        let mut values = Vec::new();
        while let Some(value) = self.extract()? {
            values.push(value);
        }

        Ok(values)
    }

    /// Append data without extracting anything.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Signal end of stream.
    ///
    /// Returns a trailing bare atom if one was pending.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Decode`] if the stream ended inside a value.
    pub fn finish(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::Idle => Ok(None),
            State::Atom => {
                let value = self.buffer.split().freeze();
                self.reset();
                Ok(Some(value))
            }
            State::Composite { .. } | State::Text => {
                Err(RpcError::decode("unexpected end of stream"))
            }
        }
    }

    /// True if no partial value is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.state = State::Idle;
    }

    /// Extract the next complete value, if one is buffered.
    ///
    /// Values ahead of a framing error are returned before the error is.
    pub fn extract(&mut self) -> Result<Option<Bytes>> {
        if self.state == State::Idle {
            let skip = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buffer.advance(skip);

            let Some(&first) = self.buffer.first() else {
                return Ok(None);
            };
            self.state = match first {
                b'{' | b'[' => State::Composite {
                    depth: 1,
                    in_text: false,
                },
                b'"' => State::Text,
                b'}' | b']' | b',' | b':' => {
                    return Err(RpcError::Protocol(format!(
                        "unexpected `{}` between values",
                        first as char
                    )));
                }
                _ => State::Atom,
            };
            self.scanned = 1;
        }

        let end = self.scan();

        match end {
            Some(end) => {
                let value = self.buffer.split_to(end).freeze();
                self.reset();
                Ok(Some(value))
            }
            None if self.scanned > self.max_value_size => Err(RpcError::Protocol(format!(
                "value size exceeds maximum {}",
                self.max_value_size
            ))),
            None => Ok(None),
        }
    }

    /// Continue scanning the current value; returns its end offset once known.
    fn scan(&mut self) -> Option<usize> {
        while self.scanned < self.buffer.len() {
            let i = self.scanned;
            let b = self.buffer[i];
            self.scanned += 1;

            match &mut self.state {
                State::Composite { depth, in_text } => {
                    if *in_text {
                        *in_text = b != b'"';
                        continue;
                    }
                    match b {
                        b'"' => *in_text = true,
                        b'{' | b'[' => *depth += 1,
                        b'}' | b']' => {
                            *depth -= 1;
                            if *depth == 0 {
                                return Some(i + 1);
                            }
                        }
                        _ => {}
                    }
                }
                State::Text => {
                    if b == b'"' {
                        return Some(i + 1);
                    }
                }
                State::Atom => {
                    if is_separator(b) {
                        self.scanned = i;
                        return Some(i);
                    }
                }
                State::Idle => unreachable!("scan only runs inside a value"),
            }
        }
        None
    }
}

impl Default for ValueBuffer {
    fn default() -> Self {
        Self::new()
    }
}
