//! Async reader yielding complete top-level values from a byte stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::value_buffer::ValueBuffer;
use crate::error::Result;

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Wraps the read half of a connection and yields one value at a time.
///
/// [`next_value`](Self::next_value) is cancel-safe: a read dropped mid-way
/// loses no bytes, so it can sit in a `tokio::select!`.
pub struct WireReader<R> {
    reader: R,
    buffer: ValueBuffer,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    /// Create a reader with the default value size limit.
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, ValueBuffer::new())
    }

    /// Create a reader with a custom value size limit.
    pub fn with_max_value_size(reader: R, max_value_size: usize) -> Self {
        Self::with_buffer(reader, ValueBuffer::with_max_value_size(max_value_size))
    }

    fn with_buffer(reader: R, buffer: ValueBuffer) -> Self {
        Self {
            reader,
            buffer,
            scratch: vec![0u8; READ_BUFFER_SIZE],
            eof: false,
        }
    }

    /// Read the next complete value.
    ///
    /// Returns `Ok(None)` on a clean end of stream between values.
    ///
    /// # Errors
    ///
    /// Transport failures, malformed framing, or a stream that ends inside a
    /// value.
    pub async fn next_value(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(value) = self.buffer.extract()? {
                return Ok(Some(value));
            }
            if self.eof {
                return self.buffer.finish();
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend(&self.scratch[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_values_across_writes() {
        let (mut tx, rx) = duplex(64);
        let mut reader = WireReader::new(rx);

        tokio::spawn(async move {
            tx.write_all(br#"{"Seq":1,"#).await.unwrap();
            tx.write_all(br#""Error":""}{"Reply":"#).await.unwrap();
            tx.write_all(b"3} ").await.unwrap();
        });

        assert_eq!(
            &reader.next_value().await.unwrap().unwrap()[..],
            br#"{"Seq":1,"Error":""}"#
        );
        assert_eq!(
            &reader.next_value().await.unwrap().unwrap()[..],
            br#"{"Reply":3}"#
        );
        assert!(reader.next_value().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_error() {
        let (mut tx, rx) = duplex(64);
        let mut reader = WireReader::new(rx);
        tx.write_all(br#"{"Seq":"#).await.unwrap();
        drop(tx);

        assert!(matches!(
            reader.next_value().await,
            Err(RpcError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_trailing_atom_at_eof() {
        let (mut tx, rx) = duplex(64);
        let mut reader = WireReader::new(rx);
        tx.write_all(b"42").await.unwrap();
        drop(tx);

        assert_eq!(&reader.next_value().await.unwrap().unwrap()[..], b"42");
        assert!(reader.next_value().await.unwrap().is_none());
    }
}
