//! Framed RESP stream over any async transport
//!
//! Reads go through a growable [`BytesMut`] buffer, writes through a
//! [`BufWriter`]; callers decide when to flush so a batch of frames can be
//! sent back-to-back in one write.

use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::frame::{Frame, FrameScanner, ProtocolError};
use crate::constants::buffer::{READ_INITIAL, WRITE_CAPACITY};

/// RESP frame reader/writer
#[derive(Debug)]
pub struct FrameStream<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    scratch: BytesMut,
    scanner: FrameScanner,
    allow_inline: bool,
}

impl<S> FrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport that carries replies (upstream side)
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufWriter::with_capacity(WRITE_CAPACITY, stream),
            buffer: BytesMut::with_capacity(READ_INITIAL),
            scratch: BytesMut::new(),
            scanner: FrameScanner::default(),
            allow_inline: false,
        }
    }

    /// Wrap a client transport, accepting inline commands
    pub fn client(stream: S) -> Self {
        Self {
            allow_inline: true,
            ..Self::new(stream)
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` on a clean EOF between frames and
    /// [`ProtocolError::UnexpectedEof`] when the peer closes mid-frame.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEof)
                };
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match self.scanner.scan(&self.buffer, self.allow_inline) {
            Ok(len) => {
                let mut cursor = Cursor::new(&self.buffer[..len]);
                let frame = Frame::parse(&mut cursor, self.allow_inline)?;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Buffer a frame for writing; call [`flush`](Self::flush) to send it
    pub async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        self.scratch.clear();
        frame.encode(&mut self.scratch);
        self.stream.write_all(&self.scratch).await
    }

    /// Buffer raw, already-encoded bytes
    pub async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Flush buffered writes to the transport
    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush().await
    }

    /// Whether bytes were received that do not yet form a frame
    ///
    /// Between request/reply exchanges this must be false; anything else
    /// means the peer sent more than was asked for.
    #[must_use]
    pub fn has_buffered_input(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Borrow the underlying transport
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Consume the wrapper, returning the transport
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}
