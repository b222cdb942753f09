//! RESP2 frame type with two-phase parsing
//!
//! `check` walks a buffered byte slice to find out whether a whole frame is
//! available without allocating; `parse` then materializes it. Both return
//! [`ProtocolError::Incomplete`] when more bytes are needed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;

use crate::constants::buffer::{MAX_ARRAY_LEN, MAX_BULK_LEN, MAX_INLINE_LEN, MAX_NESTING_DEPTH};

/// A single RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Bytes),
    /// `$-1`
    Null,
    /// `*-1`
    NullArray,
    /// `*2\r\n...`
    Array(Vec<Frame>),
}

/// Errors raised while decoding frames
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough data buffered to decode a whole frame
    #[error("incomplete frame")]
    Incomplete,

    /// Bytes do not form a valid frame
    #[error("invalid frame: {0}")]
    Invalid(String),

    /// A length prefix or line exceeds the configured limit
    #[error("frame too large: {len} exceeds limit of {limit}")]
    TooLarge { len: usize, limit: usize },

    /// Arrays nested beyond the supported depth
    #[error("arrays nested deeper than {limit} levels")]
    TooDeep { limit: usize },

    /// Peer closed the stream in the middle of a frame
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    /// Underlying transport failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Frame {
    /// Build a command frame (array of bulk strings)
    ///
    /// ```
    /// use redis_local_proxy::protocol::Frame;
    ///
    /// let frame = Frame::command(["SELECT", "3"]);
    /// assert_eq!(frame.to_bytes().as_ref(), b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n");
    /// ```
    #[must_use]
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::Array(
            parts
                .into_iter()
                .map(|p| Self::Bulk(Bytes::copy_from_slice(p.as_ref())))
                .collect(),
        )
    }

    /// `+OK`
    #[must_use]
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// Error reply with the given message (without the leading `-`)
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Borrow the payload of a bulk or simple string
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(b) => Some(b),
            Self::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Whether this is an error reply
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check whether a complete frame can be decoded from `src`
    ///
    /// With `allow_inline` set the bytes are treated as a client request:
    /// inline commands (`PING\r\n`) are accepted at the top level, array
    /// elements must be bulk strings and lines are capped at 64KB. On
    /// success `src` is left just past the frame.
    pub fn check(src: &mut Cursor<&[u8]>, allow_inline: bool) -> Result<(), ProtocolError> {
        let start = usize::try_from(src.position()).unwrap_or(usize::MAX);
        let buf = src.get_ref().get(start..).unwrap_or(&[]);
        let len = FrameScanner::default().scan(buf, allow_inline)?;
        src.set_position((start + len) as u64);
        Ok(())
    }

    /// Decode a frame that `check` has already validated
    pub fn parse(src: &mut Cursor<&[u8]>, allow_inline: bool) -> Result<Frame, ProtocolError> {
        Self::parse_nested(src, allow_inline, 0)
    }

    /// `depth` counts the arrays enclosing the frame at `src`
    fn parse_nested(
        src: &mut Cursor<&[u8]>,
        allow_inline: bool,
        depth: usize,
    ) -> Result<Frame, ProtocolError> {
        match get_u8(src)? {
            b'+' => Ok(Frame::Simple(line_string(get_line(src)?))),
            b'-' => Ok(Frame::Error(line_string(get_line(src)?))),
            b':' => Ok(Frame::Integer(decimal(get_line(src)?)?)),
            b'$' => match length_prefix(get_line(src)?, MAX_BULK_LEN)? {
                None => Ok(Frame::Null),
                Some(len) => {
                    if src.remaining() < len + 2 {
                        return Err(ProtocolError::Incomplete);
                    }
                    let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                    src.advance(len);
                    if get_u8(src)? != b'\r' || get_u8(src)? != b'\n' {
                        return Err(ProtocolError::Invalid(
                            "bulk string not terminated by CRLF".to_string(),
                        ));
                    }
                    Ok(Frame::Bulk(data))
                }
            },
            b'*' => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(ProtocolError::TooDeep {
                        limit: MAX_NESTING_DEPTH,
                    });
                }
                match length_prefix(get_line(src)?, MAX_ARRAY_LEN)? {
                    None => Ok(Frame::NullArray),
                    Some(len) => {
                        let mut items = Vec::with_capacity(len.min(1024));
                        for _ in 0..len {
                            items.push(Self::parse_nested(src, false, depth + 1)?);
                        }
                        Ok(Frame::Array(items))
                    }
                }
            }
            _ if allow_inline && depth == 0 => {
                src.set_position(src.position() - 1);
                let line = get_inline_line(src)?;
                Ok(Frame::Array(
                    line.split(|b| b.is_ascii_whitespace())
                        .filter(|part| !part.is_empty())
                        .map(|part| Frame::Bulk(Bytes::copy_from_slice(part)))
                        .collect(),
                ))
            }
            other => Err(ProtocolError::Invalid(format!(
                "unexpected type byte {other:#04x}"
            ))),
        }
    }

    /// Append the wire encoding of this frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(i) => {
                dst.put_u8(b':');
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                dst.put_slice(data.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::NullArray => dst.put_slice(b"*-1\r\n"),
            Frame::Array(items) => {
                dst.put_u8(b'*');
                dst.put_slice(items.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Encode into a fresh buffer
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Resumable framing state for one stream
///
/// Walks a buffered frame element by element without recursion. When the
/// buffer runs out, the position of the first unfinished element (and how
/// far its line terminator was searched for) is kept, so the next call
/// with the same buffer plus newly read bytes carries on from there.
#[derive(Debug, Default)]
pub(crate) struct FrameScanner {
    /// Start of the first element not yet fully buffered
    offset: usize,
    /// Position up to which no line terminator was found
    searched: usize,
    /// Elements still expected by each open array, innermost last
    open: Vec<usize>,
}

impl FrameScanner {
    /// Length of the complete frame at the start of `buf`
    ///
    /// Any result other than [`ProtocolError::Incomplete`] resets the state
    /// for the next frame.
    pub(crate) fn scan(&mut self, buf: &[u8], client: bool) -> Result<usize, ProtocolError> {
        let result = self.scan_elements(buf, client);
        if !matches!(result, Err(ProtocolError::Incomplete)) {
            self.offset = 0;
            self.searched = 0;
            self.open.clear();
        }
        result
    }

    fn scan_elements(&mut self, buf: &[u8], client: bool) -> Result<usize, ProtocolError> {
        let line_limit = if client { MAX_INLINE_LEN } else { MAX_BULK_LEN };

        loop {
            let start = self.offset;
            let kind = *buf.get(start).ok_or(ProtocolError::Incomplete)?;
            let nested = !self.open.is_empty();
            if client && nested && kind != b'$' {
                return Err(ProtocolError::Invalid(format!(
                    "request arguments must be bulk strings, got type byte {kind:#04x}"
                )));
            }

            let end = match kind {
                b'+' | b'-' => self.line(buf, start + 1, line_limit)?.1,
                b':' => {
                    let (line, end) = self.line(buf, start + 1, line_limit)?;
                    decimal(line)?;
                    end
                }
                b'$' => {
                    let (line, end) = self.line(buf, start + 1, line_limit)?;
                    match length_prefix(line, MAX_BULK_LEN)? {
                        None => end,
                        Some(len) if buf.len() >= end + len + 2 => end + len + 2,
                        Some(_) => return Err(ProtocolError::Incomplete),
                    }
                }
                b'*' => {
                    if self.open.len() >= MAX_NESTING_DEPTH {
                        return Err(ProtocolError::TooDeep {
                            limit: MAX_NESTING_DEPTH,
                        });
                    }
                    let (line, end) = self.line(buf, start + 1, line_limit)?;
                    match length_prefix(line, MAX_ARRAY_LEN)? {
                        None | Some(0) => end,
                        Some(len) => {
                            self.open.push(len);
                            self.advance(end);
                            continue;
                        }
                    }
                }
                _ if client && !nested => self.inline_line(buf, start)?,
                other => {
                    return Err(ProtocolError::Invalid(format!(
                        "unexpected type byte {other:#04x}"
                    )));
                }
            };
            self.advance(end);

            // A finished element may finish its enclosing arrays too
            loop {
                match self.open.last_mut() {
                    None => return Ok(self.offset),
                    Some(remaining) if *remaining > 1 => {
                        *remaining -= 1;
                        break;
                    }
                    Some(_) => {
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn advance(&mut self, to: usize) {
        self.offset = to;
        self.searched = to;
    }

    /// CRLF-terminated line starting at `from`, and the position after it
    fn line<'a>(
        &mut self,
        buf: &'a [u8],
        from: usize,
        limit: usize,
    ) -> Result<(&'a [u8], usize), ProtocolError> {
        let search_from = from.max(self.searched);
        let rest = buf.get(search_from..).unwrap_or(&[]);

        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(i) => {
                let cr = search_from + i;
                check_line_len(cr - from, limit)?;
                Ok((&buf[from..cr], cr + 2))
            }
            None => {
                check_line_len(buf.len().saturating_sub(from), limit)?;
                // A trailing `\r` may still be completed by the next read
                self.searched = buf.len().saturating_sub(1).max(from);
                Err(ProtocolError::Incomplete)
            }
        }
    }

    /// Inline command line starting at `from`; a bare LF terminates it
    fn inline_line(&mut self, buf: &[u8], from: usize) -> Result<usize, ProtocolError> {
        let search_from = from.max(self.searched);
        let rest = buf.get(search_from..).unwrap_or(&[]);

        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let newline = search_from + i;
                check_line_len(newline - from, MAX_INLINE_LEN)?;
                Ok(newline + 1)
            }
            None => {
                check_line_len(buf.len().saturating_sub(from), MAX_INLINE_LEN)?;
                self.searched = buf.len().max(from);
                Err(ProtocolError::Incomplete)
            }
        }
    }
}

fn check_line_len(len: usize, limit: usize) -> Result<(), ProtocolError> {
    if len > limit {
        return Err(ProtocolError::TooLarge { len, limit });
    }
    Ok(())
}

fn line_string(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

/// Read a CRLF-terminated line, returning it without the terminator
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let rest = buf.get(start..).unwrap_or(&[]);

    let cr = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ProtocolError::Incomplete)?;
    src.set_position((start + cr + 2) as u64);
    Ok(&rest[..cr])
}

/// Inline commands may be terminated by a bare LF
fn get_inline_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let rest = buf.get(start..).unwrap_or(&[]);

    let newline = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ProtocolError::Incomplete)?;
    src.set_position((start + newline + 1) as u64);
    let line = &rest[..newline];
    Ok(line.strip_suffix(b"\r").unwrap_or(line))
}

fn decimal(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::Invalid(format!("invalid integer {:?}", line_string(line))))
}

/// `-1` means null; any other negative length is malformed
fn length_prefix(line: &[u8], limit: usize) -> Result<Option<usize>, ProtocolError> {
    match decimal(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(ProtocolError::Invalid(format!("negative length {n}"))),
        n => {
            let len = usize::try_from(n)
                .map_err(|_| ProtocolError::Invalid(format!("length {n} out of range")))?;
            if len > limit {
                return Err(ProtocolError::TooLarge { len, limit });
            }
            Ok(Some(len))
        }
    }
}
