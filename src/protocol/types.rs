//! RESP Reply Serialization
//!
//! Each RESP reply starts with a type prefix byte and ends with CRLF:
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, null bulk string `$-1\r\n`
//! - `*` Array header: `*2\r\n`, followed by the elements
//!
//! Replies are accumulated in a [`ReplyBuffer`] and written to the socket in
//! one go when the connection flushes.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Wire form of a null bulk string. Null arrays use the same bytes.
pub const NULL_BULK: &[u8] = b"$-1\r\n";

const INITIAL_CAPACITY: usize = 4096;

/// Buffered reply writer for one connection.
///
/// Every method appends one complete RESP token. Arrays are written as a
/// length header followed by separate calls for each element.
///
/// # Example
///
/// ```
/// use kvwire::protocol::ReplyBuffer;
///
/// let mut reply = ReplyBuffer::new();
/// reply.array_len(2);
/// reply.bulk_string(b"hello");
/// reply.integer(42);
/// assert_eq!(reply.as_bytes(), b"*2\r\n$5\r\nhello\r\n:42\r\n");
/// ```
#[derive(Debug)]
pub struct ReplyBuffer {
    buf: BytesMut,
}

impl Default for ReplyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Writes `:<n>\r\n`.
    pub fn integer(&mut self, n: i64) {
        self.header(prefix::INTEGER, n);
    }

    /// Writes `+<text>\r\n`.
    ///
    /// CR and LF in `text` are written as spaces.
    pub fn simple_string(&mut self, text: &str) {
        self.line(prefix::SIMPLE_STRING, text.as_bytes());
    }

    /// Writes `$<len>\r\n<data>\r\n`. Binary safe.
    pub fn bulk_string(&mut self, data: &[u8]) {
        self.header(prefix::BULK_STRING, data.len() as i64);
        self.buf.put_slice(data);
        self.buf.put_slice(CRLF);
    }

    /// Writes `$-1\r\n`.
    pub fn null_bulk_string(&mut self) {
        self.buf.put_slice(NULL_BULK);
    }

    /// Writes the `*<len>\r\n` header of an array.
    pub fn array_len(&mut self, len: usize) {
        self.header(prefix::ARRAY, len as i64);
    }

    /// Writes a null array, encoded like a null bulk string.
    pub fn null_array(&mut self) {
        self.buf.put_slice(NULL_BULK);
    }

    /// Writes `-<message>\r\n`.
    ///
    /// CR and LF in `message` are written as spaces, so echoed client input
    /// cannot end the frame early.
    pub fn error(&mut self, message: &str) {
        self.line(prefix::ERROR, message.as_bytes());
    }

    fn header(&mut self, prefix: u8, n: i64) {
        self.buf.put_u8(prefix);
        // Writing into a BytesMut cannot fail
        let _ = write!(self.buf, "{}", n);
        self.buf.put_slice(CRLF);
    }

    fn line(&mut self, prefix: u8, content: &[u8]) {
        self.buf.put_u8(prefix);
        self.buf.extend(
            content
                .iter()
                .map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
        );
        self.buf.put_slice(CRLF);
    }

    /// The bytes written since the last [`take`](Self::take).
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Removes and returns everything written so far, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
