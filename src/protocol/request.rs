//! Per-command request object
//!
//! A [`Request`] lives for exactly one request/reply cycle. It borrows the
//! connection's reader (counted arguments are still on the wire) and its reply
//! buffer. Nothing written through it reaches the socket until the connection
//! flushes.

use bytes::Bytes;
use tokio::io::AsyncBufRead;

use crate::protocol::parser::{ArgSource, CommandLine, ProtocolError};
use crate::protocol::types::ReplyBuffer;

/// The reader type requests pull their arguments from.
pub type ArgReader<'r> = dyn AsyncBufRead + Unpin + Send + 'r;

/// One decoded command invocation.
pub struct Request<'c> {
    client_id: u64,
    name: String,
    args: ArgSource,
    reader: &'c mut ArgReader<'c>,
    reply: &'c mut ReplyBuffer,
}

impl std::fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl<'c> Request<'c> {
    pub fn new(
        client_id: u64,
        line: CommandLine,
        reader: &'c mut ArgReader<'c>,
        reply: &'c mut ReplyBuffer,
    ) -> Self {
        Self {
            client_id,
            name: line.name,
            args: line.args,
            reader,
            reply,
        }
    }

    /// The uppercased command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the connection that sent this request.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Number of arguments not read yet.
    pub fn arg_count(&self) -> usize {
        self.args.remaining()
    }

    /// Reads the next `count` arguments.
    pub async fn read_args(&mut self, count: usize) -> Result<Vec<Bytes>, ProtocolError> {
        self.args.read(&mut *self.reader, count).await
    }

    /// Reads the next argument.
    pub async fn read_arg(&mut self) -> Result<Bytes, ProtocolError> {
        let mut args = self.read_args(1).await?;
        args.pop().ok_or(ProtocolError::NoMoreArguments)
    }

    /// Consumes all unread arguments.
    pub async fn discard_args(&mut self) -> Result<(), ProtocolError> {
        self.args.discard(&mut *self.reader).await
    }

    pub fn write_integer(&mut self, n: i64) {
        self.reply.integer(n);
    }

    pub fn write_simple_string(&mut self, text: &str) {
        self.reply.simple_string(text);
    }

    pub fn write_bulk_string(&mut self, data: &[u8]) {
        self.reply.bulk_string(data);
    }

    pub fn write_null_bulk_string(&mut self) {
        self.reply.null_bulk_string();
    }

    /// Writes an array header; the elements follow as separate writes.
    pub fn write_array_len(&mut self, len: usize) {
        self.reply.array_len(len);
    }

    pub fn write_null_array(&mut self) {
        self.reply.null_array();
    }

    /// Discards the unread arguments, then writes `-<message>`.
    pub async fn write_error(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.discard_args().await?;
        self.reply.error(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::decode_request;

    #[tokio::test]
    async fn test_error_reply_discards_arguments() {
        let mut input: &[u8] = b"*3\r\n$3\r\nFOO\r\n$1\r\na\r\n$1\r\nb\r\n+next";
        let mut reply = ReplyBuffer::new();
        let line = decode_request(&mut input).await.unwrap().unwrap();

        let mut request = Request::new(7, line, &mut input, &mut reply);
        assert_eq!(request.name(), "FOO");
        assert_eq!(request.client_id(), 7);
        assert_eq!(request.arg_count(), 2);

        request.write_error("ERR nope").await.unwrap();
        assert_eq!(request.arg_count(), 0);
        drop(request);

        assert_eq!(reply.as_bytes(), b"-ERR nope\r\n");
        assert_eq!(input, b"+next");
    }

    #[tokio::test]
    async fn test_reply_writes_are_buffered_in_order() {
        let mut input: &[u8] = b"LIST a\r\n";
        let mut reply = ReplyBuffer::new();
        let line = decode_request(&mut input).await.unwrap().unwrap();

        let mut request = Request::new(3, line, &mut input, &mut reply);
        assert_eq!(request.read_arg().await.unwrap(), Bytes::from("a"));
        assert!(matches!(
            request.read_arg().await,
            Err(ProtocolError::NoMoreArguments)
        ));

        request.write_array_len(4);
        request.write_integer(1);
        request.write_simple_string("two");
        request.write_bulk_string(b"three");
        request.write_null_bulk_string();
        request.write_null_array();
        drop(request);

        assert_eq!(
            reply.as_bytes(),
            b"*4\r\n:1\r\n+two\r\n$5\r\nthree\r\n$-1\r\n$-1\r\n"
        );
    }
}
