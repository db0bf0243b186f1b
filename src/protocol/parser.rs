//! RESP Request Decoder
//!
//! Requests are decoded incrementally from a buffered reader. Only the head
//! of a request is read up front: the command name, plus the argument count for
//! the counted form. Command handlers pull the remaining arguments through an
//! [`ArgSource`] as they need them.
//!
//! ## Request Forms
//!
//! ```text
//! Counted (multi-bulk):   *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! Inline:                 SET key value\r\n
//! ```
//!
//! Both `\r\n` and a bare `\n` end a line. An empty line is not a request; the
//! decoder reports it as `Ok(None)` and the caller simply reads again.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::protocol::types::prefix;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of one protocol line, including inline commands (64 KB)
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Errors raised while decoding a request or reading its arguments.
///
/// Apart from [`NoMoreArguments`](ProtocolError::NoMoreArguments), all of these
/// leave the stream in an unknown position, so the connection must be closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the stream between requests
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The stream ended in the middle of a request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The first byte of a request is neither `*` nor an ASCII letter
    #[error("command string invalid")]
    InvalidCommandLine,

    /// The argument count of a counted request is not a positive integer
    #[error("invalid multibulk length: {0}")]
    InvalidMultiBulkLength(String),

    /// A counted argument does not start with `$`
    #[error("prefix of bulk string error")]
    InvalidBulkPrefix,

    /// A bulk string length is not a non-negative integer
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(String),

    /// A bulk string exceeds [`MAX_BULK_SIZE`]
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    /// Bulk string payload not followed by a line terminator
    #[error("bulk string missing trailing line terminator")]
    MissingTerminator,

    /// A line exceeds [`MAX_LINE_SIZE`]
    #[error("protocol line too long (max: {0} bytes)")]
    LineTooLong(usize),

    /// A handler asked for more arguments than the request carries
    #[error("no more arguments")]
    NoMoreArguments,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The decoded head of one request.
#[derive(Debug)]
pub struct CommandLine {
    /// Uppercased command name
    pub name: String,
    /// The arguments after the name, not necessarily read yet
    pub args: ArgSource,
}

/// Where the arguments of a request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSource {
    /// Multi-bulk request: this many bulk strings are still on the wire
    Counted { remaining: usize },
    /// Inline request: every token was already split from the line
    Inline(VecDeque<Bytes>),
}

impl ArgSource {
    /// Number of arguments not consumed yet.
    pub fn remaining(&self) -> usize {
        match self {
            ArgSource::Counted { remaining } => *remaining,
            ArgSource::Inline(args) => args.len(),
        }
    }

    /// Reads the next `count` arguments.
    ///
    /// Fails with [`ProtocolError::NoMoreArguments`] without consuming
    /// anything if fewer than `count` remain.
    pub async fn read<R>(&mut self, reader: &mut R, count: usize) -> Result<Vec<Bytes>, ProtocolError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        if count > self.remaining() {
            return Err(ProtocolError::NoMoreArguments);
        }

        match self {
            ArgSource::Counted { remaining } => {
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(read_bulk_string(reader).await?);
                    *remaining -= 1;
                }
                Ok(args)
            }
            ArgSource::Inline(args) => Ok(args.drain(..count).collect()),
        }
    }

    /// Consumes every remaining argument, keeping the stream in sync.
    pub async fn discard<R>(&mut self, reader: &mut R) -> Result<(), ProtocolError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        match self {
            ArgSource::Counted { remaining } => {
                while *remaining > 0 {
                    read_bulk_string(reader).await?;
                    *remaining -= 1;
                }
            }
            ArgSource::Inline(args) => args.clear(),
        }
        Ok(())
    }
}

/// Reads one line and strips its `\n` or `\r\n` terminator.
///
/// Returns [`ProtocolError::ConnectionClosed`] if the stream is already at its
/// end, and [`ProtocolError::UnexpectedEof`] if it ends mid-line.
pub async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    // Room for the content plus a `\r\n` terminator
    let n = (&mut *reader)
        .take(MAX_LINE_SIZE as u64 + 2)
        .read_until(b'\n', &mut line)
        .await?;

    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if line.last() != Some(&b'\n') {
        if line.len() > MAX_LINE_SIZE {
            return Err(ProtocolError::LineTooLong(MAX_LINE_SIZE));
        }
        return Err(ProtocolError::UnexpectedEof);
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::LineTooLong(MAX_LINE_SIZE));
    }
    Ok(line)
}

/// Reads one length-prefixed bulk string: `$<len>\r\n<len bytes>\r\n`.
pub async fn read_bulk_string<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let line = read_line(reader).await.map_err(mid_request)?;

    if line.first() != Some(&prefix::BULK_STRING) {
        return Err(ProtocolError::InvalidBulkPrefix);
    }
    let length = parse_decimal(&line[1..])
        .filter(|n| *n >= 0)
        .ok_or_else(|| ProtocolError::InvalidBulkLength(lossy(&line[1..])))? as usize;
    if length > MAX_BULK_SIZE {
        return Err(ProtocolError::BulkTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let mut data = vec![0u8; length];
    reader.read_exact(&mut data).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof,
        _ => ProtocolError::Io(e),
    })?;

    if !read_line(reader).await.map_err(mid_request)?.is_empty() {
        return Err(ProtocolError::MissingTerminator);
    }

    Ok(Bytes::from(data))
}

/// Decodes the head of the next request.
///
/// # Returns
///
/// - `Ok(Some(line))` - a request; counted arguments are still unread
/// - `Ok(None)` - an empty line, nothing to execute
/// - `Err(e)` - the stream ended or is not valid RESP
pub async fn decode_request<R>(reader: &mut R) -> Result<Option<CommandLine>, ProtocolError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let line = read_line(reader).await?;

    match line.first() {
        None => Ok(None),
        Some(&prefix::ARRAY) => {
            let argc = parse_decimal(&line[1..])
                .filter(|n| *n >= 1)
                .ok_or_else(|| ProtocolError::InvalidMultiBulkLength(lossy(&line[1..])))?;

            let name = read_bulk_string(reader).await?;
            Ok(Some(CommandLine {
                name: uppercase(&name),
                args: ArgSource::Counted {
                    remaining: (argc - 1) as usize,
                },
            }))
        }
        Some(first) if first.is_ascii_alphabetic() => {
            let mut tokens: VecDeque<Bytes> = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|token| !token.is_empty())
                .map(Bytes::copy_from_slice)
                .collect();

            // A leading letter guarantees at least one token
            let name = tokens.pop_front().unwrap_or_default();
            Ok(Some(CommandLine {
                name: uppercase(&name),
                args: ArgSource::Inline(tokens),
            }))
        }
        Some(_) => Err(ProtocolError::InvalidCommandLine),
    }
}

/// A clean end of stream inside a request is still a truncated request.
fn mid_request(e: ProtocolError) -> ProtocolError {
    match e {
        ProtocolError::ConnectionClosed => ProtocolError::UnexpectedEof,
        other => other,
    }
}

fn parse_decimal(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn uppercase(name: &[u8]) -> String {
    String::from_utf8_lossy(&name.to_ascii_uppercase()).into_owned()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
