//! RESP Protocol Implementation
//!
//! The server side of the Redis Serialization Protocol: decoding client
//! requests in either the counted (multi-bulk) or inline form, and
//! serializing replies.
//!
//! ## Modules
//!
//! - `parser`: line and bulk-string reading, request decoding, argument sources
//! - `request`: the per-command [`Request`] handed to command handlers
//! - `types`: reply serialization into a [`ReplyBuffer`]
//!
//! ## Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use kvwire::protocol::{decode_request, ReplyBuffer, Request};
//!
//! let mut input: &[u8] = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let mut reply = ReplyBuffer::new();
//!
//! let line = decode_request(&mut input).await.unwrap().unwrap();
//! let mut request = Request::new(3, line, &mut input, &mut reply);
//! assert_eq!(request.name(), "GET");
//!
//! let key = request.read_arg().await.unwrap();
//! assert_eq!(&key[..], b"name");
//! request.write_null_bulk_string();
//! # });
//! ```

pub mod parser;
pub mod request;
pub mod types;

pub use parser::{decode_request, ArgSource, CommandLine, ProtocolError};
pub use request::{ArgReader, Request};
pub use types::ReplyBuffer;
