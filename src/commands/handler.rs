//! String command handlers
//!
//! ## Supported Commands
//!
//! - `GET key` - Get a key's value
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]` - Set a key
//! - `QUIT` - Close the connection
//!
//! `QUIT` is registered by [`Server::new`](crate::server::Server::new); the
//! string commands are registered through [`register_string_commands`].

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::commands::flags::{parse_integer, FlagError, FlagSet};
use crate::commands::registry::{Arity, Command, CommandError, CommandHandler, HandlerFuture, Outcome};
use crate::protocol::{ProtocolError, Request};
use crate::server::{Server, ServerError};
use crate::storage::{ExpiringStore, SetCondition};

/// GET key
#[derive(Debug, Clone)]
pub struct GetCommand {
    store: Arc<ExpiringStore>,
}

impl GetCommand {
    pub fn new(store: Arc<ExpiringStore>) -> Self {
        Self { store }
    }

    async fn run(&self, request: &mut Request<'_>) -> Result<Outcome, CommandError> {
        let key = request.read_arg().await?;

        match self.store.load(&key) {
            Some(value) => request.write_bulk_string(&value),
            None => request.write_null_bulk_string(),
        }
        Ok(Outcome::Continue)
    }
}

impl CommandHandler for GetCommand {
    fn call<'a>(&'a self, request: &'a mut Request<'_>) -> HandlerFuture<'a> {
        Box::pin(self.run(request))
    }
}

/// Exclusivity groups of the SET flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetGroup {
    /// NX | XX
    Condition,
    /// EX | PX
    Expiry,
}

/// Effect of one SET flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOption {
    Condition(SetCondition),
    Ttl(Duration),
}

/// Negative EX/PX counts are clamped to zero, which expires the key at once.
fn non_negative(count: i64) -> u64 {
    count.max(0).unsigned_abs()
}

fn set_flags() -> FlagSet<SetGroup, SetOption> {
    FlagSet::new()
        .switch("NX", Some(SetGroup::Condition), |_| {
            Ok(SetOption::Condition(SetCondition::IfAbsent))
        })
        .switch("XX", Some(SetGroup::Condition), |_| {
            Ok(SetOption::Condition(SetCondition::IfPresent))
        })
        .option("EX", Some(SetGroup::Expiry), |value| {
            let seconds = parse_integer(value)?;
            Ok(SetOption::Ttl(Duration::from_secs(non_negative(seconds))))
        })
        .option("PX", Some(SetGroup::Expiry), |value| {
            let millis = parse_integer(value)?;
            Ok(SetOption::Ttl(Duration::from_millis(non_negative(millis))))
        })
}

/// SET key value [NX|XX] [EX seconds|PX milliseconds]
#[derive(Debug, Clone)]
pub struct SetCommand {
    store: Arc<ExpiringStore>,
    flags: FlagSet<SetGroup, SetOption>,
}

impl SetCommand {
    pub fn new(store: Arc<ExpiringStore>) -> Self {
        Self {
            store,
            flags: set_flags(),
        }
    }

    async fn run(&self, request: &mut Request<'_>) -> Result<Outcome, CommandError> {
        let [key, value]: [Bytes; 2] = request
            .read_args(2)
            .await?
            .try_into()
            .map_err(|_| ProtocolError::NoMoreArguments)?;

        let options = match self.flags.parse(request).await {
            Ok(options) => options,
            Err(FlagError::Protocol(e)) => return Err(e.into()),
            Err(e) => {
                debug!(client_id = request.client_id(), error = %e, "SET syntax error");
                request.write_error("ERR syntax error").await?;
                return Ok(Outcome::Continue);
            }
        };

        let mut condition = SetCondition::Always;
        let mut ttl = None;
        for option in options {
            match option {
                SetOption::Condition(c) => condition = c,
                SetOption::Ttl(d) => ttl = Some(d),
            }
        }

        if self.store.store_if(key, value, ttl, condition) {
            request.write_simple_string("OK");
        } else {
            request.write_null_bulk_string();
        }
        Ok(Outcome::Continue)
    }
}

impl CommandHandler for SetCommand {
    fn call<'a>(&'a self, request: &'a mut Request<'_>) -> HandlerFuture<'a> {
        Box::pin(self.run(request))
    }
}

/// QUIT: ends the connection once the reply buffer has been flushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuitCommand;

impl CommandHandler for QuitCommand {
    fn call<'a>(&'a self, _request: &'a mut Request<'_>) -> HandlerFuture<'a> {
        Box::pin(async { Ok(Outcome::Close) })
    }
}

/// The string commands backed by `store`, with their names.
pub fn string_commands(store: Arc<ExpiringStore>) -> Vec<(&'static str, Command)> {
    vec![
        (
            "GET",
            Command::new(Arity::exactly(1), GetCommand::new(Arc::clone(&store))),
        ),
        ("SET", Command::new(Arity::at_least(2), SetCommand::new(store))),
    ]
}

/// Registers GET and SET on `server`.
pub fn register_string_commands(
    server: &mut Server,
    store: Arc<ExpiringStore>,
) -> Result<(), ServerError> {
    for (name, command) in string_commands(store) {
        server.register_command(name, command)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::registry::CommandRegistry;
    use crate::protocol::{decode_request, ReplyBuffer};

    fn create_registry() -> (CommandRegistry, Arc<ExpiringStore>) {
        let store = Arc::new(ExpiringStore::new());
        let mut registry = CommandRegistry::new();
        for (name, command) in string_commands(Arc::clone(&store)) {
            registry.register(name, command).unwrap();
        }
        registry
            .register("QUIT", Command::new(Arity::exactly(0), QuitCommand))
            .unwrap();
        (registry, store)
    }

    fn make_command(args: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
        }
        out
    }

    /// Runs one command and returns its reply and outcome.
    async fn execute(registry: &CommandRegistry, args: &[&str]) -> (Vec<u8>, Outcome) {
        let wire = make_command(args);
        let mut input: &[u8] = &wire;
        let mut reply = ReplyBuffer::new();

        let line = decode_request(&mut input).await.unwrap().unwrap();
        let mut request = Request::new(3, line, &mut input, &mut reply);
        let outcome = registry.dispatch(&mut request).await.unwrap();
        drop(request);

        assert!(input.is_empty(), "request not fully consumed");
        (reply.as_bytes().to_vec(), outcome)
    }

    async fn reply(registry: &CommandRegistry, args: &[&str]) -> Vec<u8> {
        execute(registry, args).await.0
    }

    #[tokio::test]
    async fn test_set_get() {
        let (registry, _) = create_registry();

        assert_eq!(reply(&registry, &["SET", "key", "value"]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["GET", "key"]).await, b"$5\r\nvalue\r\n");
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (registry, _) = create_registry();
        assert_eq!(reply(&registry, &["GET", "nonexistent"]).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_get_wrong_arity_does_not_touch_store() {
        let (registry, store) = create_registry();

        let expected = b"-ERR wrong number of arguments for 'GET' command\r\n";
        assert_eq!(reply(&registry, &["GET"]).await, expected);
        assert_eq!(reply(&registry, &["GET", "a", "b"]).await, expected);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_nx() {
        let (registry, _) = create_registry();

        assert_eq!(reply(&registry, &["SET", "k", "v", "NX"]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["SET", "k", "v2", "nx"]).await, b"$-1\r\n");
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_set_xx() {
        let (registry, store) = create_registry();

        assert_eq!(reply(&registry, &["SET", "k", "v", "XX"]).await, b"$-1\r\n");
        assert!(store.is_empty());

        reply(&registry, &["SET", "k", "v"]).await;
        assert_eq!(reply(&registry, &["SET", "k", "v2", "XX"]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_set_with_px_expires() {
        let (registry, _) = create_registry();

        assert_eq!(
            reply(&registry, &["SET", "k", "v", "PX", "50"]).await,
            b"+OK\r\n"
        );
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$1\r\nv\r\n");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_set_with_zero_or_negative_ttl_is_expired() {
        let (registry, _) = create_registry();

        assert_eq!(reply(&registry, &["SET", "a", "v", "EX", "0"]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["GET", "a"]).await, b"$-1\r\n");

        assert_eq!(reply(&registry, &["SET", "b", "v", "PX", "-5"]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["GET", "b"]).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_set_combined_flags() {
        let (registry, _) = create_registry();

        assert_eq!(
            reply(&registry, &["SET", "k", "v", "EX", "100", "NX"]).await,
            b"+OK\r\n"
        );
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_set_syntax_errors_store_nothing() {
        let (registry, store) = create_registry();
        let syntax_error = b"-ERR syntax error\r\n";

        for args in [
            &["SET", "k", "v", "EX", "10", "PX", "100"][..],
            &["SET", "k", "v", "NX", "XX"],
            &["SET", "k", "v", "EX"],
            &["SET", "k", "v", "EX", "ten"],
            &["SET", "k", "v", "BOGUS", "extra", "args"],
        ] {
            assert_eq!(reply(&registry, args).await, syntax_error, "{:?}", args);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_binary_value_round_trip() {
        let (registry, _) = create_registry();

        reply(&registry, &["SET", "bin", "a\r\nb c"]).await;
        assert_eq!(reply(&registry, &["GET", "bin"]).await, b"$6\r\na\r\nb c\r\n");
    }

    #[tokio::test]
    async fn test_quit_closes() {
        let (registry, _) = create_registry();

        let (bytes, outcome) = execute(&registry, &["QUIT"]).await;
        assert!(bytes.is_empty());
        assert_eq!(outcome, Outcome::Close);
    }

    #[tokio::test]
    async fn test_set_with_huge_ttl_never_expires() {
        let (registry, store) = create_registry();

        let max = i64::MAX.to_string();
        assert_eq!(reply(&registry, &["SET", "k", "v", "EX", max.as_str()]).await, b"+OK\r\n");
        assert_eq!(reply(&registry, &["GET", "k"]).await, b"$1\r\nv\r\n");
        assert_eq!(store.expired_count(), 0);
    }

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        assert_eq!(non_negative(10), 10);
        assert_eq!(non_negative(-3), 0);
        assert_eq!(non_negative(i64::MIN), 0);
    }
}
