//! Command Registry and Dispatch
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandRegistry                         │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   lookup    │───>│ arity check │───>│   handler   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         │                  │                  │             │
//! │         ▼                  ▼                  ▼             │
//! │   -ERR unknown      -ERR wrong number     reply writes      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is filled before the server starts and is read-only while it
//! serves, so lookups need no locking.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::{ProtocolError, Request};

/// What the connection should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Flush the reply and read the next request
    Continue,
    /// Flush the reply (best effort) and close the connection
    Close,
}

/// A handler failure. Always fatal to the connection that ran the command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command {0} already registered")]
    DuplicateCommand(String),
}

/// The future returned by a command handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Outcome, CommandError>> + Send + 'a>>;

/// Executes one command against its [`Request`].
///
/// The handler reads its arguments and writes its reply through the request.
/// Returning `Err` drops the connection.
pub trait CommandHandler: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut Request<'_>) -> HandlerFuture<'a>;
}

/// Bounds on the number of arguments a command accepts (the name excluded).
///
/// `None` leaves that side unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self {
            min: Some(n),
            max: Some(n),
        }
    }

    pub const fn at_least(n: usize) -> Self {
        Self {
            min: Some(n),
            max: None,
        }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub const fn any() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        self.min.map_or(true, |min| count >= min) && self.max.map_or(true, |max| count <= max)
    }
}

/// A registered command: arity bounds plus handler.
#[derive(Clone)]
pub struct Command {
    pub arity: Arity,
    pub handler: Arc<dyn CommandHandler>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(arity: Arity, handler: impl CommandHandler + 'static) -> Self {
        Self {
            arity,
            handler: Arc::new(handler),
        }
    }
}

/// Maps uppercase command names to commands.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `command` under `name` (case-insensitive).
    ///
    /// Each name can be registered once.
    pub fn register(&mut self, name: &str, command: Command) -> Result<(), RegistryError> {
        let name = name.to_ascii_uppercase();
        if self.commands.contains_key(&name) {
            return Err(RegistryError::DuplicateCommand(name));
        }
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Resolves, arity-checks and runs one request.
    ///
    /// Unknown commands and arity violations are answered with an error reply
    /// and do not end the connection. Arguments a handler leaves unread are
    /// discarded so the next request starts on a clean line.
    pub async fn dispatch(&self, request: &mut Request<'_>) -> Result<Outcome, CommandError> {
        let command = match self.commands.get(request.name()) {
            Some(command) => command,
            None => {
                let message = format!("ERR unknown command '{}'", request.name());
                request.write_error(&message).await?;
                return Ok(Outcome::Continue);
            }
        };

        if !command.arity.accepts(request.arg_count()) {
            let message = format!(
                "ERR wrong number of arguments for '{}' command",
                request.name()
            );
            request.write_error(&message).await?;
            return Ok(Outcome::Continue);
        }

        let outcome = command.handler.call(request).await?;
        if outcome == Outcome::Continue {
            request.discard_args().await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_request, ReplyBuffer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with its first argument and counts its invocations.
    #[derive(Default)]
    struct FirstArg {
        calls: AtomicUsize,
    }

    impl CommandHandler for Arc<FirstArg> {
        fn call<'a>(&'a self, request: &'a mut Request<'_>) -> HandlerFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let arg = request.read_arg().await?;
                request.write_bulk_string(&arg);
                Ok(Outcome::Continue)
            })
        }
    }

    struct Broken;

    impl CommandHandler for Broken {
        fn call<'a>(&'a self, _request: &'a mut Request<'_>) -> HandlerFuture<'a> {
            Box::pin(async { Err(CommandError::Failed("broken".to_string())) })
        }
    }

    fn registry(first: &Arc<FirstArg>) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry
            .register("first", Command::new(Arity::at_least(1), Arc::clone(first)))
            .unwrap();
        registry
            .register("BROKEN", Command::new(Arity::any(), Broken))
            .unwrap();
        registry
    }

    /// Dispatches every request in `input` and returns the replies.
    async fn run(registry: &CommandRegistry, mut input: &[u8]) -> (Vec<u8>, Vec<Outcome>) {
        let mut reply = ReplyBuffer::new();
        let mut outcomes = Vec::new();

        while let Ok(line) = decode_request(&mut input).await {
            let Some(line) = line else { continue };
            let mut request = Request::new(3, line, &mut input, &mut reply);
            match registry.dispatch(&mut request).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => break,
            }
        }

        (reply.as_bytes().to_vec(), outcomes)
    }

    #[test]
    fn test_arity_bounds() {
        assert!(Arity::exactly(1).accepts(1));
        assert!(!Arity::exactly(1).accepts(0));
        assert!(!Arity::exactly(1).accepts(2));
        assert!(Arity::at_least(2).accepts(100));
        assert!(!Arity::at_least(2).accepts(1));
        assert!(Arity::between(1, 3).accepts(3));
        assert!(!Arity::between(1, 3).accepts(4));
        assert!(Arity::any().accepts(0));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let first = Arc::new(FirstArg::default());
        let mut registry = registry(&first);

        assert_eq!(
            registry.register("First", Command::new(Arity::any(), Broken)),
            Err(RegistryError::DuplicateCommand("FIRST".to_string()))
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("FIRST"));
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, outcomes) = run(&registry, b"*2\r\n$5\r\nFIRST\r\n$2\r\nhi\r\n").await;
        assert_eq!(reply, b"$2\r\nhi\r\n");
        assert_eq!(outcomes, vec![Outcome::Continue]);
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection_usable() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, outcomes) = run(
            &registry,
            b"*2\r\n$4\r\nnope\r\n$1\r\nx\r\nFIRST ok\r\n",
        )
        .await;
        assert_eq!(reply, b"-ERR unknown command 'NOPE'\r\n$2\r\nok\r\n");
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_name_with_line_breaks_is_one_reply() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, outcomes) = run(
            &registry,
            b"*1\r\n$6\r\nA\r\n+X!\r\nFIRST ok\r\n",
        )
        .await;
        assert_eq!(reply, b"-ERR unknown command 'A  +X!'\r\n$2\r\nok\r\n");
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_arity_violation_skips_handler() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, _) = run(&registry, b"*1\r\n$5\r\nFIRST\r\n").await;
        assert_eq!(
            reply,
            b"-ERR wrong number of arguments for 'FIRST' command\r\n"
        );
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unread_arguments_are_discarded() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, outcomes) = run(
            &registry,
            b"*4\r\n$5\r\nFIRST\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n*2\r\n$5\r\nFIRST\r\n$1\r\nz\r\n",
        )
        .await;
        assert_eq!(reply, b"$1\r\na\r\n$1\r\nz\r\n");
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_handler_failure_is_returned() {
        let first = Arc::new(FirstArg::default());
        let registry = registry(&first);

        let (reply, outcomes) = run(&registry, b"BROKEN\r\nFIRST never\r\n").await;
        assert!(reply.is_empty());
        assert!(outcomes.is_empty());
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
    }
}
