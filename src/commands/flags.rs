//! Declarative flag-argument parsing
//!
//! Commands with optional modifiers (for example `SET key value NX EX 10`)
//! declare their flags once as a [`FlagSet`] and let the parser consume the
//! trailing arguments. A flag is either a bare switch or an option that takes
//! the next argument as its value. Flags in the same exclusivity group cannot
//! both appear.
//!
//! Each flag turns into an *effect* of a type chosen by the command. Parsing
//! yields the effects in argument order, and the command folds them into its
//! own state.
//!
//! ```text
//! NX  EX 10          tokens
//!  │   │  │
//!  │   └──┴──> Ttl(10s)
//!  └─────────> IfAbsent
//! ```

use std::collections::HashMap;
use thiserror::Error;

use crate::protocol::{ProtocolError, Request};

/// Errors produced while parsing flags.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("unexpected flag: {0}")]
    UnexpectedFlag(String),

    #[error("flag {0} can not occur with some other argument at same time")]
    ConflictingFlag(String),

    #[error("flag {0} needs a value but it is absent")]
    MissingValue(String),

    #[error("invalid flag value: {0}")]
    InvalidValue(String),

    /// Reading the flag tokens themselves failed; fatal to the connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Turns a flag's value (`None` for switches) into an effect.
pub type Receiver<E> = fn(Option<&[u8]>) -> Result<E, FlagError>;

/// Declaration of a single flag.
#[derive(Clone)]
pub struct Flag<G, E> {
    needs_value: bool,
    group: Option<G>,
    receive: Receiver<E>,
}

impl<G: std::fmt::Debug, E> std::fmt::Debug for Flag<G, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flag")
            .field("needs_value", &self.needs_value)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// The flags a command accepts, keyed by their uppercase token.
///
/// `G` tags exclusivity groups, `E` is the effect type.
#[derive(Clone)]
pub struct FlagSet<G, E> {
    flags: HashMap<String, Flag<G, E>>,
}

impl<G: std::fmt::Debug, E> std::fmt::Debug for FlagSet<G, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.flags.iter()).finish()
    }
}

impl<G, E> Default for FlagSet<G, E> {
    fn default() -> Self {
        Self {
            flags: HashMap::new(),
        }
    }
}

impl<G, E> FlagSet<G, E>
where
    G: Copy + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a flag that takes no value.
    pub fn switch(self, name: &str, group: Option<G>, receive: Receiver<E>) -> Self {
        self.with_flag(name, false, group, receive)
    }

    /// Declares a flag whose value is the following argument.
    pub fn option(self, name: &str, group: Option<G>, receive: Receiver<E>) -> Self {
        self.with_flag(name, true, group, receive)
    }

    fn with_flag(mut self, name: &str, needs_value: bool, group: Option<G>, receive: Receiver<E>) -> Self {
        self.flags.insert(
            name.to_ascii_uppercase(),
            Flag {
                needs_value,
                group,
                receive,
            },
        );
        self
    }

    /// Starts a parse over these flags.
    pub fn parser(&self) -> FlagParser<'_, G, E> {
        FlagParser {
            set: self,
            seen_groups: Vec::new(),
            pending: None,
            effects: Vec::new(),
        }
    }

    /// Consumes every remaining argument of `request` as flags.
    ///
    /// On a flag error, the arguments after the offending one stay unread.
    /// Writing the error reply discards them.
    pub async fn parse(&self, request: &mut Request<'_>) -> Result<Vec<E>, FlagError> {
        let mut parser = self.parser();
        while request.arg_count() > 0 {
            let arg = request.read_arg().await?;
            parser.feed(&arg)?;
        }
        parser.finish()
    }
}

/// Parsing state over one argument list.
pub struct FlagParser<'f, G, E> {
    set: &'f FlagSet<G, E>,
    seen_groups: Vec<G>,
    pending: Option<(String, &'f Flag<G, E>)>,
    effects: Vec<E>,
}

impl<'f, G, E> FlagParser<'f, G, E>
where
    G: Copy + PartialEq,
{
    /// Feeds the next argument.
    pub fn feed(&mut self, arg: &[u8]) -> Result<(), FlagError> {
        if let Some((_, flag)) = self.pending.take() {
            self.effects.push((flag.receive)(Some(arg))?);
            return Ok(());
        }

        let token = String::from_utf8_lossy(&arg.to_ascii_uppercase()).into_owned();
        let flag = match self.set.flags.get(&token) {
            Some(flag) => flag,
            None => return Err(FlagError::UnexpectedFlag(token)),
        };

        if let Some(group) = flag.group {
            if self.seen_groups.contains(&group) {
                return Err(FlagError::ConflictingFlag(token));
            }
            self.seen_groups.push(group);
        }

        if flag.needs_value {
            self.pending = Some((token, flag));
        } else {
            self.effects.push((flag.receive)(None)?);
        }
        Ok(())
    }

    /// Ends the parse, failing if the last flag is still waiting for its value.
    pub fn finish(self) -> Result<Vec<E>, FlagError> {
        match self.pending {
            Some((token, _)) => Err(FlagError::MissingValue(token)),
            None => Ok(self.effects),
        }
    }
}

/// Parses a flag value as a signed decimal integer.
pub fn parse_integer(value: Option<&[u8]>) -> Result<i64, FlagError> {
    let raw = value.unwrap_or_default();
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FlagError::InvalidValue(String::from_utf8_lossy(raw).into_owned()))
}
