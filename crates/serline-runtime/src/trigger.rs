#![forbid(unsafe_code)]

//! Trigger tables: what ends a line and what happens to everything else.
//!
//! A [`TriggerTable`] maps key tokens to exit codes and carries the policies
//! the event loop applies to tokens that are not triggers:
//!
//! | Key          | Meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `<token>`    | exit code returned when the token arrives            |
//! | `rest`       | `stack` inserts other characters, `ignore` drops them |
//! | `rest_a`     | character class accepted by `stack`                  |
//! | `echo`       | `all`, `common`, or `none`                           |
//! | `overflow`   | exit code when the line is full (default 0)          |
//! | `idle`       | exit code when the channel disconnects               |
//! | `prefix`     | text rendered before the line                        |
//! | `permit_pos` | whether cursor position queries may be sent          |
//!
//! Tables are built with the `with_*` builder or from string-keyed entries
//! (for example a JSON object with the `serde` feature).

use std::collections::HashMap;
use std::fmt;

use serline_core::channel::ChannelCapabilities;
use serline_core::token::{Token, TokenClass};

/// What the event loop does with non-trigger character tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestPolicy {
    /// Insert matching characters into the buffer.
    #[default]
    Stack,
    /// Drop them.
    Ignore,
}

/// Whether inserted characters are echoed to the terminal.
///
/// `All` and `Common` echo identically; the distinction is kept for
/// configuration compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Echo every inserted character.
    All,
    /// Echo printable input (same as `All` for inserted characters).
    #[default]
    Common,
    /// Edit silently.
    None,
}

impl EchoPolicy {
    /// Whether insertions produce output.
    #[must_use]
    pub const fn echoes(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A single configuration value, as found in a string-keyed table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum TriggerValue {
    /// An exit code.
    Code(i32),
    /// A policy name or prefix text.
    Text(String),
    /// A boolean switch.
    Flag(bool),
}

impl From<i32> for TriggerValue {
    fn from(code: i32) -> Self {
        Self::Code(code)
    }
}

impl From<&str> for TriggerValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<bool> for TriggerValue {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl fmt::Display for TriggerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// Errors from building or validating a trigger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerTableError {
    /// Key is neither a policy name nor a token name.
    UnknownKey(String),
    /// Key is known but the value has the wrong kind or an unknown name.
    InvalidValue {
        /// The offending key.
        key: String,
        /// The rejected value, rendered.
        value: String,
    },
    /// The channel reports liveness but the table has no `idle` code.
    MissingIdle,
}

impl fmt::Display for TriggerTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "unknown trigger key {key:?}"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value {value} for trigger key {key:?}")
            }
            Self::MissingIdle => {
                write!(f, "channel reports liveness but no idle exit code is set")
            }
        }
    }
}

impl std::error::Error for TriggerTableError {}

/// Token → exit code mapping plus input policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTable {
    exits: HashMap<Token, i32>,
    rest: RestPolicy,
    rest_class: TokenClass,
    echo: EchoPolicy,
    overflow: Option<i32>,
    idle: Option<i32>,
    prefix: String,
    permit_pos: bool,
}

impl Default for TriggerTable {
    fn default() -> Self {
        Self {
            exits: HashMap::new(),
            rest: RestPolicy::default(),
            rest_class: TokenClass::default(),
            echo: EchoPolicy::default(),
            overflow: None,
            idle: None,
            prefix: String::new(),
            permit_pos: true,
        }
    }
}

impl TriggerTable {
    /// Empty table: no triggers, stack common characters, echo them.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table used by plain line input.
    ///
    /// `enter` and `ctrlD` submit with 0, `ctrlC` cancels with 1, and a full
    /// line submits with 2.
    #[must_use]
    pub fn line_input(prefix: impl Into<String>) -> Self {
        Self::new()
            .with_exit(Token::Enter, 0)
            .with_exit(Token::Ctrl('d'), 0)
            .with_exit(Token::Ctrl('c'), 1)
            .with_overflow(2)
            .with_prefix(prefix)
    }

    /// Build from string-keyed entries.
    pub fn from_entries<K, I>(entries: I) -> Result<Self, TriggerTableError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, TriggerValue)>,
    {
        let mut table = Self::new();
        for (key, value) in entries {
            table.apply_entry(key.as_ref(), value)?;
        }
        Ok(table)
    }

    fn apply_entry(&mut self, key: &str, value: TriggerValue) -> Result<(), TriggerTableError> {
        let invalid = |value: &TriggerValue| TriggerTableError::InvalidValue {
            key: key.to_owned(),
            value: value.to_string(),
        };

        match (key, &value) {
            ("rest", TriggerValue::Text(name)) => {
                self.rest = match name.as_str() {
                    "stack" => RestPolicy::Stack,
                    "ignore" => RestPolicy::Ignore,
                    _ => return Err(invalid(&value)),
                };
            }
            ("rest_a", TriggerValue::Text(name)) => {
                self.rest_class = name.parse().map_err(|_| invalid(&value))?;
            }
            ("echo", TriggerValue::Text(name)) => {
                self.echo = match name.as_str() {
                    "all" => EchoPolicy::All,
                    "common" => EchoPolicy::Common,
                    "none" => EchoPolicy::None,
                    _ => return Err(invalid(&value)),
                };
            }
            ("overflow", TriggerValue::Code(code)) => self.overflow = Some(*code),
            ("idle", TriggerValue::Code(code)) => self.idle = Some(*code),
            ("prefix", TriggerValue::Text(text)) => self.prefix.clone_from(text),
            ("permit_pos", TriggerValue::Flag(flag)) => self.permit_pos = *flag,
            ("rest" | "rest_a" | "echo" | "overflow" | "idle" | "prefix" | "permit_pos", _) => {
                return Err(invalid(&value));
            }
            (name, TriggerValue::Code(code)) => {
                let token: Token = name
                    .parse()
                    .map_err(|_| TriggerTableError::UnknownKey(name.to_owned()))?;
                self.exits.insert(token, *code);
            }
            (name, _) => {
                if name.parse::<Token>().is_err() {
                    return Err(TriggerTableError::UnknownKey(name.to_owned()));
                }
                return Err(invalid(&value));
            }
        }
        Ok(())
    }

    /// Map `token` to `code` (builder).
    #[must_use]
    pub fn with_exit(mut self, token: Token, code: i32) -> Self {
        self.exits.insert(token, code);
        self
    }

    /// Set the rest policy (builder).
    #[must_use]
    pub fn with_rest(mut self, rest: RestPolicy) -> Self {
        self.rest = rest;
        self
    }

    /// Set the accepted character class (builder).
    #[must_use]
    pub fn with_rest_class(mut self, class: TokenClass) -> Self {
        self.rest_class = class;
        self
    }

    /// Set the echo policy (builder).
    #[must_use]
    pub fn with_echo(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    /// Set the overflow exit code (builder).
    #[must_use]
    pub fn with_overflow(mut self, code: i32) -> Self {
        self.overflow = Some(code);
        self
    }

    /// Set the disconnect exit code (builder).
    #[must_use]
    pub fn with_idle(mut self, code: i32) -> Self {
        self.idle = Some(code);
        self
    }

    /// Set the prefix (builder).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Allow or forbid cursor position queries (builder).
    #[must_use]
    pub fn with_permit_pos(mut self, permit: bool) -> Self {
        self.permit_pos = permit;
        self
    }

    /// Exit code mapped to `token`.
    #[must_use]
    pub fn exit_code(&self, token: &Token) -> Option<i32> {
        self.exits.get(token).copied()
    }

    /// Exit code used when the process is interrupted: that of `ctrlC`, or 0.
    #[must_use]
    pub fn interrupt_code(&self) -> i32 {
        self.exit_code(&Token::Ctrl('c')).unwrap_or(0)
    }

    /// Exit code used when the line is full, 0 if unset.
    #[must_use]
    pub fn overflow_code(&self) -> i32 {
        self.overflow.unwrap_or(0)
    }

    /// Rest policy.
    #[must_use]
    pub const fn rest(&self) -> RestPolicy {
        self.rest
    }

    /// Accepted character class.
    #[must_use]
    pub const fn rest_class(&self) -> TokenClass {
        self.rest_class
    }

    /// Echo policy.
    #[must_use]
    pub const fn echo(&self) -> EchoPolicy {
        self.echo
    }

    /// Disconnect exit code.
    #[must_use]
    pub const fn idle(&self) -> Option<i32> {
        self.idle
    }

    /// Prefix text.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether cursor position queries may be sent.
    #[must_use]
    pub const fn permit_pos(&self) -> bool {
        self.permit_pos
    }

    /// Check the table against a channel's capabilities.
    pub fn validate(&self, capabilities: ChannelCapabilities) -> Result<(), TriggerTableError> {
        if capabilities.contains(ChannelCapabilities::LIVENESS) && self.idle.is_none() {
            return Err(TriggerTableError::MissingIdle);
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for TriggerTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = HashMap::<String, TriggerValue>::deserialize(deserializer)?;
        Self::from_entries(entries).map_err(serde::de::Error::custom)
    }
}
