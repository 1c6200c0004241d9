#![forbid(unsafe_code)]

//! serline public facade crate.
//!
//! Line editing for consoles reached over a raw byte channel (serial ports,
//! USB CDC, pseudo-terminals) where no terminal driver cooks the input. This
//! crate re-exports the common types from the internal crates and offers a
//! small prelude.
//!
//! ```ignore
//! use serline::prelude::*;
//!
//! let mut editor = LineEditor::new(port, TriggerTable::line_input("> "))?;
//! editor.query_geometry()?;
//! while let Some(line) = editor.read_line("> ")? {
//!     editor.output().write_line(&format!("got {line}"))?;
//! }
//! ```

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use serline_core::channel::{ChannelCapabilities, MemoryChannel, RawChannel};
pub use serline_core::geometry::{CursorPos, TermSize};
pub use serline_core::interrupt::InterruptFlag;
pub use serline_core::key_decoder::{DecodeStats, KeyDecoder};
pub use serline_core::token::{KeyTable, Token, TokenClass};

// --- Runtime re-exports ----------------------------------------------------

pub use serline_runtime::{
    ContextRegistry, EchoPolicy, FlushTarget, InterruptPolicy, LineBuffer, LineEditor,
    LineOutcome, OutputChannel, PollOutcome, ProgramConfig, QueryConfig, QueryError, RestPolicy,
    TriggerTable, TriggerTableError, TriggerValue,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for serline programs.
#[derive(Debug)]
pub enum Error {
    /// I/O failure on the channel.
    Io(std::io::Error),
    /// A terminal query failed.
    Query(QueryError),
    /// A trigger table was rejected.
    Trigger(TriggerTableError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "terminal query: {err}"),
            Self::Trigger(err) => write!(f, "trigger table: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Trigger(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Io(io) => Self::Io(io),
            other => Self::Query(other),
        }
    }
}

impl From<TriggerTableError> for Error {
    fn from(err: TriggerTableError) -> Self {
        Self::Trigger(err)
    }
}

/// Standard result type for serline APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ChannelCapabilities, CursorPos, Error, InterruptFlag, LineEditor, LineOutcome,
        PollOutcome, ProgramConfig, RawChannel, Result, TermSize, Token, TriggerTable,
    };

    pub use crate::{core, runtime};
}

pub use serline_core as core;
pub use serline_runtime as runtime;
