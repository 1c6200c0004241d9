#![forbid(unsafe_code)]

//! serline runtime
//!
//! Everything above raw bytes and key tokens: the buffered output channel,
//! the line buffer and its editing primitives, trigger tables, terminal
//! queries, screen bookmarks, and the [`LineEditor`] event loop that ties
//! them together.
//!
//! # Key Components
//!
//! - [`LineEditor`] - Runs one line of editing over a channel
//! - [`TriggerTable`] - Exit codes and input policies for a line
//! - [`LineBuffer`] - Text, cursor, and remaining-width tracking
//! - [`OutputChannel`] - Buffered, holdable writer over a raw channel
//! - [`TerminalQuery`] - Cursor position and geometry queries

pub mod context;
pub mod line_buffer;
pub mod output;
pub mod program;
pub mod query;
pub mod trigger;

pub use context::ContextRegistry;
pub use line_buffer::{InsertOutcome, LineBuffer};
pub use output::{FlushTarget, OutputChannel};
pub use program::{LineEditor, LineOutcome, PollOutcome, ProgramConfig};
pub use query::{InterruptPolicy, QueryConfig, QueryError, SETTLE_WINDOW, TerminalQuery};
pub use trigger::{EchoPolicy, RestPolicy, TriggerTable, TriggerTableError, TriggerValue};
