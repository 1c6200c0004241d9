#![forbid(unsafe_code)]

//! The line editor event loop.
//!
//! A [`LineEditor`] owns one channel and everything needed to edit a line on
//! it. Each run renders the prefix, then pulls token batches from the decoder
//! and applies them to the line buffer until a trigger assigns an exit code.
//!
//! # Token handling
//!
//! For every token, in order:
//!
//! 1. A disconnected channel (with [`ChannelCapabilities::LIVENESS`]) ends the
//!    line with the `idle` code.
//! 2. The `Alt` marker is skipped.
//! 3. A token mapped in the trigger table ends the line with its code.
//! 4. Editing keys (`bck`, `del`, `home`, `end`, `left`, `right`) edit.
//! 5. `up`, `down`, `ins`, and `tab` are ignored.
//! 6. Characters accepted by the `rest` policy are inserted. When the line is
//!    full the line ends with the `overflow` code and the character, with the
//!    rest of its batch, is kept for the next run.
//!
//! A raised [`InterruptFlag`] is noticed between tokens and while waiting for
//! input, and ends the line with the code mapped to `ctrlC` (0 if unmapped).
//!
//! # Example
//!
//! ```
//! use serline_core::channel::MemoryChannel;
//! use serline_runtime::program::LineEditor;
//! use serline_runtime::trigger::TriggerTable;
//!
//! let chan = MemoryChannel::new().with_input(b"hi\r");
//! let table = TriggerTable::line_input("> ").with_permit_pos(false);
//! let mut editor = LineEditor::new(chan, table).unwrap();
//! let outcome = editor.run().unwrap();
//! assert_eq!((outcome.exit_code, outcome.text.as_str()), (0, "hi"));
//! ```

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Duration;

use serline_core::channel::{ChannelCapabilities, RawChannel};
use serline_core::geometry::{CursorPos, TermSize};
use serline_core::interrupt::InterruptFlag;
use serline_core::key_decoder::KeyDecoder;
use serline_core::token::Token;
use tracing::{debug, debug_span, trace, warn};

use crate::context::{self, ContextRegistry};
use crate::line_buffer::{InsertOutcome, LineBuffer};
use crate::output::OutputChannel;
use crate::query::{QueryConfig, QueryError, TerminalQuery, env_number};
use crate::trigger::{RestPolicy, TriggerTable, TriggerTableError};

/// Save, step down-right, restore. Some USB CDC consoles only start echoing
/// correctly after the cursor has been moved once.
const CONSOLE_NUDGE: &[u8] = b"\x1b[s\x1b[1B\x1b[1C\x1b[u";

/// Environment variable overriding [`ProgramConfig::poll_interval`], in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "SERLINE_POLL_INTERVAL_MS";

/// Default wait between polls when no input is available.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Editor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    /// Wait between polls when the channel has no input.
    pub poll_interval: Duration,
    /// Send the console nudge after rendering the prefix.
    pub console_nudge: bool,
    /// Terminal query tuning.
    pub query: QueryConfig,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            console_nudge: true,
            query: QueryConfig::default(),
        }
    }
}

impl ProgramConfig {
    /// Defaults with the poll interval and query settings taken from the
    /// environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            query: QueryConfig::from_env(),
            ..Self::default()
        };
        if let Some(ms) = env_number::<u64>(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable the console nudge.
    #[must_use]
    pub fn with_console_nudge(mut self, enabled: bool) -> Self {
        self.console_nudge = enabled;
        self
    }

    /// Set the query configuration.
    #[must_use]
    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }
}

/// How a line ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    /// Exit code assigned by the trigger that ended the line.
    pub exit_code: i32,
    /// The edited text.
    pub text: String,
}

/// Result of one non-blocking step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was available to read.
    NoInput,
    /// Input was processed but the line is not finished.
    InProgress,
    /// The line ended.
    Finished(LineOutcome),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Blocking,
    NonBlocking,
}

/// Single-line editor over a raw channel.
#[derive(Debug)]
pub struct LineEditor<C: RawChannel> {
    out: OutputChannel<C>,
    decoder: KeyDecoder,
    buffer: LineBuffer,
    triggers: TriggerTable,
    context: ContextRegistry,
    interrupt: InterruptFlag,
    config: ProgramConfig,
    capabilities: ChannelCapabilities,
    /// Tokens decoded but not yet applied.
    pending: VecDeque<Token>,
    /// A non-blocking line has been started and not finished.
    line_open: bool,
}

impl<C: RawChannel> LineEditor<C> {
    /// Create an editor with the default configuration.
    pub fn new(channel: C, triggers: TriggerTable) -> Result<Self, TriggerTableError> {
        Self::with_config(channel, triggers, ProgramConfig::default())
    }

    /// Create an editor.
    ///
    /// Fails if the channel reports liveness and the table has no `idle` code.
    pub fn with_config(
        channel: C,
        triggers: TriggerTable,
        config: ProgramConfig,
    ) -> Result<Self, TriggerTableError> {
        let capabilities = channel.capabilities();
        triggers.validate(capabilities)?;
        debug!(?capabilities, "line editor created");
        Ok(Self {
            out: OutputChannel::new(channel),
            decoder: KeyDecoder::new(),
            buffer: LineBuffer::new(),
            triggers,
            context: ContextRegistry::new(),
            interrupt: InterruptFlag::new(),
            config,
            capabilities,
            pending: VecDeque::new(),
            line_open: false,
        })
    }

    /// Use `decoder` instead of the standard one (builder).
    #[must_use]
    pub fn with_decoder(mut self, decoder: KeyDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Share an existing interrupt flag (builder).
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = flag;
        self
    }

    /// A handle to the interrupt flag this editor polls.
    #[must_use]
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// The stored trigger table.
    #[must_use]
    pub fn triggers(&self) -> &TriggerTable {
        &self.triggers
    }

    /// The line buffer.
    #[must_use]
    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    /// The bookmark registry.
    #[must_use]
    pub fn context(&self) -> &ContextRegistry {
        &self.context
    }

    /// The bookmark registry, mutably.
    pub fn context_mut(&mut self) -> &mut ContextRegistry {
        &mut self.context
    }

    /// The output channel, for application text.
    pub fn output(&mut self) -> &mut OutputChannel<C> {
        &mut self.out
    }

    /// The raw channel.
    pub fn channel(&self) -> &C {
        self.out.channel()
    }

    /// The raw channel, mutably. Writes through it bypass the output buffer.
    pub fn channel_mut(&mut self) -> &mut C {
        self.out.channel_mut()
    }

    /// Tokens kept for the next run.
    #[must_use]
    pub fn pending_tokens(&self) -> usize {
        self.pending.len()
    }

    /// Unwrap the channel.
    pub fn into_inner(self) -> C {
        self.out.into_inner()
    }

    // --- Running -----------------------------------------------------------

    /// Edit one line with the stored trigger table. Blocks until it ends.
    pub fn run(&mut self) -> io::Result<LineOutcome> {
        let table = self.triggers.clone();
        self.run_with(&table)
    }

    /// Edit one line with `table` in place of the stored table.
    pub fn run_with(&mut self, table: &TriggerTable) -> io::Result<LineOutcome> {
        table
            .validate(self.capabilities)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let _span = debug_span!("line_run", prefix = table.prefix()).entered();
        self.line_open = false;
        match self.drive(table, Mode::Blocking)? {
            PollOutcome::Finished(outcome) => Ok(outcome),
            // Blocking mode only returns once the line has ended.
            PollOutcome::NoInput | PollOutcome::InProgress => {
                Err(io::Error::other("line editor stopped before the line ended"))
            }
        }
    }

    /// Process whatever input is available and return immediately.
    ///
    /// The first call of a line renders the prefix.
    pub fn run_non_blocking(&mut self) -> io::Result<PollOutcome> {
        let table = self.triggers.clone();
        self.drive(&table, Mode::NonBlocking)
    }

    /// Prompt for a line of text.
    ///
    /// `enter` and `ctrlD` submit, a full line submits, `ctrlC` cancels.
    /// Returns `None` when cancelled or disconnected.
    pub fn read_line(&mut self, prefix: &str) -> io::Result<Option<String>> {
        let mut table = TriggerTable::line_input(prefix).with_permit_pos(self.triggers.permit_pos());
        if let Some(idle) = self.triggers.idle() {
            table = table.with_idle(idle);
        }
        let outcome = self.run_with(&table)?;
        Ok(match outcome.exit_code {
            0 | 2 => Some(outcome.text),
            _ => None,
        })
    }

    fn drive(&mut self, table: &TriggerTable, mode: Mode) -> io::Result<PollOutcome> {
        if !self.line_open {
            if self.disconnected() {
                return Ok(self.finish_idle(table));
            }
            self.begin_line(table)?;
            self.line_open = true;
        }

        loop {
            if self.interrupt.take() {
                return Ok(self.finish_interrupted(table));
            }

            if self.pending.is_empty() {
                let tokens = self.decoder.decode_from(self.out.channel_mut())?;
                if tokens.is_empty() {
                    if self.disconnected() {
                        return Ok(self.finish_idle(table));
                    }
                    if mode == Mode::NonBlocking {
                        return Ok(PollOutcome::NoInput);
                    }
                    let interval = self.config.poll_interval;
                    self.out.channel_mut().settle(interval);
                    continue;
                }
                trace!(count = tokens.len(), "token batch");
                self.pending.extend(tokens);
            }

            self.out.hold();
            let step = self.apply_pending(table);
            self.out.release()?;

            match step? {
                Some(Exit::Code(code)) => return Ok(self.finish(code)),
                Some(Exit::Interrupted) => return Ok(self.finish_interrupted(table)),
                Some(Exit::Disconnected) => return Ok(self.finish_idle(table)),
                None if mode == Mode::NonBlocking => return Ok(PollOutcome::InProgress),
                None => {}
            }
        }
    }

    /// Reset the buffer, render the prefix, and measure the remaining width.
    fn begin_line(&mut self, table: &TriggerTable) -> io::Result<()> {
        self.buffer.reset();
        self.buffer.render(table.prefix(), &mut self.out)?;
        self.out.flush()?;
        if table.permit_pos() {
            self.refresh_space()?;
        }
        if self.config.console_nudge {
            self.out.write_all(CONSOLE_NUDGE)?;
        }
        Ok(())
    }

    fn refresh_space(&mut self) -> io::Result<()> {
        let position = self.query().position();
        let space = match position {
            Ok(pos) => Some(self.context.space_after(pos.col)),
            Err(QueryError::Io(e)) => return Err(e),
            Err(err) => {
                debug!(error = %err, "line width unknown");
                None
            }
        };
        self.buffer.set_space_remaining(space);
        Ok(())
    }

    fn apply_pending(&mut self, table: &TriggerTable) -> io::Result<Option<Exit>> {
        while let Some(token) = self.pending.pop_front() {
            if self.interrupt.is_raised() {
                return Ok(Some(Exit::Interrupted));
            }
            if self.disconnected() {
                return Ok(Some(Exit::Disconnected));
            }
            if token == Token::Alt {
                continue;
            }
            if let Some(code) = table.exit_code(&token) {
                debug!(%token, code, "trigger");
                return Ok(Some(Exit::Code(code)));
            }

            match token {
                Token::Backspace => {
                    self.buffer.backspace(1, &mut self.out)?;
                }
                Token::Delete => {
                    self.buffer.delete(1, &mut self.out)?;
                }
                Token::Home => self.buffer.home(&mut self.out)?,
                Token::End => self.buffer.end(&mut self.out)?,
                Token::Left => {
                    self.buffer.move_left(&mut self.out)?;
                }
                Token::Right => {
                    self.buffer.move_right(&mut self.out)?;
                }
                Token::Up | Token::Down | Token::Insert | Token::Tab => {}
                Token::Char(ch)
                    if table.rest() == RestPolicy::Stack && table.rest_class().matches(&token) =>
                {
                    if self.buffer.insert(ch, table.echo(), &mut self.out)? == InsertOutcome::Overflow
                    {
                        self.pending.push_front(token);
                        debug!(kept = self.pending.len(), "line full");
                        return Ok(Some(Exit::Code(table.overflow_code())));
                    }
                }
                _ => trace!(%token, "token ignored"),
            }
        }
        Ok(None)
    }

    fn finish(&mut self, exit_code: i32) -> PollOutcome {
        self.line_open = false;
        let text = self.buffer.take_text();
        debug!(exit_code, len = text.len(), "line finished");
        PollOutcome::Finished(LineOutcome { exit_code, text })
    }

    fn finish_interrupted(&mut self, table: &TriggerTable) -> PollOutcome {
        self.interrupt.take();
        self.pending.clear();
        warn!("line interrupted");
        self.finish(table.interrupt_code())
    }

    fn finish_idle(&mut self, table: &TriggerTable) -> PollOutcome {
        self.pending.clear();
        debug!("channel disconnected");
        // validate() guarantees an idle code whenever liveness is reported.
        self.finish(table.idle().unwrap_or(0))
    }

    fn disconnected(&self) -> bool {
        self.capabilities.contains(ChannelCapabilities::LIVENESS) && !self.out.channel().connected()
    }

    // --- Input helpers -----------------------------------------------------

    /// Decode what is available and report whether `ctrlC` was among it, or
    /// the interrupt flag was raised. Other input is discarded.
    pub fn is_interrupted(&mut self) -> io::Result<bool> {
        let mut tokens: Vec<Token> = self.pending.drain(..).collect();
        tokens.extend(self.decoder.decode_from(self.out.channel_mut())?);
        let typed = tokens.contains(&Token::Ctrl('c'));
        Ok(self.interrupt.take() || typed)
    }

    /// Drop all unread input and unsent output.
    pub fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.decoder.reset();
        self.out.discard()?;
        self.out.channel_mut().reset_input_buffer()
    }

    // --- Terminal queries --------------------------------------------------

    fn query(&mut self) -> TerminalQuery<'_, C> {
        TerminalQuery::new(
            &mut self.out,
            &mut self.decoder,
            &self.interrupt,
            &self.config.query,
            self.capabilities,
        )
    }

    /// Ask the terminal for the cursor position.
    pub fn query_position(&mut self) -> Result<CursorPos, QueryError> {
        self.query().position()
    }

    /// Measure the terminal and record the result.
    ///
    /// On success the bookmark registry is updated and, when position queries
    /// are permitted, the remaining line width is recomputed.
    pub fn query_geometry(&mut self) -> Result<Option<TermSize>, QueryError> {
        let Some(size) = self.query().geometry()? else {
            return Ok(None);
        };
        self.context.apply_geometry(size);
        if self.triggers.permit_pos() {
            let position = self.query().position();
            match position {
                Ok(pos) => {
                    let space = self.context.space_after(pos.col);
                    self.buffer.set_space_remaining(Some(space));
                }
                Err(err @ (QueryError::Io(_) | QueryError::Interrupted)) => return Err(err),
                Err(_) => self.buffer.set_space_remaining(None),
            }
        }
        Ok(Some(size))
    }

    /// Store the current cursor position as a bookmark.
    ///
    /// Returns `None` without querying when position queries are not permitted.
    pub fn capture_bookmark(&mut self, name: &str) -> Result<Option<CursorPos>, QueryError> {
        if !self.triggers.permit_pos() {
            return Ok(None);
        }
        let pos = self.query().position()?;
        self.context.set(name, pos);
        Ok(Some(pos))
    }

    // --- Screen helpers ----------------------------------------------------

    /// Clear the screen and scrollback.
    pub fn clear_screen(&mut self) -> io::Result<()> {
        context::clear_screen(&mut self.out)
    }

    /// Clear the current line.
    pub fn clear_line(&mut self) -> io::Result<()> {
        context::clear_line(&mut self.out)
    }

    /// Move to an absolute position.
    pub fn move_to(&mut self, row: u16, col: u16) -> io::Result<()> {
        context::move_to(row, col, &mut self.out)
    }

    /// Move to a bookmark plus an offset. Returns `false` for unknown names.
    pub fn move_to_bookmark(&mut self, name: &str, dx: i32, dy: i32) -> io::Result<bool> {
        self.context.move_to_bookmark(name, dx, dy, &mut self.out)
    }

    /// Clear the line and fill it with `ch`, measuring the terminal first.
    ///
    /// Returns `false` (line cleared, nothing drawn) when the width is unknown.
    pub fn draw_rule(&mut self, ch: char) -> Result<bool, QueryError> {
        self.clear_line()?;
        match self.query_geometry()? {
            Some(size) => {
                context::draw_rule(ch, size.cols, &mut self.out)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

enum Exit {
    Code(i32),
    Interrupted,
    Disconnected,
}
