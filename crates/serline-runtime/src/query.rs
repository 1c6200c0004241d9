#![forbid(unsafe_code)]

//! Cursor position and terminal geometry queries.
//!
//! The terminal is asked with Device Status Report 6 and answers on the same
//! channel the user types on:
//!
//! ```text
//! Query:    ESC [ 6 n
//! Response: ESC [ row ; col R
//! ```
//!
//! Geometry is measured by saving the cursor, moving it far past the bottom
//! right corner (the terminal clamps the move), asking for its position, and
//! restoring it. When the channel knows its own size
//! ([`ChannelCapabilities::SIZE`]) no escape sequences are sent.
//!
//! Anything the user typed before or during a query is kept in the decoder
//! stash and decoded on the next read, so keystrokes are never lost to a
//! query.
//!
//! # Failure handling
//!
//! | Failure       | Position                   | Geometry                     |
//! |---------------|----------------------------|------------------------------|
//! | Malformed     | retried                    | retried                      |
//! | Timeout       | retried, then `Timeout`    | input reset, `Ok(None)`      |
//! | Interrupted   | per [`InterruptPolicy`]    | per [`InterruptPolicy`]      |

use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use serline_core::channel::{ChannelCapabilities, RawChannel};
use serline_core::geometry::{CursorPos, TermSize};
use serline_core::interrupt::InterruptFlag;
use serline_core::key_decoder::KeyDecoder;
use tracing::{debug, trace, warn};

use crate::output::OutputChannel;

/// Pause between availability checks while draining a burst of input.
pub const SETTLE_WINDOW: Duration = Duration::from_micros(300);

/// Default time allowed for one reply.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

const REQUEST_POSITION: &[u8] = b"\x1b[6n";
/// Save, then move 500 rows down and 500 columns right.
const MEASURE_BEGIN: &[u8] = b"\x1b[s\x1b[500B\x1b[500C";
const MEASURE_END: &[u8] = b"\x1b[u";
const CSI: &[u8] = b"\x1b[";
const ESC: u8 = 0x1B;

/// Environment variable overriding [`QueryConfig::timeout`], in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "SERLINE_QUERY_TIMEOUT_MS";
/// Environment variable overriding [`QueryConfig::position_attempts`].
pub const ENV_ATTEMPTS: &str = "SERLINE_QUERY_ATTEMPTS";

/// What a query does when the interrupt flag is raised mid-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Abort with [`QueryError::Interrupted`], leaving the flag raised.
    #[default]
    Propagate,
    /// Lower the flag and retry once; a second interrupt propagates.
    RetryOnce,
}

/// Query tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Time allowed for one reply.
    pub timeout: Duration,
    /// Position query attempts before giving up.
    pub position_attempts: u32,
    /// Geometry query attempts on malformed replies.
    pub geometry_attempts: u32,
    /// Interrupt handling during a read.
    pub interrupt_policy: InterruptPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            position_attempts: 3,
            geometry_attempts: 2,
            interrupt_policy: InterruptPolicy::default(),
        }
    }
}

impl QueryConfig {
    /// Defaults, overridden by [`ENV_TIMEOUT_MS`] and [`ENV_ATTEMPTS`] when set
    /// to valid numbers.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_number::<u64>(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_number::<u32>(ENV_ATTEMPTS) {
            config.position_attempts = attempts.max(1);
        }
        config
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set position attempts (at least 1).
    #[must_use]
    pub fn with_position_attempts(mut self, attempts: u32) -> Self {
        self.position_attempts = attempts.max(1);
        self
    }

    /// Set geometry attempts (at least 1).
    #[must_use]
    pub fn with_geometry_attempts(mut self, attempts: u32) -> Self {
        self.geometry_attempts = attempts.max(1);
        self
    }

    /// Set the interrupt policy.
    #[must_use]
    pub fn with_interrupt_policy(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt_policy = policy;
        self
    }
}

pub(crate) fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// Why a query produced no answer.
#[derive(Debug)]
pub enum QueryError {
    /// No complete reply within the timeout.
    Timeout,
    /// A reply arrived but its numbers did not parse.
    Malformed,
    /// The interrupt flag was raised while waiting.
    Interrupted,
    /// The channel failed.
    Io(io::Error),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "terminal did not answer the position query"),
            Self::Malformed => write!(f, "malformed cursor position report"),
            Self::Interrupted => write!(f, "query interrupted"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for QueryError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Parse a cursor position report.
///
/// Accepts `ESC [ row ; col R` anywhere in `bytes`. Returns the position and
/// the index where the report starts.
pub fn parse_cursor_report(bytes: &[u8]) -> Result<(CursorPos, usize), QueryError> {
    let start = find_subsequence(bytes, CSI).ok_or(QueryError::Malformed)?;
    let payload = &bytes[start + CSI.len()..];
    let end = payload
        .iter()
        .position(|&b| b == b'R')
        .ok_or(QueryError::Malformed)?;

    let mut parts = payload[..end].split(|&b| b == b';');
    let row = parse_number(parts.next())?;
    let col = parse_number(parts.next())?;
    if parts.next().is_some() {
        return Err(QueryError::Malformed);
    }
    Ok((CursorPos::new(row, col), start))
}

fn parse_number(chunk: Option<&[u8]>) -> Result<u16, QueryError> {
    let chunk = chunk.ok_or(QueryError::Malformed)?;
    if chunk.is_empty() || !chunk.iter().all(u8::is_ascii_digit) {
        return Err(QueryError::Malformed);
    }
    std::str::from_utf8(chunk)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(QueryError::Malformed)
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A query session borrowing the editor's channel, decoder, and interrupt flag.
pub struct TerminalQuery<'a, C: RawChannel> {
    out: &'a mut OutputChannel<C>,
    decoder: &'a mut KeyDecoder,
    interrupt: &'a InterruptFlag,
    config: &'a QueryConfig,
    capabilities: ChannelCapabilities,
}

impl<'a, C: RawChannel> TerminalQuery<'a, C> {
    /// Borrow the parts a query needs.
    pub fn new(
        out: &'a mut OutputChannel<C>,
        decoder: &'a mut KeyDecoder,
        interrupt: &'a InterruptFlag,
        config: &'a QueryConfig,
        capabilities: ChannelCapabilities,
    ) -> Self {
        Self {
            out,
            decoder,
            interrupt,
            config,
            capabilities,
        }
    }

    /// Ask the terminal where the cursor is.
    pub fn position(&mut self) -> Result<CursorPos, QueryError> {
        let mut interrupt_retry = self.config.interrupt_policy == InterruptPolicy::RetryOnce;
        let mut last = QueryError::Timeout;
        let mut attempt = 0;

        while attempt < self.config.position_attempts {
            attempt += 1;
            match self.exchange(REQUEST_POSITION) {
                Ok(pos) => {
                    trace!(%pos, attempt, "cursor position");
                    return Ok(pos);
                }
                Err(QueryError::Interrupted) if interrupt_retry => {
                    interrupt_retry = false;
                    self.interrupt.take();
                    attempt -= 1;
                }
                Err(err @ (QueryError::Timeout | QueryError::Malformed)) => {
                    debug!(attempt, error = %err, "position query failed, retrying");
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }
        warn!(attempts = attempt, error = %last, "position query gave up");
        Err(last)
    }

    /// Measure the terminal. `Ok(None)` when the terminal does not answer.
    pub fn geometry(&mut self) -> Result<Option<TermSize>, QueryError> {
        if self.capabilities.contains(ChannelCapabilities::SIZE) {
            return Ok(self.out.channel_mut().size());
        }

        let mut request = Vec::with_capacity(MEASURE_BEGIN.len() + 8);
        request.extend_from_slice(MEASURE_BEGIN);
        request.extend_from_slice(REQUEST_POSITION);
        request.extend_from_slice(MEASURE_END);

        let mut interrupt_retry = self.config.interrupt_policy == InterruptPolicy::RetryOnce;
        let mut attempt = 0;
        while attempt < self.config.geometry_attempts {
            attempt += 1;
            match self.exchange(&request) {
                Ok(corner) => {
                    let size = TermSize::from(corner);
                    debug!(%size, "terminal geometry");
                    return Ok(Some(size));
                }
                Err(QueryError::Interrupted) if interrupt_retry => {
                    interrupt_retry = false;
                    self.interrupt.take();
                    attempt -= 1;
                }
                Err(QueryError::Malformed) => {
                    debug!(attempt, "malformed geometry reply, retrying");
                }
                Err(QueryError::Timeout) => break,
                Err(err) => return Err(err),
            }
        }

        debug!("terminal geometry unknown");
        self.out.channel_mut().reset_input_buffer()?;
        Ok(None)
    }

    /// Drain, send `request`, and read one position report.
    fn exchange(&mut self, request: &[u8]) -> Result<CursorPos, QueryError> {
        self.drain_pending()?;
        self.out.write_all(request)?;
        self.out.flush()?;
        self.read_report()
    }

    /// Move everything already received into the decoder stash.
    fn drain_pending(&mut self) -> io::Result<()> {
        loop {
            let bytes = self.out.channel_mut().read_available()?;
            if bytes.is_empty() {
                return Ok(());
            }
            self.decoder.stash(&bytes);
            self.out.channel_mut().settle(SETTLE_WINDOW);
        }
    }

    /// Read until a complete report or the deadline.
    ///
    /// Bytes that cannot belong to a report are stashed as user input.
    fn read_report(&mut self) -> Result<CursorPos, QueryError> {
        let deadline = Instant::now() + self.config.timeout;
        let mut reply: Vec<u8> = Vec::with_capacity(16);
        let mut byte = [0u8; 1];

        loop {
            if self.interrupt.is_raised() {
                self.decoder.stash(&reply);
                return Err(QueryError::Interrupted);
            }
            if Instant::now() >= deadline {
                self.decoder.stash(&reply);
                return Err(QueryError::Timeout);
            }

            let channel = self.out.channel_mut();
            if channel.bytes_available()? == 0 {
                channel.settle(SETTLE_WINDOW);
                continue;
            }
            if channel.read(&mut byte)? == 0 {
                continue;
            }
            let b = byte[0];

            match reply.len() {
                0 if b != ESC => self.decoder.stash(&[b]),
                1 if b != b'[' => {
                    reply.push(b);
                    self.decoder.stash(&reply);
                    reply.clear();
                }
                0 | 1 => reply.push(b),
                _ if b == b'R' => {
                    reply.push(b);
                    return parse_cursor_report(&reply).map(|(pos, _)| pos);
                }
                _ if b.is_ascii_digit() || b == b';' => reply.push(b),
                _ => {
                    // A key sequence such as an arrow, not a report.
                    reply.push(b);
                    self.decoder.stash(&reply);
                    reply.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serline_core::channel::MemoryChannel;
    use serline_core::token::Token;

    struct Parts {
        out: OutputChannel<MemoryChannel>,
        decoder: KeyDecoder,
        interrupt: InterruptFlag,
        config: QueryConfig,
    }

    impl Parts {
        fn new(chan: MemoryChannel) -> Self {
            Self {
                out: OutputChannel::new(chan),
                decoder: KeyDecoder::new(),
                interrupt: InterruptFlag::new(),
                config: QueryConfig::default().with_timeout(Duration::from_millis(20)),
            }
        }

        fn query(&mut self) -> TerminalQuery<'_, MemoryChannel> {
            let caps = self.out.channel().capabilities();
            TerminalQuery::new(
                &mut self.out,
                &mut self.decoder,
                &self.interrupt,
                &self.config,
                caps,
            )
        }
    }

    #[test]
    fn parse_report() {
        let (pos, start) = parse_cursor_report(b"\x1b[24;80R").unwrap();
        assert_eq!(pos, CursorPos::new(24, 80));
        assert_eq!(start, 0);

        let (pos, start) = parse_cursor_report(b"ab\x1b[3;7R").unwrap();
        assert_eq!(pos, CursorPos::new(3, 7));
        assert_eq!(start, 2);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in [
            &b"\x1b[;5R"[..],
            b"\x1b[12R",
            b"\x1b[1;2;3R",
            b"\x1b[a;1R",
            b"\x1b[99999;1R",
            b"24;80R",
            b"\x1b[24;80",
        ] {
            assert!(
                matches!(parse_cursor_report(bad), Err(QueryError::Malformed)),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn position_round_trip() {
        let mut parts = Parts::new(MemoryChannel::new().with_cursor_reply(b"\x1b[5;12R"));
        assert_eq!(parts.query().position().unwrap(), CursorPos::new(5, 12));
        assert_eq!(parts.out.channel().output(), b"\x1b[6n");
    }

    #[test]
    fn typed_bytes_are_stashed() {
        let chan = MemoryChannel::new()
            .with_input(b"xy")
            .with_cursor_reply(b"z\x1b[D\x1b[2;3R");
        let mut parts = Parts::new(chan);
        assert_eq!(parts.query().position().unwrap(), CursorPos::new(2, 3));

        let mut empty = MemoryChannel::new();
        let tokens = parts.decoder.decode_from(&mut empty).unwrap();
        assert_eq!(
            tokens,
            vec![Token::Char('x'), Token::Char('y'), Token::Char('z'), Token::Left]
        );
    }

    #[test]
    fn malformed_then_good_reply_retries() {
        let chan = MemoryChannel::new()
            .with_cursor_reply(b"\x1b[;R")
            .with_cursor_reply(b"\x1b[4;4R");
        let mut parts = Parts::new(chan);
        assert_eq!(parts.query().position().unwrap(), CursorPos::new(4, 4));
    }

    #[test]
    fn position_times_out_after_attempts() {
        let mut parts = Parts::new(MemoryChannel::new());
        parts.config = parts.config.clone().with_position_attempts(2);
        assert!(matches!(parts.query().position(), Err(QueryError::Timeout)));
        assert_eq!(parts.out.channel().output(), b"\x1b[6n\x1b[6n");
    }

    #[test]
    fn geometry_sequence_and_result() {
        let mut parts = Parts::new(MemoryChannel::new().with_cursor_reply(b"\x1b[24;80R"));
        assert_eq!(parts.query().geometry().unwrap(), Some(TermSize::new(24, 80)));
        assert_eq!(
            parts.out.channel().output(),
            b"\x1b[s\x1b[500B\x1b[500C\x1b[6n\x1b[u"
        );
    }

    #[test]
    fn geometry_timeout_is_none() {
        let mut parts = Parts::new(MemoryChannel::new());
        assert_eq!(parts.query().geometry().unwrap(), None);
    }

    #[test]
    fn geometry_from_transport_size() {
        let mut parts = Parts::new(MemoryChannel::new().with_size(TermSize::new(40, 132)));
        assert_eq!(parts.query().geometry().unwrap(), Some(TermSize::new(40, 132)));
        assert!(parts.out.channel().output().is_empty());
    }

    #[test]
    fn interrupt_propagates() {
        let mut parts = Parts::new(MemoryChannel::new());
        parts.interrupt.raise();
        assert!(matches!(
            parts.query().position(),
            Err(QueryError::Interrupted)
        ));
        assert!(parts.interrupt.is_raised());
    }

    #[test]
    fn interrupt_retry_once() {
        let mut parts = Parts::new(MemoryChannel::new().with_cursor_reply(b"\x1b[1;1R"));
        parts.config = parts
            .config
            .clone()
            .with_interrupt_policy(InterruptPolicy::RetryOnce);
        parts.interrupt.raise();
        // First exchange consumes the reply but is interrupted before reading.
        // The retry sends a second request that gets no reply and times out.
        let result = parts.query().position();
        assert!(!parts.interrupt.is_raised());
        assert!(matches!(result, Err(QueryError::Timeout)));
        // The first reply was drained on the retry and is not kept as input.
        assert!(!parts.decoder.has_stash());
    }

    #[test]
    fn late_reply_after_timeout_is_not_input() {
        let chan = MemoryChannel::new()
            .with_cursor_reply(b"")
            .with_cursor_reply(b"\x1b[1;5R\x1b[1;5R");
        let mut parts = Parts::new(chan);
        assert_eq!(parts.query().position().unwrap(), CursorPos::new(1, 5));

        let tokens = parts.decoder.decode_from(parts.out.channel_mut()).unwrap();
        assert!(tokens.is_empty(), "{tokens:?}");
        assert!(!parts.decoder.has_stash());
    }
}
