#![forbid(unsafe_code)]

//! Key decoder state machine.
//!
//! Turns raw console bytes into an ordered list of [`Token`]s using a
//! [`KeyTable`].
//!
//! # States
//!
//! | Step         | Byte      | Action                                     |
//! |--------------|-----------|--------------------------------------------|
//! | `Idle`       | `ESC`     | → `SawEscape`                              |
//! | `Idle`       | other     | table lookup, emit                         |
//! | `SawEscape`  | `[`       | → `SawBracket`                             |
//! | `SawEscape`  | other     | emit `Alt` + lookup, → `Idle`              |
//! | `SawBracket` | any       | extended lookup, emit, → `InExtended`      |
//! | `InExtended` | `~`       | → `Idle`                                   |
//! | `InExtended` | `ESC`     | → `SawEscape`                              |
//! | `InExtended` | other     | table lookup, emit                         |
//!
//! A byte the table does not know is a *decode miss*: the step resets to
//! `Idle`, the byte is dropped, and decoding continues with the next byte.
//!
//! The step survives between calls, so an escape sequence split across two
//! reads decodes the same as one delivered whole.
//!
//! # Accounting
//!
//! Every byte fed is classified exactly once in [`DecodeStats`]: it produced
//! a key token, it was sequence framing (`ESC`, `[`, `~`), or it was a miss.
//!
//! # Cursor position reports
//!
//! A terminal answers `ESC [ 6 n` on the same channel the keys arrive on,
//! and a late answer can land among typed input. Complete reports
//! (`ESC [ row ; col R`) are removed from stashed bytes and from channel
//! input before decoding, and a trailing fragment of one is held back until
//! the rest arrives. Reports never become key tokens.

use std::io;

use crate::channel::RawChannel;
use crate::token::{KeyTable, Token};

const ESC: u8 = 0x1B;
const BRACKET: u8 = b'[';
const TILDE: u8 = b'~';
const REPORT_END: u8 = b'R';
/// Longest row or column number a report may carry.
const REPORT_MAX_DIGITS: usize = 5;

/// Decoder position inside an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeStep {
    /// Plain input.
    #[default]
    Idle,
    /// After `ESC`.
    SawEscape,
    /// After `ESC [`.
    SawBracket,
    /// After the key selector of an extended sequence, until `~`.
    InExtended,
}

/// Running per-byte classification counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeStats {
    /// Bytes that produced a key token.
    pub keys: usize,
    /// Bytes consumed as escape sequence framing.
    pub framing: usize,
    /// Bytes dropped as decode misses.
    pub misses: usize,
}

impl DecodeStats {
    /// Total bytes fed to the decoder.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.keys + self.framing + self.misses
    }
}

/// Raw byte → token decoder.
///
/// ```
/// use serline_core::key_decoder::KeyDecoder;
/// use serline_core::token::Token;
///
/// let mut decoder = KeyDecoder::new();
/// assert_eq!(decoder.decode(b"a\x1b[D"), vec![Token::Char('a'), Token::Left]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyDecoder {
    step: DecodeStep,
    table: KeyTable,
    /// Bytes received but not yet decoded (e.g. drained during a query).
    stash: Vec<u8>,
    stats: DecodeStats,
}

impl KeyDecoder {
    /// Create a decoder using [`KeyTable::standard`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with a custom table.
    #[must_use]
    pub fn with_table(table: KeyTable) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }

    /// Current step.
    #[must_use]
    pub const fn step(&self) -> DecodeStep {
        self.step
    }

    /// The lookup table in use.
    #[must_use]
    pub const fn table(&self) -> &KeyTable {
        &self.table
    }

    /// Running byte classification counts.
    #[must_use]
    pub const fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Return to `Idle` and drop stashed bytes.
    pub fn reset(&mut self) {
        self.step = DecodeStep::Idle;
        self.stash.clear();
    }

    /// Keep bytes for the next [`decode_from`](Self::decode_from).
    ///
    /// Complete cursor position reports in the stash are dropped.
    pub fn stash(&mut self, bytes: &[u8]) {
        self.stash.extend_from_slice(bytes);
        let dropped = strip_cursor_reports(&mut self.stash);
        if dropped > 0 {
            crate::debug!(dropped, "cursor reports dropped from stash");
        }
    }

    /// Whether stashed bytes are waiting.
    #[must_use]
    pub fn has_stash(&self) -> bool {
        !self.stash.is_empty()
    }

    /// Decode stashed bytes followed by everything the channel has available.
    ///
    /// Cursor position reports are dropped. A trailing escape sequence that
    /// could still grow into one stays stashed for the next call.
    pub fn decode_from<C: RawChannel + ?Sized>(&mut self, channel: &mut C) -> io::Result<Vec<Token>> {
        let mut bytes = std::mem::take(&mut self.stash);
        bytes.extend(channel.read_available()?);
        let dropped = strip_cursor_reports(&mut bytes);
        if dropped > 0 {
            crate::debug!(dropped, "cursor reports dropped from input");
        }
        if let Some(start) = partial_report_start(&bytes) {
            self.stash = bytes.split_off(start);
        }
        Ok(self.decode(&bytes))
    }

    /// Decode a chunk of bytes.
    pub fn decode(&mut self, input: &[u8]) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(input.len());
        for &byte in input {
            self.process_byte(byte, &mut tokens);
        }
        tokens
    }

    fn process_byte(&mut self, byte: u8, out: &mut Vec<Token>) {
        match self.step {
            DecodeStep::Idle => {
                if byte == ESC {
                    self.framing(DecodeStep::SawEscape);
                } else {
                    let token = self.table.lookup_byte(byte);
                    self.emit(byte, token, out);
                }
            }
            DecodeStep::SawEscape => {
                if byte == BRACKET {
                    self.framing(DecodeStep::SawBracket);
                } else if let Some(token) = self.table.lookup_byte(byte) {
                    self.step = DecodeStep::Idle;
                    self.stats.keys += 1;
                    out.push(Token::Alt);
                    out.push(token);
                } else {
                    self.miss(byte);
                }
            }
            DecodeStep::SawBracket => {
                if let Some(token) = self.table.lookup_extended(byte) {
                    self.step = DecodeStep::InExtended;
                    self.stats.keys += 1;
                    out.push(token);
                } else {
                    self.miss(byte);
                }
            }
            DecodeStep::InExtended => match byte {
                TILDE => self.framing(DecodeStep::Idle),
                ESC => self.framing(DecodeStep::SawEscape),
                _ => {
                    let token = self.table.lookup_byte(byte);
                    self.emit(byte, token, out);
                }
            },
        }
    }

    fn emit(&mut self, byte: u8, token: Option<Token>, out: &mut Vec<Token>) {
        match token {
            Some(token) => {
                self.stats.keys += 1;
                out.push(token);
            }
            None => self.miss(byte),
        }
    }

    fn framing(&mut self, next: DecodeStep) {
        self.stats.framing += 1;
        self.step = next;
    }

    fn miss(&mut self, byte: u8) {
        crate::debug!(byte, step = ?self.step, "decode miss");
        self.stats.misses += 1;
        self.step = DecodeStep::Idle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportScan {
    /// A whole report of this many bytes.
    Complete(usize),
    /// Every byte so far fits a report, but it has not ended.
    Partial,
    NotReport,
}

/// Match `ESC [ digits ; digits R` at the start of `bytes`.
fn scan_report(bytes: &[u8]) -> ReportScan {
    let mut row_digits = 0;
    let mut col_digits = 0;
    let mut seen_separator = false;

    for (i, &b) in bytes.iter().enumerate() {
        let fits = match (i, b) {
            (0, _) => b == ESC,
            (1, _) => b == BRACKET,
            (_, b'0'..=b'9') => {
                let digits = if seen_separator {
                    &mut col_digits
                } else {
                    &mut row_digits
                };
                *digits += 1;
                *digits <= REPORT_MAX_DIGITS
            }
            (_, b';') => {
                let first = !seen_separator && row_digits > 0;
                seen_separator = true;
                first
            }
            (_, REPORT_END) => {
                if seen_separator && col_digits > 0 {
                    return ReportScan::Complete(i + 1);
                }
                false
            }
            _ => false,
        };
        if !fits {
            return ReportScan::NotReport;
        }
    }
    ReportScan::Partial
}

/// Remove complete cursor position reports. Returns how many were removed.
fn strip_cursor_reports(bytes: &mut Vec<u8>) -> usize {
    if !bytes.contains(&ESC) {
        return 0;
    }
    let mut kept = Vec::with_capacity(bytes.len());
    let mut dropped = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESC
            && let ReportScan::Complete(len) = scan_report(&bytes[i..])
        {
            i += len;
            dropped += 1;
            continue;
        }
        kept.push(bytes[i]);
        i += 1;
    }
    *bytes = kept;
    dropped
}

/// Start of a trailing fragment that may still become a report.
fn partial_report_start(bytes: &[u8]) -> Option<usize> {
    let start = bytes.iter().rposition(|&b| b == ESC)?;
    (scan_report(&bytes[start..]) == ReportScan::Partial).then_some(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[test]
    fn ascii_characters() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(
            decoder.decode(b"hi!"),
            vec![Token::Char('h'), Token::Char('i'), Token::Char('!')]
        );
    }

    #[test]
    fn control_bytes() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(
            decoder.decode(&[0x03, 0x04, 0x7F, 0x08, 0x0D, 0x09]),
            vec![
                Token::Ctrl('c'),
                Token::Ctrl('d'),
                Token::Backspace,
                Token::Backspace,
                Token::Enter,
                Token::Tab,
            ]
        );
    }

    #[test]
    fn arrow_keys() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.decode(b"\x1b[A"), vec![Token::Up]);
        assert_eq!(decoder.decode(b"\x1b[B"), vec![Token::Down]);
        assert_eq!(decoder.decode(b"\x1b[C"), vec![Token::Right]);
        assert_eq!(decoder.decode(b"\x1b[D"), vec![Token::Left]);
        assert_eq!(decoder.step(), DecodeStep::InExtended);
    }

    #[test]
    fn tilde_sequences_return_to_idle() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.decode(b"\x1b[3~"), vec![Token::Delete]);
        assert_eq!(decoder.step(), DecodeStep::Idle);
        assert_eq!(decoder.decode(b"\x1b[2~x"), vec![Token::Insert, Token::Char('x')]);
    }

    #[test]
    fn extended_state_resolves_plain_bytes() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(
            decoder.decode(b"\x1b[Dab"),
            vec![Token::Left, Token::Char('a'), Token::Char('b')]
        );
        assert_eq!(decoder.step(), DecodeStep::InExtended);
    }

    #[test]
    fn escape_restarts_inside_extended() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.decode(b"\x1b[D\x1b[D"), vec![Token::Left, Token::Left]);
    }

    #[test]
    fn alt_prefix() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.decode(b"\x1bx"), vec![Token::Alt, Token::Char('x')]);
        assert_eq!(decoder.step(), DecodeStep::Idle);
        assert_eq!(decoder.decode(b"\x1b\x1b"), vec![Token::Alt, Token::Escape]);
    }

    #[test]
    fn sequence_split_across_reads() {
        let mut decoder = KeyDecoder::new();
        assert!(decoder.decode(b"\x1b").is_empty());
        assert_eq!(decoder.step(), DecodeStep::SawEscape);
        assert!(decoder.decode(b"[").is_empty());
        assert_eq!(decoder.decode(b"3"), vec![Token::Delete]);
        assert!(decoder.decode(b"~").is_empty());
        assert_eq!(decoder.step(), DecodeStep::Idle);
    }

    #[test]
    fn miss_resets_and_continues() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), vec![Token::Char('a'), Token::Char('b')]);
        assert_eq!(decoder.stats().misses, 1);

        // Unknown extended selector drops the selector only.
        assert_eq!(decoder.decode(b"\x1b[Zq"), vec![Token::Char('q')]);
        assert_eq!(decoder.stats().misses, 2);
        assert_eq!(decoder.step(), DecodeStep::Idle);
    }

    #[test]
    fn stats_account_for_every_byte() {
        let mut decoder = KeyDecoder::new();
        let input = b"ab\x1b[C\x1bz\x1b[3~\xff\x1b[Q";
        let _ = decoder.decode(input);
        assert_eq!(decoder.stats().total(), input.len());
    }

    #[test]
    fn stash_is_decoded_before_channel_bytes() {
        let mut decoder = KeyDecoder::new();
        decoder.stash(b"x");
        assert!(decoder.has_stash());
        let mut chan = MemoryChannel::new().with_input(b"y");
        assert_eq!(
            decoder.decode_from(&mut chan).unwrap(),
            vec![Token::Char('x'), Token::Char('y')]
        );
        assert!(!decoder.has_stash());
    }

    #[test]
    fn cursor_reports_never_become_keys() {
        let mut decoder = KeyDecoder::new();
        decoder.stash(b"a\x1b[1;5Rb");
        let mut chan = MemoryChannel::new().with_input(b"\x1b[24;80Rc\x1b[D");
        assert_eq!(
            decoder.decode_from(&mut chan).unwrap(),
            vec![Token::Char('a'), Token::Char('b'), Token::Char('c'), Token::Left]
        );
        assert!(!decoder.has_stash());
    }

    #[test]
    fn complete_report_in_stash_is_dropped() {
        let mut decoder = KeyDecoder::new();
        decoder.stash(b"\x1b[3;");
        assert!(decoder.has_stash());
        decoder.stash(b"9R");
        assert!(!decoder.has_stash());
    }

    #[test]
    fn report_fragment_waits_for_the_rest() {
        let mut decoder = KeyDecoder::new();
        let mut chan = MemoryChannel::new().with_input(b"ok\x1b[12;");
        assert_eq!(
            decoder.decode_from(&mut chan).unwrap(),
            vec![Token::Char('o'), Token::Char('k')]
        );
        assert!(decoder.has_stash());
        chan.push_input(b"40R\r");
        assert_eq!(decoder.decode_from(&mut chan).unwrap(), vec![Token::Enter]);
        assert!(!decoder.has_stash());
    }

    #[test]
    fn split_key_sequence_still_decodes() {
        let mut decoder = KeyDecoder::new();
        let mut chan = MemoryChannel::new().with_input(b"x\x1b[");
        assert_eq!(decoder.decode_from(&mut chan).unwrap(), vec![Token::Char('x')]);
        chan.push_input(b"3~");
        assert_eq!(decoder.decode_from(&mut chan).unwrap(), vec![Token::Delete]);
    }

    #[test]
    fn report_scanner_edges() {
        assert_eq!(scan_report(b"\x1b[1;1R"), ReportScan::Complete(6));
        assert_eq!(scan_report(b"\x1b[1;1Rxyz"), ReportScan::Complete(6));
        assert_eq!(scan_report(b"\x1b[1"), ReportScan::Partial);
        assert_eq!(scan_report(b"\x1b[;1R"), ReportScan::NotReport);
        assert_eq!(scan_report(b"\x1b[1;R"), ReportScan::NotReport);
        assert_eq!(scan_report(b"\x1b[3~"), ReportScan::NotReport);
        assert_eq!(scan_report(b"\x1b[123456;1R"), ReportScan::NotReport);
        assert_eq!(scan_report(b"\x1bx"), ReportScan::NotReport);
    }

    #[test]
    fn custom_table() {
        let table = KeyTable::standard().with_entry(u16::from(b'q'), None);
        let mut decoder = KeyDecoder::with_table(table);
        assert_eq!(decoder.decode(b"qw"), vec![Token::Char('w')]);
    }

    #[test]
    fn no_panic_on_garbage() {
        let mut decoder = KeyDecoder::new();
        let garbage = [0xFF, 0xFE, 0x00, 0x1B, 0x1B, 0x1B, b'[', 0xFF, b']', 0x00];
        let _ = decoder.decode(&garbage);
        assert_eq!(decoder.stats().total(), garbage.len());
    }
}
