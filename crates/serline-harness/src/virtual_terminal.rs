#![forbid(unsafe_code)]

//! In-memory terminal on the far end of a raw channel.
//!
//! `VirtualTerminal` plays the part of the serial console: bytes the editor
//! writes are interpreted against a character grid, and bytes "typed" by a
//! test are queued for the editor to read. Cursor position requests
//! (`ESC [ 6 n`) are answered by queueing the report behind any keys already
//! typed, the same way a real terminal interleaves them on the wire.
//!
//! # Invariants
//!
//! 1. **Cursor always in bounds**: `cursor_x <= width`, `cursor_y < height`.
//!    `cursor_x == width` is the pending wrap state; the next printable
//!    character wraps to the next line.
//! 2. **Grid always fully populated**: `grid.len() == width * height`.
//!
//! Unrecognized sequences are silently ignored.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use serline_core::channel::{ChannelCapabilities, RawChannel};
use serline_core::geometry::{CursorPos, TermSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    Csi,
}

/// Simulated terminal: screen state plus the keyboard side of the channel.
#[derive(Debug, Clone)]
pub struct VirtualTerminal {
    width: u16,
    height: u16,
    grid: Vec<char>,
    cursor_x: u16,
    cursor_y: u16,
    saved_cursor: Option<(u16, u16)>,
    parse_state: ParseState,
    csi_params: Vec<u16>,
    csi_private: bool,
    utf8: Vec<u8>,
    keyboard: VecDeque<u8>,
    answer_queries: bool,
    capabilities: ChannelCapabilities,
    attached: bool,
    bytes_received: usize,
    queries_seen: usize,
}

impl VirtualTerminal {
    /// Blank terminal of `width` columns by `height` rows.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        assert!(width > 0 && height > 0, "terminal dimensions must be > 0");
        Self {
            width,
            height,
            grid: vec![' '; usize::from(width) * usize::from(height)],
            cursor_x: 0,
            cursor_y: 0,
            saved_cursor: None,
            parse_state: ParseState::Ground,
            csi_params: Vec::new(),
            csi_private: false,
            utf8: Vec::new(),
            keyboard: VecDeque::new(),
            answer_queries: true,
            capabilities: ChannelCapabilities::empty(),
            attached: true,
            bytes_received: 0,
            queries_seen: 0,
        }
    }

    /// Stop answering cursor position requests, like a dumb console.
    #[must_use]
    pub fn unresponsive(mut self) -> Self {
        self.answer_queries = false;
        self
    }

    /// Report real liveness through [`RawChannel::connected`].
    #[must_use]
    pub fn with_liveness(mut self) -> Self {
        self.capabilities |= ChannelCapabilities::LIVENESS;
        self
    }

    /// Report the screen size directly instead of answering geometry queries.
    #[must_use]
    pub fn with_size_reporting(mut self) -> Self {
        self.capabilities |= ChannelCapabilities::SIZE;
        self
    }

    /// Queue keystrokes for the editor to read.
    pub fn type_bytes(&mut self, bytes: &[u8]) {
        self.keyboard.extend(bytes);
    }

    /// Queue a string of keystrokes.
    pub fn type_str(&mut self, text: &str) {
        self.type_bytes(text.as_bytes());
    }

    /// Detach the far end. Only visible with liveness enabled.
    pub fn hang_up(&mut self) {
        self.attached = false;
    }

    /// Bytes queued for the editor and not yet read.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.keyboard.len()
    }

    /// Total bytes received from the editor.
    #[must_use]
    pub const fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// Cursor position requests received so far.
    #[must_use]
    pub const fn queries_seen(&self) -> usize {
        self.queries_seen
    }

    /// Screen width in columns.
    #[must_use]
    pub const fn width(&self) -> u16 {
        self.width
    }

    /// Screen height in rows.
    #[must_use]
    pub const fn height(&self) -> u16 {
        self.height
    }

    /// Cursor as a 1-based position, as the terminal would report it.
    #[must_use]
    pub fn cursor(&self) -> CursorPos {
        CursorPos::new(
            self.cursor_y + 1,
            self.cursor_x.min(self.width.saturating_sub(1)) + 1,
        )
    }

    /// Text of row `y` (0-indexed) with trailing spaces trimmed.
    #[must_use]
    pub fn row_text(&self, y: u16) -> String {
        if y >= self.height {
            return String::new();
        }
        let start = self.idx(0, y);
        let end = start + usize::from(self.width);
        let s: String = self.grid[start..end].iter().collect();
        s.trim_end().to_string()
    }

    /// All rows joined by newlines.
    #[must_use]
    pub fn screen_text(&self) -> String {
        (0..self.height)
            .map(|y| self.row_text(y))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Character at `(x, y)`, 0-indexed.
    #[must_use]
    pub fn char_at(&self, x: u16, y: u16) -> Option<char> {
        (x < self.width && y < self.height).then(|| self.grid[self.idx(x, y)])
    }

    /// Interpret bytes written by the editor.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.bytes_received += bytes.len();
        for &b in bytes {
            self.process_byte(b);
        }
    }

    fn cpr_response(&self) -> Vec<u8> {
        let pos = self.cursor();
        format!("\x1b[{};{}R", pos.row, pos.col).into_bytes()
    }

    fn idx(&self, x: u16, y: u16) -> usize {
        usize::from(y) * usize::from(self.width) + usize::from(x)
    }

    fn process_byte(&mut self, byte: u8) {
        match self.parse_state {
            ParseState::Ground => self.ground(byte),
            ParseState::Escape => self.escape(byte),
            ParseState::Csi => self.csi(byte),
        }
    }

    fn ground(&mut self, byte: u8) {
        if byte >= 0x80 {
            self.utf8_byte(byte);
            return;
        }
        self.utf8.clear();
        match byte {
            0x1b => self.parse_state = ParseState::Escape,
            b'\n' => self.linefeed(),
            b'\r' => self.cursor_x = 0,
            b'\x08' => {
                self.cursor_x = self.cursor_x.min(self.width).saturating_sub(1);
            }
            0x20..=0x7e => self.put_char(char::from(byte)),
            _ => {}
        }
    }

    fn utf8_byte(&mut self, byte: u8) {
        self.utf8.push(byte);
        match std::str::from_utf8(&self.utf8) {
            Ok(s) => {
                let ch = s.chars().next().unwrap_or('\u{FFFD}');
                self.utf8.clear();
                self.put_char(ch);
            }
            Err(e) if e.error_len().is_some() => {
                self.utf8.clear();
                self.put_char('\u{FFFD}');
            }
            Err(_) => {}
        }
    }

    fn escape(&mut self, byte: u8) {
        self.parse_state = ParseState::Ground;
        match byte {
            b'[' => {
                self.parse_state = ParseState::Csi;
                self.csi_params.clear();
                self.csi_private = false;
            }
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            _ => {}
        }
    }

    fn csi(&mut self, byte: u8) {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                if let Some(last) = self.csi_params.last_mut() {
                    *last = last.saturating_mul(10).saturating_add(digit);
                } else {
                    self.csi_params.push(digit);
                }
            }
            b';' => {
                if self.csi_params.is_empty() {
                    self.csi_params.push(0);
                }
                self.csi_params.push(0);
            }
            b'?' => self.csi_private = true,
            0x40..=0x7e => {
                self.parse_state = ParseState::Ground;
                if !self.csi_private {
                    self.dispatch_csi(byte);
                }
            }
            _ => self.parse_state = ParseState::Ground,
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8) {
        let params = &self.csi_params;
        let last_col = self.width.saturating_sub(1);
        let last_row = self.height.saturating_sub(1);

        match final_byte {
            b'A' => {
                let n = Self::param(params, 0, 1);
                self.cursor_y = self.cursor_y.saturating_sub(n);
            }
            b'B' => {
                let n = Self::param(params, 0, 1);
                self.cursor_y = self.cursor_y.saturating_add(n).min(last_row);
            }
            b'C' => {
                let n = Self::param(params, 0, 1);
                self.cursor_x = self.cursor_x.saturating_add(n).min(last_col);
            }
            b'D' => {
                let n = Self::param(params, 0, 1);
                self.cursor_x = self.cursor_x.min(last_col).saturating_sub(n);
            }
            b'G' => {
                let col = Self::param(params, 0, 1).saturating_sub(1);
                self.cursor_x = col.min(last_col);
            }
            b'H' | b'f' => {
                let row = Self::param(params, 0, 1).saturating_sub(1);
                let col = Self::param(params, 1, 1).saturating_sub(1);
                self.cursor_y = row.min(last_row);
                self.cursor_x = col.min(last_col);
            }
            b'J' => {
                let mode = Self::param(params, 0, 0);
                self.erase_display(mode);
            }
            b'K' => {
                let mode = Self::param(params, 0, 0);
                self.erase_line(mode);
            }
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            b'n' => {
                if Self::param(params, 0, 0) == 6 {
                    self.queries_seen += 1;
                    if self.answer_queries {
                        let reply = self.cpr_response();
                        self.keyboard.extend(reply);
                    }
                }
            }
            _ => {}
        }
    }

    /// Parameter `idx`, with absent or zero values replaced by `default`.
    fn param(params: &[u16], idx: usize, default: u16) -> u16 {
        match params.get(idx) {
            Some(&0) | None => default,
            Some(&v) => v,
        }
    }

    fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor_x, self.cursor_y));
    }

    fn restore_cursor(&mut self) {
        if let Some((x, y)) = self.saved_cursor {
            self.cursor_x = x.min(self.width);
            self.cursor_y = y.min(self.height.saturating_sub(1));
        }
    }

    fn put_char(&mut self, ch: char) {
        if self.cursor_x >= self.width {
            self.cursor_x = 0;
            self.linefeed();
        }
        let idx = self.idx(self.cursor_x, self.cursor_y);
        self.grid[idx] = ch;
        self.cursor_x += 1;
    }

    fn linefeed(&mut self) {
        if self.cursor_y + 1 >= self.height {
            self.scroll_up();
        } else {
            self.cursor_y += 1;
        }
    }

    fn scroll_up(&mut self) {
        let w = usize::from(self.width);
        self.grid.drain(..w);
        self.grid.extend(std::iter::repeat_n(' ', w));
    }

    fn erase_display(&mut self, mode: u16) {
        let cursor = self.idx(self.cursor_x.min(self.width.saturating_sub(1)), self.cursor_y);
        let range = match mode {
            0 => cursor..self.grid.len(),
            1 => 0..cursor + 1,
            2 | 3 => 0..self.grid.len(),
            _ => return,
        };
        self.grid[range].fill(' ');
    }

    fn erase_line(&mut self, mode: u16) {
        let row_start = self.idx(0, self.cursor_y);
        let row_end = row_start + usize::from(self.width);
        let cursor = row_start + usize::from(self.cursor_x.min(self.width.saturating_sub(1)));
        let range = match mode {
            0 => cursor..row_end,
            1 => row_start..cursor + 1,
            2 => row_start..row_end,
            _ => return,
        };
        self.grid[range].fill(' ');
    }
}

impl RawChannel for VirtualTerminal {
    fn capabilities(&self) -> ChannelCapabilities {
        self.capabilities
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.keyboard.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.keyboard.len());
        for (slot, byte) in buf.iter_mut().zip(self.keyboard.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.feed(bytes);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.attached
    }

    fn size(&mut self) -> Option<TermSize> {
        Some(TermSize::new(self.height, self.width))
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.keyboard.clear();
        Ok(())
    }

    fn settle(&mut self, _window: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(vt: &VirtualTerminal) {
        assert!(vt.cursor_x <= vt.width, "cursor_x out of bounds");
        assert!(vt.cursor_y < vt.height, "cursor_y out of bounds");
        assert_eq!(
            vt.grid.len(),
            usize::from(vt.width) * usize::from(vt.height)
        );
    }

    fn read_all(vt: &mut VirtualTerminal) -> Vec<u8> {
        vt.read_available().unwrap()
    }

    #[test]
    fn prints_and_wraps() {
        let mut vt = VirtualTerminal::new(4, 3);
        vt.feed(b"abcdef");
        assert_eq!(vt.row_text(0), "abcd");
        assert_eq!(vt.row_text(1), "ef");
        assert_eq!(vt.cursor(), CursorPos::new(2, 3));
        assert_invariants(&vt);
    }

    #[test]
    fn carriage_return_and_linefeed() {
        let mut vt = VirtualTerminal::new(10, 3);
        vt.feed(b"one\n\rtwo");
        assert_eq!(vt.screen_text(), "one\ntwo\n");
    }

    #[test]
    fn scrolls_at_bottom() {
        let mut vt = VirtualTerminal::new(5, 2);
        vt.feed(b"a\n\rb\n\rc");
        assert_eq!(vt.row_text(0), "b");
        assert_eq!(vt.row_text(1), "c");
        assert_invariants(&vt);
    }

    #[test]
    fn backspace_blank_backspace_erases() {
        let mut vt = VirtualTerminal::new(10, 2);
        vt.feed(b"abc\x08 \x08");
        assert_eq!(vt.row_text(0), "ab");
        assert_eq!(vt.cursor(), CursorPos::new(1, 3));
    }

    #[test]
    fn cursor_moves_clamp() {
        let mut vt = VirtualTerminal::new(10, 5);
        vt.feed(b"\x1b[500B\x1b[500C");
        assert_eq!(vt.cursor(), CursorPos::new(5, 10));
        vt.feed(b"\x1b[99A\x1b[99D");
        assert_eq!(vt.cursor(), CursorPos::ORIGIN);
        vt.feed(b"\x1b[3;4H");
        assert_eq!(vt.cursor(), CursorPos::new(3, 4));
        vt.feed(b"\x1b[0G");
        assert_eq!(vt.cursor(), CursorPos::new(3, 1));
        assert_invariants(&vt);
    }

    #[test]
    fn save_and_restore() {
        let mut vt = VirtualTerminal::new(10, 5);
        vt.feed(b"\x1b[2;2H\x1b[s\x1b[5;9H\x1b[u");
        assert_eq!(vt.cursor(), CursorPos::new(2, 2));
        vt.feed(b"\x1b[4;4H\x1b7\x1b[H\x1b8");
        assert_eq!(vt.cursor(), CursorPos::new(4, 4));
    }

    #[test]
    fn erase_line_and_display() {
        let mut vt = VirtualTerminal::new(6, 2);
        vt.feed(b"abcdef\x1b[1;3H\x1b[K");
        assert_eq!(vt.row_text(0), "ab");
        vt.feed(b"\x1b[2K");
        assert_eq!(vt.row_text(0), "");
        vt.feed(b"xy\x1b[2;1Hzz\x1b[2J");
        assert_eq!(vt.screen_text(), "\n");
    }

    #[test]
    fn answers_position_requests() {
        let mut vt = VirtualTerminal::new(80, 24);
        vt.type_str("k");
        vt.feed(b"\x1b[3;7H\x1b[6n");
        assert_eq!(vt.queries_seen(), 1);
        assert_eq!(read_all(&mut vt), b"k\x1b[3;7R");
    }

    #[test]
    fn pending_wrap_reports_last_column() {
        let mut vt = VirtualTerminal::new(4, 2);
        vt.feed(b"abcd\x1b[6n");
        assert_eq!(read_all(&mut vt), b"\x1b[1;4R");
    }

    #[test]
    fn unresponsive_terminal_stays_silent() {
        let mut vt = VirtualTerminal::new(80, 24).unresponsive();
        vt.feed(b"\x1b[6n");
        assert_eq!(vt.queries_seen(), 1);
        assert_eq!(vt.bytes_available().unwrap(), 0);
    }

    #[test]
    fn private_sequences_are_ignored() {
        let mut vt = VirtualTerminal::new(10, 2);
        vt.feed(b"\x1b[?25lab\x1b[?25h");
        assert_eq!(vt.row_text(0), "ab");
        assert_eq!(vt.cursor(), CursorPos::new(1, 3));
    }

    #[test]
    fn multibyte_characters() {
        let mut vt = VirtualTerminal::new(10, 2);
        vt.feed("é→x".as_bytes());
        assert_eq!(vt.row_text(0), "é→x");
        assert_eq!(vt.char_at(1, 0), Some('→'));
    }

    #[test]
    fn liveness_and_size() {
        let mut vt = VirtualTerminal::new(40, 12).with_liveness().with_size_reporting();
        assert!(vt.capabilities().contains(ChannelCapabilities::LIVENESS));
        assert_eq!(vt.size(), Some(TermSize::new(12, 40)));
        assert!(vt.connected());
        vt.hang_up();
        assert!(!vt.connected());
    }

    #[test]
    fn reset_drops_typed_keys() {
        let mut vt = VirtualTerminal::new(10, 2);
        vt.type_str("abc");
        vt.reset_input_buffer().unwrap();
        assert_eq!(vt.pending_keys(), 0);
    }
}
