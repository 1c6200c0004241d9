#![forbid(unsafe_code)]

//! Single-line edit buffer.
//!
//! The cursor is stored as an offset from the *end* of the text: `0` means
//! the cursor sits after the last character, `len` means it sits before the
//! first. Every edit happens at index `len - offset`.
//!
//! Each primitive changes the buffer and writes the minimal byte sequence that
//! makes a VT100-style terminal show the same thing. The buffer never reads the
//! screen back; it assumes the terminal cursor is where the last primitive
//! left it.
//!
//! Lengths and offsets count `char`s. One char is assumed to occupy one
//! terminal column.

use std::io::{self, Write};

use crate::trigger::EchoPolicy;

/// Result of [`LineBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The character was placed in the buffer.
    Inserted,
    /// The line has no room left; nothing changed.
    Overflow,
}

/// Editable text with a cursor and an optional remaining-width tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBuffer {
    text: String,
    offset: usize,
    space_remaining: Option<i32>,
}

impl LineBuffer {
    /// Create an empty buffer with unknown remaining width.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding `text`, cursor at the end.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Current text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Take the text out, leaving the buffer empty.
    pub fn take_text(&mut self) -> String {
        self.offset = 0;
        std::mem::take(&mut self.text)
    }

    /// Length in chars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Cursor distance from the end of the text.
    #[must_use]
    pub const fn offset_from_end(&self) -> usize {
        self.offset
    }

    /// Cursor index from the start of the text.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.len() - self.offset
    }

    /// Columns left on the terminal line, when known.
    #[must_use]
    pub const fn space_remaining(&self) -> Option<i32> {
        self.space_remaining
    }

    /// Set the remaining width tracker.
    pub fn set_space_remaining(&mut self, space: Option<i32>) {
        self.space_remaining = space;
    }

    /// Clear text and cursor. The width tracker is left alone.
    pub fn reset(&mut self) {
        self.text.clear();
        self.offset = 0;
    }

    /// Write `prefix` and the current text, then move the terminal cursor back
    /// to the buffer cursor.
    pub fn render(&self, prefix: &str, out: &mut impl Write) -> io::Result<()> {
        out.write_all(prefix.replace('\n', "\n\r").as_bytes())?;
        out.write_all(self.text.as_bytes())?;
        if self.offset > 0 {
            write!(out, "\x1b[{}D", self.offset)?;
        }
        Ok(())
    }

    /// Remove up to `n` chars before the cursor. Returns how many were removed.
    pub fn backspace(&mut self, n: usize, out: &mut impl Write) -> io::Result<usize> {
        let mut removed = 0;
        for _ in 0..n {
            let cursor = self.cursor();
            if cursor == 0 {
                break;
            }
            self.remove_char(cursor - 1);
            if self.offset == 0 {
                out.write_all(b"\x08 \x08")?;
            } else {
                out.write_all(b"\x08")?;
                self.redraw_tail(cursor - 1, out)?;
            }
            self.grow_space(1);
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove up to `n` chars under the cursor. Returns how many were removed.
    ///
    /// The cursor stays in place on screen, so its offset from the end shrinks.
    pub fn delete(&mut self, n: usize, out: &mut impl Write) -> io::Result<usize> {
        let mut removed = 0;
        for _ in 0..n {
            if self.offset == 0 {
                break;
            }
            let cursor = self.cursor();
            self.remove_char(cursor);
            self.offset -= 1;
            self.redraw_tail(cursor, out)?;
            self.grow_space(1);
            removed += 1;
        }
        Ok(removed)
    }

    /// Move the cursor to the start of the text.
    pub fn home(&mut self, out: &mut impl Write) -> io::Result<()> {
        let crossed = self.cursor();
        self.offset = self.len();
        for _ in 0..crossed {
            out.write_all(b"\x08")?;
        }
        Ok(())
    }

    /// Move the cursor to the end of the text.
    pub fn end(&mut self, out: &mut impl Write) -> io::Result<()> {
        for _ in 0..self.offset {
            out.write_all(b"\x1b[1C")?;
        }
        self.offset = 0;
        Ok(())
    }

    /// Move one char left. Returns whether the cursor moved.
    pub fn move_left(&mut self, out: &mut impl Write) -> io::Result<bool> {
        if self.offset >= self.len() {
            return Ok(false);
        }
        out.write_all(b"\x08")?;
        self.offset += 1;
        Ok(true)
    }

    /// Move one char right. Returns whether the cursor moved.
    pub fn move_right(&mut self, out: &mut impl Write) -> io::Result<bool> {
        if self.offset == 0 {
            return Ok(false);
        }
        out.write_all(b"\x1b[1C")?;
        self.offset -= 1;
        Ok(true)
    }

    /// Insert `ch` at the cursor.
    ///
    /// Returns [`InsertOutcome::Overflow`] without touching anything when the
    /// line is known to be full.
    pub fn insert(
        &mut self,
        ch: char,
        echo: EchoPolicy,
        out: &mut impl Write,
    ) -> io::Result<InsertOutcome> {
        if self.space_remaining.is_some_and(|space| space <= 0) {
            return Ok(InsertOutcome::Overflow);
        }

        let cursor = self.cursor();
        let at = self.byte_index(cursor);
        self.text.insert(at, ch);
        if let Some(space) = self.space_remaining.as_mut() {
            *space -= 1;
        }

        if echo.echoes() {
            let tail = &self.text[at..];
            out.write_all(tail.as_bytes())?;
            for _ in 0..self.offset {
                out.write_all(b"\x08")?;
            }
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Rewrite the text after char index `from`, blank the freed cell, and
    /// return the terminal cursor to `from`.
    fn redraw_tail(&self, from: usize, out: &mut impl Write) -> io::Result<()> {
        let tail = &self.text[self.byte_index(from)..];
        out.write_all(tail.as_bytes())?;
        write!(out, " \x1b[{}D", tail.chars().count() + 1)
    }

    fn remove_char(&mut self, index: usize) {
        let at = self.byte_index(index);
        self.text.remove(at);
    }

    fn grow_space(&mut self, by: i32) {
        if let Some(space) = self.space_remaining.as_mut() {
            *space += by;
        }
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map_or(self.text.len(), |(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(text: &str) -> LineBuffer {
        let mut buf = LineBuffer::new();
        let mut sink = Vec::new();
        for ch in text.chars() {
            buf.insert(ch, EchoPolicy::All, &mut sink).unwrap();
        }
        buf
    }

    fn lefts(buf: &mut LineBuffer, n: usize) {
        let mut sink = Vec::new();
        for _ in 0..n {
            buf.move_left(&mut sink).unwrap();
        }
    }

    #[test]
    fn append_echoes_char() {
        let mut buf = LineBuffer::new();
        let mut out = Vec::new();
        assert_eq!(
            buf.insert('h', EchoPolicy::Common, &mut out).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(out, b"h");
        assert_eq!(buf.text(), "h");
    }

    #[test]
    fn mid_insert_redraws_tail() {
        let mut buf = typed("ab");
        lefts(&mut buf, 1);
        let mut out = Vec::new();
        buf.insert('c', EchoPolicy::All, &mut out).unwrap();
        assert_eq!(buf.text(), "acb");
        assert_eq!(buf.offset_from_end(), 1);
        // tail "cb" then back over "b"
        assert_eq!(out, b"cb\x08");
    }

    #[test]
    fn silent_insert() {
        let mut buf = typed("ab");
        lefts(&mut buf, 2);
        let mut out = Vec::new();
        buf.insert('x', EchoPolicy::None, &mut out).unwrap();
        assert_eq!(buf.text(), "xab");
        assert!(out.is_empty());
    }

    #[test]
    fn overflow_changes_nothing() {
        let mut buf = typed("ab");
        buf.set_space_remaining(Some(0));
        let mut out = Vec::new();
        assert_eq!(
            buf.insert('z', EchoPolicy::All, &mut out).unwrap(),
            InsertOutcome::Overflow
        );
        assert_eq!(buf.text(), "ab");
        assert_eq!(buf.space_remaining(), Some(0));
        assert!(out.is_empty());
    }

    #[test]
    fn insert_tracks_space() {
        let mut buf = LineBuffer::new();
        buf.set_space_remaining(Some(2));
        let mut out = Vec::new();
        buf.insert('a', EchoPolicy::All, &mut out).unwrap();
        buf.insert('b', EchoPolicy::All, &mut out).unwrap();
        assert_eq!(buf.space_remaining(), Some(0));
        assert_eq!(
            buf.insert('c', EchoPolicy::All, &mut out).unwrap(),
            InsertOutcome::Overflow
        );
    }

    #[test]
    fn backspace_at_end() {
        let mut buf = typed("abc");
        buf.set_space_remaining(Some(5));
        let mut out = Vec::new();
        assert_eq!(buf.backspace(1, &mut out).unwrap(), 1);
        assert_eq!(buf.text(), "ab");
        assert_eq!(out, b"\x08 \x08");
        assert_eq!(buf.space_remaining(), Some(6));
    }

    #[test]
    fn backspace_mid_line() {
        let mut buf = typed("abcd");
        lefts(&mut buf, 2);
        let mut out = Vec::new();
        buf.backspace(1, &mut out).unwrap();
        assert_eq!(buf.text(), "acd");
        assert_eq!(buf.offset_from_end(), 2);
        assert_eq!(out, b"\x08cd \x1b[3D");
    }

    #[test]
    fn backspace_at_start_is_noop() {
        let mut buf = typed("ab");
        lefts(&mut buf, 2);
        let mut out = Vec::new();
        assert_eq!(buf.backspace(3, &mut out).unwrap(), 0);
        assert_eq!(buf.text(), "ab");
        assert!(out.is_empty());
    }

    #[test]
    fn backspace_many_stops_at_empty() {
        let mut buf = typed("ab");
        let mut out = Vec::new();
        assert_eq!(buf.backspace(5, &mut out).unwrap(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn delete_under_cursor() {
        let mut buf = typed("abcd");
        lefts(&mut buf, 3);
        let mut out = Vec::new();
        assert_eq!(buf.delete(1, &mut out).unwrap(), 1);
        assert_eq!(buf.text(), "acd");
        assert_eq!(buf.offset_from_end(), 2);
        assert_eq!(out, b"cd \x1b[3D");
    }

    #[test]
    fn delete_from_start() {
        let mut buf = typed("abc");
        lefts(&mut buf, 3);
        let mut out = Vec::new();
        buf.delete(1, &mut out).unwrap();
        assert_eq!(buf.text(), "bc");
        assert_eq!(buf.offset_from_end(), 2);
        assert_eq!(out, b"bc \x1b[3D");
    }

    #[test]
    fn delete_at_end_or_empty_is_noop() {
        let mut buf = typed("abc");
        let mut out = Vec::new();
        assert_eq!(buf.delete(1, &mut out).unwrap(), 0);
        let mut empty = LineBuffer::new();
        assert_eq!(empty.delete(1, &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn home_then_home_is_noop() {
        let mut buf = typed("abc");
        let mut out = Vec::new();
        buf.home(&mut out).unwrap();
        assert_eq!(out, b"\x08\x08\x08");
        assert_eq!(buf.offset_from_end(), 3);
        out.clear();
        buf.home(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(buf.offset_from_end(), 3);
    }

    #[test]
    fn end_moves_right() {
        let mut buf = typed("abc");
        lefts(&mut buf, 2);
        let mut out = Vec::new();
        buf.end(&mut out).unwrap();
        assert_eq!(out, b"\x1b[1C\x1b[1C");
        assert_eq!(buf.offset_from_end(), 0);
    }

    #[test]
    fn left_right_bounds() {
        let mut buf = typed("a");
        let mut out = Vec::new();
        assert!(!buf.move_right(&mut out).unwrap());
        assert!(buf.move_left(&mut out).unwrap());
        assert!(!buf.move_left(&mut out).unwrap());
        assert_eq!(out, b"\x08");
        assert!(buf.move_right(&mut out).unwrap());
        assert_eq!(out, b"\x08\x1b[1C");
    }

    #[test]
    fn render_places_cursor() {
        let mut buf = typed("hello");
        lefts(&mut buf, 2);
        let mut out = Vec::new();
        buf.render("> \n", &mut out).unwrap();
        assert_eq!(out, b"> \n\rhello\x1b[2D");
    }

    #[test]
    fn multibyte_chars_are_single_positions() {
        let mut buf = typed("aé");
        lefts(&mut buf, 1);
        let mut out = Vec::new();
        buf.insert('ü', EchoPolicy::All, &mut out).unwrap();
        assert_eq!(buf.text(), "aüé");
        buf.backspace(1, &mut out).unwrap();
        assert_eq!(buf.text(), "aé");
    }

    #[test]
    fn take_text_resets() {
        let mut buf = typed("xy");
        lefts(&mut buf, 1);
        assert_eq!(buf.take_text(), "xy");
        assert!(buf.is_empty());
        assert_eq!(buf.offset_from_end(), 0);
    }
}
