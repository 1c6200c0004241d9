#![forbid(unsafe_code)]

//! Named screen positions and the cursor moves that use them.
//!
//! The registry always holds `top_left` and `bottom_left`. A successful
//! geometry query moves `bottom_left` to the last row and sets the line
//! length; callers add their own bookmarks by capturing the cursor position.

use std::collections::HashMap;
use std::io::{self, Write};

use serline_core::geometry::{CursorPos, TermSize};

/// Bookmark for the first cell of the screen.
pub const TOP_LEFT: &str = "top_left";
/// Bookmark for the first cell of the last row.
pub const BOTTOM_LEFT: &str = "bottom_left";

/// Assumed line length before geometry is known.
pub const DEFAULT_LINE_LEN: u16 = 255;
/// Assumed last row before geometry is known.
const DEFAULT_LAST_ROW: u16 = 255;

const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[3J\x1b[H";
const CLEAR_LINE: &[u8] = b"\x1b[2K\x1b[0G";

/// Name → position bookmarks plus the known line length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRegistry {
    bookmarks: HashMap<String, CursorPos>,
    line_len: u16,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        let mut bookmarks = HashMap::new();
        bookmarks.insert(TOP_LEFT.to_owned(), CursorPos::ORIGIN);
        bookmarks.insert(BOTTOM_LEFT.to_owned(), CursorPos::new(DEFAULT_LAST_ROW, 1));
        Self {
            bookmarks,
            line_len: DEFAULT_LINE_LEN,
        }
    }
}

impl ContextRegistry {
    /// Registry with the default bookmarks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a bookmark.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CursorPos> {
        self.bookmarks.get(name).copied()
    }

    /// Store a bookmark, replacing any previous one with that name.
    pub fn set(&mut self, name: impl Into<String>, pos: CursorPos) {
        self.bookmarks.insert(name.into(), pos);
    }

    /// Known line length in columns.
    #[must_use]
    pub const fn line_len(&self) -> u16 {
        self.line_len
    }

    /// Record a measured terminal size.
    pub fn apply_geometry(&mut self, size: TermSize) {
        self.line_len = size.cols;
        self.set(BOTTOM_LEFT, CursorPos::new(size.rows, 1));
    }

    /// Columns left on a line with the cursor at `col`.
    #[must_use]
    pub fn space_after(&self, col: u16) -> i32 {
        i32::from(self.line_len) - i32::from(col)
    }

    /// Move a bookmark-relative distance. `dx` is columns (positive right),
    /// `dy` rows (positive down). Offsets that would leave the screen through
    /// the top or left edge are not emitted.
    ///
    /// Returns `false` if no bookmark has that name.
    pub fn move_to_bookmark(
        &self,
        name: &str,
        dx: i32,
        dy: i32,
        out: &mut impl Write,
    ) -> io::Result<bool> {
        let Some(pos) = self.get(name) else {
            return Ok(false);
        };
        move_to(pos.row, pos.col, out)?;

        if dy > 0 {
            write!(out, "\x1b[{dy}B")?;
        } else if dy < 0 && i32::from(pos.row) + dy >= 1 {
            write!(out, "\x1b[{}A", -dy)?;
        }
        if dx > 0 {
            write!(out, "\x1b[{dx}C")?;
        } else if dx < 0 && i32::from(pos.col) + dx >= 1 {
            write!(out, "\x1b[{}D", -dx)?;
        }
        Ok(true)
    }
}

/// Absolute move. Rows and columns below 1 are clamped to 1.
pub fn move_to(row: u16, col: u16, out: &mut impl Write) -> io::Result<()> {
    write!(out, "\x1b[{};{}H", row.max(1), col.max(1))
}

/// Clear the screen and scrollback, cursor to the top left.
pub fn clear_screen(out: &mut impl Write) -> io::Result<()> {
    out.write_all(CLEAR_SCREEN)
}

/// Clear the current line, cursor to its start.
pub fn clear_line(out: &mut impl Write) -> io::Result<()> {
    out.write_all(CLEAR_LINE)
}

/// Clear the current line and fill `cols` cells with `ch`.
pub fn draw_rule(ch: char, cols: u16, out: &mut impl Write) -> io::Result<()> {
    clear_line(out)?;
    let mut utf8 = [0u8; 4];
    let encoded = ch.encode_utf8(&mut utf8).as_bytes();
    for _ in 0..cols {
        out.write_all(encoded)?;
    }
    Ok(())
}
