#![forbid(unsafe_code)]

//! Terminal coordinates as reported by the terminal itself.
//!
//! Everything here is 1-indexed, matching the cursor position report
//! (`ESC [ row ; col R`) and the absolute move (`ESC [ row ; col H`).

use std::fmt;

/// A cursor position, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorPos {
    /// Row, starting at 1.
    pub row: u16,
    /// Column, starting at 1.
    pub col: u16,
}

impl CursorPos {
    /// Create a new position.
    #[must_use]
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// Home position (1, 1).
    pub const ORIGIN: Self = Self::new(1, 1);
}

impl fmt::Display for CursorPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.row, self.col)
    }
}

/// Terminal geometry as `[rows, columns]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermSize {
    /// Number of rows.
    pub rows: u16,
    /// Number of columns.
    pub cols: u16,
}

impl TermSize {
    /// Create a new size.
    #[must_use]
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// The bottom-right cell of a terminal with this size.
    ///
    /// This is where a cursor lands after an oversized relative move, which
    /// is how geometry is measured over a bare channel.
    #[must_use]
    pub const fn bottom_right(&self) -> CursorPos {
        CursorPos::new(self.rows, self.cols)
    }
}

impl From<CursorPos> for TermSize {
    fn from(pos: CursorPos) -> Self {
        Self::new(pos.row, pos.col)
    }
}

impl fmt::Display for TermSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
