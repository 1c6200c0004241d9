#![forbid(unsafe_code)]

//! Key tokens and the byte → token lookup table.
//!
//! A [`Token`] is the symbolic name of one decoded key. Tokens have stable
//! string names (`"enter"`, `"bck"`, `"ctrlC"`, `"a"`, ...) so that trigger
//! tables can be written by hand or loaded from configuration.
//!
//! # Table layout
//!
//! | Codes     | Meaning                                          |
//! |-----------|--------------------------------------------------|
//! | `0..=255` | A single byte received in ground state           |
//! | `300..`   | The byte following `ESC [` (arrows, home, del…)  |
//!
//! The extended block sits at [`EXTENDED_BASE`] so that a single `u16` code
//! space covers both plain and extended keys.

use std::fmt;
use std::str::FromStr;

/// Offset of the extended-key block in the code space.
pub const EXTENDED_BASE: u16 = 300;

/// Number of slots in each block.
const BLOCK_LEN: usize = 256;

/// Symbolic name for one decoded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// A character that can be placed in the line buffer.
    Char(char),
    /// Ctrl + letter. The letter is stored lowercase.
    Ctrl(char),
    /// Enter / carriage return.
    Enter,
    /// Horizontal tab.
    Tab,
    /// Backspace (`bck`).
    Backspace,
    /// Forward delete (`del`).
    Delete,
    /// A lone escape, only produced as `ESC ESC`.
    Escape,
    /// Home.
    Home,
    /// End.
    End,
    /// Cursor left.
    Left,
    /// Cursor right.
    Right,
    /// Cursor up.
    Up,
    /// Cursor down.
    Down,
    /// Insert (`ins`).
    Insert,
    /// Page up.
    PageUp,
    /// Page down.
    PageDown,
    /// Modifier marker: the following token was typed with Alt held.
    Alt,
}

impl Token {
    /// The character this token would place in the buffer, if any.
    #[must_use]
    pub const fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(c) => Some(*c),
            _ => None,
        }
    }

    /// Name of a fixed (non character, non ctrl) token.
    const fn fixed_name(&self) -> Option<&'static str> {
        Some(match self {
            Self::Enter => "enter",
            Self::Tab => "tab",
            Self::Backspace => "bck",
            Self::Delete => "del",
            Self::Escape => "esc",
            Self::Home => "home",
            Self::End => "end",
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
            Self::Insert => "ins",
            Self::PageUp => "pgup",
            Self::PageDown => "pgdn",
            Self::Alt => "alt",
            Self::Char(_) | Self::Ctrl(_) => return None,
        })
    }

    const FIXED: [Self; 15] = [
        Self::Enter,
        Self::Tab,
        Self::Backspace,
        Self::Delete,
        Self::Escape,
        Self::Home,
        Self::End,
        Self::Left,
        Self::Right,
        Self::Up,
        Self::Down,
        Self::Insert,
        Self::PageUp,
        Self::PageDown,
        Self::Alt,
    ];
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::Ctrl(c) => write!(f, "ctrl{}", c.to_ascii_uppercase()),
            other => match other.fixed_name() {
                Some(name) => f.write_str(name),
                None => Ok(()),
            },
        }
    }
}

/// A token name that does not correspond to any key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownToken(pub String);

impl fmt::Display for UnknownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown key token name {:?}", self.0)
    }
}

impl std::error::Error for UnknownToken {}

impl FromStr for Token {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(token) = Self::FIXED.iter().find(|t| t.fixed_name() == Some(s)) {
            return Ok(*token);
        }

        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => return Ok(Self::Char(c)),
            (None, _) => return Err(UnknownToken(s.to_owned())),
            _ => {}
        }

        if let Some(rest) = s.strip_prefix("ctrl") {
            let mut letters = rest.chars();
            if let (Some(c), None) = (letters.next(), letters.next())
                && c.is_ascii_alphabetic()
            {
                return Ok(Self::Ctrl(c.to_ascii_lowercase()));
            }
        }

        Err(UnknownToken(s.to_owned()))
    }
}

/// Which characters an input policy accepts into the buffer (`rest_a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenClass {
    /// Any character token.
    All,
    /// Alphanumeric characters.
    LettersNumbers,
    /// ASCII digits.
    Numbers,
    /// Alphabetic characters.
    Letters,
    /// Printable ASCII, space included.
    #[default]
    Common,
}

impl TokenClass {
    /// Whether `token` belongs to this class.
    ///
    /// Only [`Token::Char`] tokens ever match.
    #[must_use]
    pub fn matches(&self, token: &Token) -> bool {
        let Some(c) = token.as_char() else {
            return false;
        };
        match self {
            Self::All => !c.is_control(),
            Self::LettersNumbers => c.is_alphanumeric(),
            Self::Numbers => c.is_ascii_digit(),
            Self::Letters => c.is_alphabetic(),
            Self::Common => c == ' ' || c.is_ascii_graphic(),
        }
    }

    /// Configuration name of this class.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::LettersNumbers => "lettersnumbers",
            Self::Numbers => "numbers",
            Self::Letters => "letters",
            Self::Common => "common",
        }
    }
}

impl FromStr for TokenClass {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::All,
            Self::LettersNumbers,
            Self::Numbers,
            Self::Letters,
            Self::Common,
        ]
        .into_iter()
        .find(|class| class.name() == s)
        .ok_or_else(|| UnknownToken(s.to_owned()))
    }
}

/// Byte → token lookup table with an extended block at [`EXTENDED_BASE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTable {
    plain: [Option<Token>; BLOCK_LEN],
    extended: [Option<Token>; BLOCK_LEN],
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl KeyTable {
    /// A table with no entries; every byte is a decode miss.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            plain: [None; BLOCK_LEN],
            extended: [None; BLOCK_LEN],
        }
    }

    /// The table for a VT100-style console sending ASCII.
    ///
    /// Bytes 0x80 and above are left unmapped.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::empty();

        for byte in 0x01u8..=0x1A {
            let letter = char::from(byte + b'a' - 1);
            table.plain[usize::from(byte)] = Some(Token::Ctrl(letter));
        }
        // Consoles send either BS or DEL for the backspace key.
        table.plain[0x08] = Some(Token::Backspace);
        table.plain[0x7F] = Some(Token::Backspace);
        table.plain[0x09] = Some(Token::Tab);
        table.plain[0x0D] = Some(Token::Enter);
        table.plain[0x1B] = Some(Token::Escape);
        for byte in 0x20u8..=0x7E {
            table.plain[usize::from(byte)] = Some(Token::Char(char::from(byte)));
        }

        for (byte, token) in [
            (b'A', Token::Up),
            (b'B', Token::Down),
            (b'C', Token::Right),
            (b'D', Token::Left),
            (b'H', Token::Home),
            (b'F', Token::End),
            (b'1', Token::Home),
            (b'2', Token::Insert),
            (b'3', Token::Delete),
            (b'4', Token::End),
            (b'5', Token::PageUp),
            (b'6', Token::PageDown),
            (b'7', Token::Home),
            (b'8', Token::End),
        ] {
            table.extended[usize::from(byte)] = Some(token);
        }

        table
    }

    /// Look up a code: `0..=255` plain bytes, `EXTENDED_BASE..` extended keys.
    #[must_use]
    pub fn lookup(&self, code: u16) -> Option<Token> {
        let (block, idx) = self.slot(code)?;
        match block {
            Block::Plain => self.plain[idx],
            Block::Extended => self.extended[idx],
        }
    }

    /// Look up a byte received in ground state.
    #[must_use]
    pub fn lookup_byte(&self, byte: u8) -> Option<Token> {
        self.plain[usize::from(byte)]
    }

    /// Look up the byte that followed `ESC [`.
    #[must_use]
    pub fn lookup_extended(&self, byte: u8) -> Option<Token> {
        self.extended[usize::from(byte)]
    }

    /// Replace one entry. Returns `false` if `code` is outside both blocks.
    pub fn set(&mut self, code: u16, token: Option<Token>) -> bool {
        match self.slot(code) {
            Some((Block::Plain, idx)) => self.plain[idx] = token,
            Some((Block::Extended, idx)) => self.extended[idx] = token,
            None => return false,
        }
        true
    }

    /// Replace one entry (builder).
    #[must_use]
    pub fn with_entry(mut self, code: u16, token: Option<Token>) -> Self {
        self.set(code, token);
        self
    }

    fn slot(&self, code: u16) -> Option<(Block, usize)> {
        let code = usize::from(code);
        let base = usize::from(EXTENDED_BASE);
        if code < BLOCK_LEN {
            Some((Block::Plain, code))
        } else if (base..base + BLOCK_LEN).contains(&code) {
            Some((Block::Extended, code - base))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
enum Block {
    Plain,
    Extended,
}
