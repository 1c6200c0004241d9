#![forbid(unsafe_code)]

//! Readable key scripts.
//!
//! Plain characters stand for themselves. Named keys go in angle brackets:
//! `<enter>`, `<left>`, `<right>`, `<up>`, `<down>`, `<home>`, `<end>`,
//! `<del>`, `<bs>`, `<tab>`, `<esc>`, `<ctrl-a>` through `<ctrl-z>`, and
//! `<lt>` for a literal `<`.

use std::fmt;

/// A script that could not be turned into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// `<name>` is not a known key.
    UnknownKey(String),
    /// A `<` with no closing `>`.
    Unterminated(usize),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(name) => write!(f, "unknown key <{name}>"),
            Self::Unterminated(at) => write!(f, "unterminated key name at byte {at}"),
        }
    }
}

impl std::error::Error for ScriptError {}

fn named_key(name: &str) -> Option<Vec<u8>> {
    let bytes: &[u8] = match name {
        "enter" | "cr" => b"\r",
        "left" => b"\x1b[D",
        "right" => b"\x1b[C",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "del" => b"\x1b[3~",
        "bs" => b"\x7f",
        "tab" => b"\t",
        "esc" => b"\x1b",
        "lt" => b"<",
        _ => {
            let letter = name.strip_prefix("ctrl-")?;
            let &[c] = letter.as_bytes() else {
                return None;
            };
            if !c.is_ascii_lowercase() {
                return None;
            }
            return Some(vec![c - b'a' + 1]);
        }
    };
    Some(bytes.to_vec())
}

/// Convert a key script into raw input bytes.
pub fn parse_script(script: &str) -> Result<Vec<u8>, ScriptError> {
    let mut out = Vec::with_capacity(script.len());
    let mut rest = script;
    while let Some(open) = rest.find('<') {
        out.extend_from_slice(rest[..open].as_bytes());
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            return Err(ScriptError::Unterminated(script.len() - rest.len() + open));
        };
        let name = &after[..close];
        let key = named_key(name).ok_or_else(|| ScriptError::UnknownKey(name.to_owned()))?;
        out.extend(key);
        rest = &after[close + 1..];
    }
    out.extend_from_slice(rest.as_bytes());
    Ok(out)
}
