#![forbid(unsafe_code)]

//! Scripted line editing session against a virtual terminal.
//!
//! # Running
//!
//! ```sh
//! SERLINE_HARNESS_KEYS='hello<left><left>X<enter>' cargo run -p serline-harness
//! ```
//!
//! # Environment
//!
//! - `SERLINE_HARNESS_KEYS`: key script to type (see `serline_harness::script`)
//! - `SERLINE_HARNESS_PROMPT`: line prefix, default `"> "`
//! - `SERLINE_HARNESS_COLS` / `SERLINE_HARNESS_ROWS`: screen size, default 80x24
//! - `SERLINE_HARNESS_UNRESPONSIVE`: do not answer cursor position requests
//! - `SERLINE_HARNESS_TRIGGERS`: extra `name=code` exit triggers, comma separated
//! - `RUST_LOG`: log filter, written to stderr
//!
//! Query timeouts come from `SERLINE_QUERY_TIMEOUT_MS` and
//! `SERLINE_QUERY_ATTEMPTS` as in any serline program.

use std::io::{self, Write};

use serline_harness::{VirtualTerminal, parse_script};
use serline_runtime::{LineEditor, ProgramConfig, TriggerTable, TriggerValue};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_KEYS: &str = "hello world<home><del>H<end>!<enter>";

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let enabled = matches!(
        trimmed,
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" | "ON"
    );
    Some(enabled)
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .filter(|&v| v > 0)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parse `name=code,name=code` into trigger entries.
fn extra_triggers(list: &str) -> Vec<(String, TriggerValue)> {
    list.split(',')
        .filter_map(|entry| {
            let (name, code) = entry.split_once('=')?;
            match code.trim().parse::<i32>() {
                Ok(code) => Some((name.trim().to_owned(), TriggerValue::Code(code))),
                Err(_) => {
                    warn!(entry, "ignoring trigger with non-numeric code");
                    None
                }
            }
        })
        .collect()
}

fn invalid_input(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}

fn main() -> io::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();

    let cols = env_u16("SERLINE_HARNESS_COLS").unwrap_or(80);
    let rows = env_u16("SERLINE_HARNESS_ROWS").unwrap_or(24);
    let prompt = env_string("SERLINE_HARNESS_PROMPT").unwrap_or_else(|| "> ".to_owned());
    let keys = env_string("SERLINE_HARNESS_KEYS").unwrap_or_else(|| DEFAULT_KEYS.to_owned());

    let mut vt = VirtualTerminal::new(cols, rows);
    if env_flag("SERLINE_HARNESS_UNRESPONSIVE").unwrap_or(false) {
        vt = vt.unresponsive();
    }
    vt.type_bytes(&parse_script(&keys).map_err(invalid_input)?);

    let mut entries = vec![
        ("prefix".to_owned(), TriggerValue::from(prompt.as_str())),
        ("enter".to_owned(), TriggerValue::Code(0)),
        ("ctrlD".to_owned(), TriggerValue::Code(0)),
        ("ctrlC".to_owned(), TriggerValue::Code(1)),
        ("overflow".to_owned(), TriggerValue::Code(2)),
    ];
    if let Some(list) = env_string("SERLINE_HARNESS_TRIGGERS") {
        entries.extend(extra_triggers(&list));
    }
    let table = TriggerTable::from_entries(entries).map_err(invalid_input)?;

    let mut editor =
        LineEditor::with_config(vt, table, ProgramConfig::from_env()).map_err(invalid_input)?;
    let size = editor.query_geometry().map_err(io::Error::other)?;
    info!(?size, "geometry");

    let outcome = editor.run()?;
    let vt = editor.into_inner();

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "exit code: {}", outcome.exit_code)?;
    writeln!(stdout, "text: {:?}", outcome.text)?;
    writeln!(stdout, "keys left: {}", vt.pending_keys())?;
    writeln!(stdout, "cursor: {}", vt.cursor())?;
    writeln!(stdout, "{}", "-".repeat(usize::from(vt.width())))?;
    for y in 0..vt.height() {
        let row = vt.row_text(y);
        if !row.is_empty() {
            writeln!(stdout, "{row}")?;
        }
    }
    Ok(())
}
