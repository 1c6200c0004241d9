#![forbid(unsafe_code)]

//! Simulated terminals and key scripts for driving serline without hardware.
//!
//! - [`VirtualTerminal`] sits on the far end of a [`RawChannel`]: it renders
//!   what the editor writes and answers cursor position requests.
//! - [`parse_script`] turns a readable key script such as `"ab<left>c<enter>"`
//!   into the raw bytes a terminal would send.
//!
//! ```
//! use serline_harness::{VirtualTerminal, parse_script};
//! use serline_runtime::{LineEditor, TriggerTable};
//!
//! let mut vt = VirtualTerminal::new(40, 5);
//! vt.type_bytes(&parse_script("ab<left>c<enter>").unwrap());
//! let mut editor = LineEditor::new(vt, TriggerTable::line_input("> ")).unwrap();
//! let outcome = editor.run().unwrap();
//! assert_eq!(outcome.text, "acb");
//! assert_eq!(editor.channel().row_text(0), "> acb");
//! ```
//!
//! [`RawChannel`]: serline_core::channel::RawChannel

pub mod script;
pub mod virtual_terminal;

pub use script::{ScriptError, parse_script};
pub use virtual_terminal::VirtualTerminal;
