#![forbid(unsafe_code)]

//! Core: raw byte channels, key tokens, the key decoder, and interruption.

pub mod channel;
pub mod geometry;
pub mod interrupt;
pub mod key_decoder;
pub mod logging;
pub mod token;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, trace, warn};
