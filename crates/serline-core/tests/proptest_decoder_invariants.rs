//! Property-based invariant tests for the key decoder.
//!
//! 1. Every byte fed is classified exactly once (key, framing, or miss).
//! 2. Splitting input at any point yields the same tokens as one chunk.
//! 3. Printable ASCII decodes one-to-one into character tokens.
//! 4. No panics on arbitrary input.

use proptest::prelude::*;
use serline_core::key_decoder::{DecodeStep, KeyDecoder};
use serline_core::token::Token;

// ── Helpers ─────────────────────────────────────────────────────────────

/// Bytes biased towards escape sequence structure.
fn key_bytes() -> impl Strategy<Value = Vec<u8>> {
    let byte = prop_oneof![
        3 => 0x20u8..=0x7E,
        2 => Just(0x1Bu8),
        2 => Just(b'['),
        1 => Just(b'~'),
        1 => prop::sample::select(vec![b'A', b'B', b'C', b'D', b'3', b'H', b'F']),
        1 => any::<u8>(),
    ];
    prop::collection::vec(byte, 0..64)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Byte accounting
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn every_byte_is_accounted_for(input in key_bytes()) {
        let mut decoder = KeyDecoder::new();
        let _ = decoder.decode(&input);
        let stats = decoder.stats();
        prop_assert_eq!(
            stats.keys + stats.framing + stats.misses,
            input.len(),
            "stats {:?} for {:?}",
            stats,
            input
        );
    }

    #[test]
    fn accounting_holds_across_chunks(chunks in prop::collection::vec(key_bytes(), 0..6)) {
        let mut decoder = KeyDecoder::new();
        let mut fed = 0;
        for chunk in &chunks {
            let _ = decoder.decode(chunk);
            fed += chunk.len();
        }
        prop_assert_eq!(decoder.stats().total(), fed);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Chunking independence
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn split_point_does_not_change_tokens(input in key_bytes(), split in any::<prop::sample::Index>()) {
        let at = if input.is_empty() { 0 } else { split.index(input.len() + 1) };

        let mut whole = KeyDecoder::new();
        let expected = whole.decode(&input);

        let mut parts = KeyDecoder::new();
        let mut got = parts.decode(&input[..at]);
        got.extend(parts.decode(&input[at..]));

        prop_assert_eq!(got, expected);
        prop_assert_eq!(parts.step(), whole.step());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Printable ASCII
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn printable_ascii_maps_to_chars(text in "[ -~]{0,40}") {
        let mut decoder = KeyDecoder::new();
        let tokens = decoder.decode(text.as_bytes());
        let expected: Vec<Token> = text.chars().map(Token::Char).collect();
        prop_assert_eq!(tokens, expected);
        prop_assert_eq!(decoder.step(), DecodeStep::Idle);
        prop_assert_eq!(decoder.stats().keys, text.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. No panics
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(input in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut decoder = KeyDecoder::new();
        let tokens = decoder.decode(&input);
        // Each key byte yields one token, plus one Alt per Alt-prefixed key.
        prop_assert!(tokens.len() <= 2 * decoder.stats().keys);
    }
}
