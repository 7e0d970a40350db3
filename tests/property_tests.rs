//! Property-based tests using proptest.
//!
//! These tests verify invariants of the rewriter that should hold for
//! all inputs, helping catch edge cases that unit tests might miss.

use proptest::prelude::*;
use regex::Regex;
use sitesync::{ReplaceOptions, Replacer};
use std::sync::LazyLock;

static SERIALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"s:(\d+):"((?:[^"\\]|\\.)*?)";"#).unwrap());

fn apply(search: &str, replace: &str, line: &str) -> String {
    let replacer = Replacer::new(search, replace, ReplaceOptions::default()).unwrap();
    String::from_utf8(replacer.apply_line(line.as_bytes())).unwrap()
}

// =============================================================================
// Byte-Count Consistency
// =============================================================================

proptest! {
    /// After a rewrite, every serialized substring still satisfies
    /// N = bytes(content). Content and replacement draw from an alphabet
    /// with multi-byte characters so byte counts and character counts
    /// diverge.
    #[test]
    fn serialized_count_matches_content_bytes(
        content in "[a-zéàü0-9:/. -]{0,40}",
        search in "[a-g]{1,8}",
        replace in "[h-rü/.]{0,12}",
    ) {
        // Search and replacement draw from disjoint alphabets so the
        // replacement can never reintroduce the search string; a
        // self-referential pair would feed the plain-text pass new
        // matches inside already-counted values.
        let line = format!("s:{}:\"{}\"; trailing {}", content.len(), content, content);
        let out = apply(&search, &replace, &line);

        for caps in SERIALIZED.captures_iter(&out) {
            let n: usize = caps[1].parse().unwrap();
            prop_assert_eq!(n, caps[2].len(), "in output {}", out);
        }
    }

    /// Rewriting with search == replace yields the input unchanged.
    #[test]
    fn identity_pair_is_identity(
        line in ".{0,120}",
        search in ".{1,16}",
    ) {
        let out = apply(&search, &search, &line);
        prop_assert_eq!(out, line);
    }

    /// For a value with k occurrences of the search string, the new byte
    /// count is exactly N + k * (bytes(replace) - bytes(search)).
    #[test]
    fn multi_occurrence_delta(
        search in "[a-z]{2,6}",
        replace in "[A-Z0-9]{0,10}",
        k in 1usize..6,
    ) {
        // "-" never appears in the search alphabet, so occurrences
        // cannot straddle the separators.
        let content = vec![search.clone(); k].join("-");
        let n = content.len();
        let line = format!("s:{n}:\"{content}\";");

        let out = apply(&search, &replace, &line);

        let caps = SERIALIZED.captures(&out).expect("serialized substring survives");
        let new_n: i64 = caps[1].parse().unwrap();
        let delta = replace.len() as i64 - search.len() as i64;
        prop_assert_eq!(new_n, n as i64 + k as i64 * delta);
    }

    /// Multi-byte characters count as their UTF-8 byte length, not one.
    #[test]
    fn byte_not_rune_lengths(content in "[éàüß€]{1,10}") {
        let line = format!("s:{}:\"{}\";", content.len(), content);
        let out = apply(&content, "abc", &line);
        let caps = SERIALIZED.captures(&out).unwrap();
        let n: usize = caps[1].parse().unwrap();
        prop_assert_eq!(n, 3);
        prop_assert!(content.chars().count() < content.len());
    }
}

// =============================================================================
// Robustness
// =============================================================================

proptest! {
    /// The literal rewriter never panics, whatever the input bytes.
    #[test]
    fn no_panic_on_arbitrary_bytes(
        search in any::<String>(),
        replace in any::<String>(),
        line in prop::collection::vec(any::<u8>(), 0..200),
    ) {
        let replacer = Replacer::new(&search, &replace, ReplaceOptions::default()).unwrap();
        let _ = replacer.apply_line(&line);
    }

    /// Regex mode either fails to compile or applies without panicking.
    #[test]
    fn no_panic_in_regex_mode(
        search in any::<String>(),
        replace in "[a-z ]{0,10}",
        line in prop::collection::vec(any::<u8>(), 0..200),
    ) {
        let opts = ReplaceOptions { regex: true, ..Default::default() };
        if let Ok(replacer) = Replacer::new(&search, &replace, opts) {
            let _ = replacer.apply_line(&line);
        }
    }

    /// Streaming output always equals the line-by-line result plus
    /// newlines, regardless of how the input was chunked.
    #[test]
    fn stream_equals_per_line_rewrite(
        lines in prop::collection::vec("[a-z :\"/.]{0,40}", 0..8),
        search in "[a-z]{1,6}",
        replace in "[a-z]{0,6}",
    ) {
        let input = lines.join("\n");
        let replacer = Replacer::new(&search, &replace, ReplaceOptions::default()).unwrap();

        let mut streamed = Vec::new();
        replacer.apply_stream(input.as_bytes(), &mut streamed).unwrap();

        let mut expected = Vec::new();
        if !input.is_empty() {
            let mut pieces: Vec<&str> = input.split('\n').collect();
            if input.ends_with('\n') {
                pieces.pop();
            }
            for line in pieces {
                expected.extend_from_slice(&replacer.apply_line(line.as_bytes()));
                expected.push(b'\n');
            }
        }
        prop_assert_eq!(streamed, expected);
    }
}
