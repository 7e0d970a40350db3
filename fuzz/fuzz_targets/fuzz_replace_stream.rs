//! Fuzz target for the streaming rewriter.
//!
//! Feeds arbitrary bytes (embedded newlines and all) through
//! `apply_stream` and checks it neither panics nor errors on in-memory
//! readers/writers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sitesync::{ReplaceOptions, Replacer};

fuzz_target!(|input: (&str, &str, &[u8])| {
    let (search, replace, data) = input;

    let replacer =
        Replacer::new(search, replace, ReplaceOptions::default()).expect("literal mode compiles");
    let mut out = Vec::new();
    replacer
        .apply_stream(data, &mut out)
        .expect("in-memory streams cannot fail");
});
