//! Fuzz target for the line rewriter.
//!
//! The rewriter must never panic, whatever bytes the dump contains and
//! whatever pair the operator configured, including pairs that fail to
//! compile in regex mode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sitesync::{ReplaceOptions, Replacer};

fuzz_target!(|input: (&str, &str, &[u8], bool)| {
    let (search, replace, line, only_serialized) = input;

    let opts = ReplaceOptions {
        regex: false,
        only_serialized,
    };
    let replacer = Replacer::new(search, replace, opts).expect("literal mode always compiles");
    let _ = replacer.apply_line(line);

    // Regex mode may reject the pattern; applying a compiled one must
    // not panic either.
    let opts = ReplaceOptions {
        regex: true,
        only_serialized,
    };
    if let Ok(replacer) = Replacer::new(search, replace, opts) {
        let _ = replacer.apply_line(line);
    }
});
