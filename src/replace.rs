// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Serialization-aware find/replace for SQL dumps.
//!
//! Several content management systems store values as byte-counted string
//! literals of the form `s:<N>:"<content>";` (or the escaped-quote variant
//! `s:<N>:\"<content>\";` emitted when the enclosing dump already escaped
//! quotes). `<N>` is the byte length of `<content>`, and consumers validate
//! it: a plain find/replace that changes the content length corrupts every
//! record containing the search string inside such a value.
//!
//! The rewriter runs two passes over each line:
//!
//! 1. A serialized pass that rewrites every `s:N:"...";` occurrence,
//!    recomputing `N` from **all** search hits inside the content: for a
//!    value with `k` hits the new count is `N + k * (bytes(replace) -
//!    bytes(search))`. Counts are byte counts, never code-point counts.
//! 2. Unless restricted to serialized values only, a plain substitution
//!    over the whole line. The serialized pass runs first so this pass
//!    cannot disturb the recomputed counts.
//!
//! Everything operates on raw bytes: dump lines may contain arbitrary
//! non-UTF-8 data and must survive the round trip bit-identically wherever
//! no substitution applies.

use crate::error::{Result, SyncError};
use regex::bytes::{Captures, Regex};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

/// Matches serialized strings: `s:N:"content";`.
/// Capture 1 = byte-length integer, capture 2 = content (no unescaped
/// double quote inside; a backslash escapes the following byte).
static SERIALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?-u)s:(\d+):"((?:[^"\\]|\\.)*?)";"#).unwrap());

/// Matches the escaped-quote variant: `s:N:\"content\";`.
static SERIALIZED_ESC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?-u)s:(\d+):\\"((?:[^"\\]|\\.)*?)\\";"#).unwrap());

/// Controls the behaviour of the rewriter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOptions {
    /// Treat the search string as a regular expression.
    pub regex: bool,
    /// Skip replacement in plain (non-serialized) text.
    pub only_serialized: bool,
}

#[derive(Debug)]
enum Pattern {
    Literal(Vec<u8>),
    Regex(Regex),
}

/// A compiled search/replace pair.
///
/// Construction validates the pattern once; [`apply_line`](Self::apply_line)
/// is then infallible and deterministic, the same input always yielding the
/// same bytes.
#[derive(Debug)]
pub struct Replacer {
    pattern: Pattern,
    replacement: Vec<u8>,
    only_serialized: bool,
}

impl Replacer {
    /// Compile a search/replace pair. In regex mode a malformed pattern
    /// fails here, before any input is touched.
    pub fn new(search: &str, replace: &str, opts: ReplaceOptions) -> Result<Self> {
        let pattern = if opts.regex {
            Pattern::Regex(Regex::new(search)?)
        } else {
            Pattern::Literal(search.as_bytes().to_vec())
        };
        Ok(Self {
            pattern,
            replacement: replace.as_bytes().to_vec(),
            only_serialized: opts.only_serialized,
        })
    }

    /// Apply the substitution to one line (without its newline).
    pub fn apply_line(&self, line: &[u8]) -> Vec<u8> {
        let fixed = self.fix_serialized(&SERIALIZED, line, false);
        let fixed = self.fix_serialized(&SERIALIZED_ESC, &fixed, true);

        if self.only_serialized {
            return fixed;
        }
        match &self.pattern {
            Pattern::Literal(search) => replace_literal(&fixed, search, &self.replacement),
            Pattern::Regex(re) => re.replace_all(&fixed, self.replacement.as_slice()).into_owned(),
        }
    }

    /// Rewrite every serialized string matched by `re`, adjusting the
    /// byte count. Unchanged content is emitted verbatim, and a count
    /// that does not parse as an integer leaves the whole match alone.
    fn fix_serialized(&self, re: &Regex, line: &[u8], escaped: bool) -> Vec<u8> {
        re.replace_all(line, |caps: &Captures| -> Vec<u8> {
            let whole = caps.get(0).expect("match").as_bytes();
            let Some(orig_n) = parse_count(&caps[1]) else {
                return whole.to_vec();
            };
            let inner = &caps[2];

            let (new_inner, new_n) = match &self.pattern {
                Pattern::Literal(search) => {
                    let hits = count_occurrences(inner, search);
                    if hits == 0 {
                        return whole.to_vec();
                    }
                    let new_inner = replace_literal(inner, search, &self.replacement);
                    if new_inner.as_slice() == inner {
                        return whole.to_vec();
                    }
                    let delta = self.replacement.len() as i64 - search.len() as i64;
                    (new_inner, orig_n + hits * delta)
                }
                Pattern::Regex(re) => {
                    let new_inner = re.replace_all(inner, self.replacement.as_slice()).into_owned();
                    if new_inner.as_slice() == inner {
                        return whole.to_vec();
                    }
                    let new_n = orig_n + new_inner.len() as i64 - inner.len() as i64;
                    (new_inner, new_n)
                }
            };

            let mut out = Vec::with_capacity(new_inner.len() + 16);
            if escaped {
                out.extend_from_slice(format!("s:{}:\\\"", new_n).as_bytes());
                out.extend_from_slice(&new_inner);
                out.extend_from_slice(b"\\\";");
            } else {
                out.extend_from_slice(format!("s:{}:\"", new_n).as_bytes());
                out.extend_from_slice(&new_inner);
                out.extend_from_slice(b"\";");
            }
            out
        })
        .into_owned()
    }

    /// Apply the substitution to every line read from `reader`, writing
    /// each result followed by a newline. Lines of arbitrary length are
    /// supported; real dump lines routinely exceed 4 MiB.
    pub fn apply_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> std::io::Result<()> {
        let mut reader = BufReader::with_capacity(64 * 1024, reader);
        let mut writer = BufWriter::new(writer);
        let mut line: Vec<u8> = Vec::with_capacity(4096);
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            writer.write_all(&self.apply_line(&line))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Apply the substitution to a file in place.
    ///
    /// Writes to a sibling temp file, carries over the original's
    /// permission bits, and renames atomically on success. On any error
    /// the temp file is removed and the original is untouched.
    pub fn apply_file(&self, path: &Path) -> Result<()> {
        let input = File::open(path).map_err(|e| SyncError::io("open", path, e))?;

        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".sitesync-replace-")
            .tempfile_in(dir)
            .map_err(|e| SyncError::io("create temp in", dir, e))?;

        self.apply_stream(input, tmp.as_file_mut())
            .map_err(|e| SyncError::io("replace in", path, e))?;

        if let Ok(meta) = std::fs::metadata(path) {
            let _ = std::fs::set_permissions(tmp.path(), meta.permissions());
        }

        tmp.persist(path)
            .map_err(|e| SyncError::io("rename temp over", path, e.error))?;
        Ok(())
    }
}

/// One-shot in-place file rewrite, as used by the `replace` subcommand
/// and by phase 2 for each configured pair.
pub fn replace_file(search: &str, replace: &str, path: &Path, opts: ReplaceOptions) -> Result<()> {
    Replacer::new(search, replace, opts)?.apply_file(path)
}

fn parse_count(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Non-overlapping occurrence count. An empty needle never matches: an
/// empty search string makes the whole pair a no-op.
fn count_occurrences(hay: &[u8], needle: &[u8]) -> i64 {
    if needle.is_empty() || needle.len() > hay.len() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= hay.len() {
        if &hay[i..i + needle.len()] == needle {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

fn replace_literal(hay: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || needle.len() > hay.len() {
        return hay.to_vec();
    }
    let mut out = Vec::with_capacity(hay.len());
    let mut i = 0;
    while i < hay.len() {
        if i + needle.len() <= hay.len() && &hay[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(hay[i]);
            i += 1;
        }
    }
    out
}
