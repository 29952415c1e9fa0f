//! Trigram extraction and the text-file heuristic.
//!
//! A trigram is three consecutive bytes of file content packed into the low
//! 24 bits of a `u32`. Indexing works over the *set* of trigrams a file
//! contains, so extraction dedupes as it goes.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read};

/// Three consecutive content bytes, packed `(b0 << 16) | (b1 << 8) | b2`.
pub type Trigram = u32;

/// Unpack a trigram into its three bytes.
pub fn trigram_bytes(t: Trigram) -> [u8; 3] {
    [(t >> 16) as u8, (t >> 8) as u8, t as u8]
}

/// Pack three bytes into a trigram.
pub fn pack(b: [u8; 3]) -> Trigram {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

/// Tunables for deciding whether a file is indexable text.
#[derive(Debug, Clone, Copy)]
pub struct TextOptions {
    /// Skip files containing a line longer than this many bytes.
    pub max_line_len: usize,
    /// Skip files with more than this many distinct trigrams.
    pub max_trigrams: usize,
    /// Skip files whose invalid-byte fraction exceeds this ratio.
    pub max_invalid_utf8_ratio: f64,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            max_line_len: 2000,
            max_trigrams: 30000,
            max_invalid_utf8_ratio: 0.1,
        }
    }
}

/// Why a file was rejected by the text heuristic.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    LineTooLong { limit: usize },
    TooManyTrigrams { limit: usize },
    InvalidUtf8 { ratio: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LineTooLong { limit } => {
                write!(f, "line longer than {} bytes", limit)
            }
            SkipReason::TooManyTrigrams { limit } => {
                write!(f, "more than {} distinct trigrams", limit)
            }
            SkipReason::InvalidUtf8 { ratio } => {
                write!(f, "invalid UTF-8 fraction {:.3} over limit", ratio)
            }
        }
    }
}

/// Outcome of scanning a byte stream.
#[derive(Debug)]
pub enum Scan {
    /// The content passed the heuristic; distinct trigrams, sorted ascending.
    Text(Vec<Trigram>),
    /// The content failed the heuristic.
    Skip(SkipReason),
}

/// Scan a byte stream in one bounded-memory pass: collect the distinct
/// trigram set while enforcing the text heuristic. Lines are byte runs
/// terminated by `\n`. A byte counts as invalid if it is not valid UTF-8 or
/// is a control byte other than `\n`, `\r`, `\t` (NUL-ridden binaries fail
/// the ratio test this way).
pub fn scan<R: Read>(mut r: R, opts: &TextOptions) -> io::Result<Scan> {
    let mut seen: HashSet<Trigram> = HashSet::new();
    let mut window: u32 = 0;
    let mut filled = 0usize;
    let mut line_len = 0usize;
    let mut invalid = 0u64;
    let mut total = 0u64;
    let mut carry: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        total += n as u64;

        for &c in chunk {
            window = ((window << 8) | c as u32) & 0xFF_FFFF;
            filled += 1;
            if filled >= 3 {
                seen.insert(window);
                if seen.len() > opts.max_trigrams {
                    return Ok(Scan::Skip(SkipReason::TooManyTrigrams {
                        limit: opts.max_trigrams,
                    }));
                }
            }
            if c == b'\n' {
                line_len = 0;
            } else {
                line_len += 1;
                if line_len > opts.max_line_len {
                    return Ok(Scan::Skip(SkipReason::LineTooLong {
                        limit: opts.max_line_len,
                    }));
                }
                if c < 0x20 && c != b'\r' && c != b'\t' {
                    invalid += 1;
                }
            }
        }

        invalid += validate_utf8(chunk, &mut carry);
    }
    // An incomplete sequence at EOF is invalid in full.
    invalid += carry.len() as u64;

    let ratio = if total == 0 {
        0.0
    } else {
        invalid as f64 / total as f64
    };
    if ratio > opts.max_invalid_utf8_ratio {
        return Ok(Scan::Skip(SkipReason::InvalidUtf8 { ratio }));
    }

    let mut out: Vec<Trigram> = seen.into_iter().collect();
    out.sort_unstable();
    Ok(Scan::Text(out))
}

/// Count invalid UTF-8 bytes in `chunk`, carrying an incomplete trailing
/// sequence across calls in `carry`.
fn validate_utf8(chunk: &[u8], carry: &mut Vec<u8>) -> u64 {
    let mut invalid = 0u64;

    // Feed bytes into the carried prefix until it resolves.
    let mut idx = 0;
    while !carry.is_empty() && idx < chunk.len() {
        carry.push(chunk[idx]);
        idx += 1;
        drain_carry(carry, &mut invalid);
    }

    let mut rest = &chunk[idx..];
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => break,
            Err(e) => {
                let valid = e.valid_up_to();
                match e.error_len() {
                    Some(len) => {
                        invalid += len as u64;
                        rest = &rest[valid + len..];
                    }
                    None => {
                        // Incomplete sequence at the chunk boundary.
                        carry.extend_from_slice(&rest[valid..]);
                        break;
                    }
                }
            }
        }
    }
    invalid
}

fn drain_carry(carry: &mut Vec<u8>, invalid: &mut u64) {
    loop {
        if carry.is_empty() {
            return;
        }
        match std::str::from_utf8(carry) {
            Ok(_) => {
                carry.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Some(len) = e.error_len() {
                    *invalid += len as u64;
                    carry.drain(..valid + len);
                } else {
                    if valid > 0 {
                        carry.drain(..valid);
                    }
                    return;
                }
            }
        }
    }
}

/// Distinct trigrams of an in-memory buffer, sorted ascending.
pub fn trigrams_of(content: &[u8]) -> Vec<Trigram> {
    let mut seen: HashSet<Trigram> = HashSet::new();
    let mut window: u32 = 0;
    for (i, &c) in content.iter().enumerate() {
        window = ((window << 8) | c as u32) & 0xFF_FFFF;
        if i >= 2 {
            seen.insert(window);
        }
    }
    let mut out: Vec<Trigram> = seen.into_iter().collect();
    out.sort_unstable();
    out
}

/// Whether `content` would be accepted by the indexer's text heuristic.
pub fn is_text(content: &[u8], opts: &TextOptions) -> bool {
    matches!(scan(content, opts), Ok(Scan::Text(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tris(s: &str) -> Vec<Trigram> {
        trigrams_of(s.as_bytes())
    }

    #[test]
    fn window_extraction() {
        let v = tris("hello");
        assert_eq!(v.len(), 3);
        assert!(v.contains(&pack(*b"hel")));
        assert!(v.contains(&pack(*b"ell")));
        assert!(v.contains(&pack(*b"llo")));
    }

    #[test]
    fn short_content_has_no_trigrams() {
        assert!(tris("").is_empty());
        assert!(tris("ab").is_empty());
        assert_eq!(tris("abc"), vec![pack(*b"abc")]);
    }

    #[test]
    fn extraction_dedupes() {
        assert_eq!(tris("aaaa"), vec![pack(*b"aaa")]);
    }

    #[test]
    fn output_is_sorted() {
        let v = tris("the quick brown fox");
        let mut sorted = v.clone();
        sorted.sort_unstable();
        assert_eq!(v, sorted);
    }

    #[test]
    fn pack_roundtrip() {
        let t = pack(*b"foo");
        assert_eq!(trigram_bytes(t), *b"foo");
    }

    #[test]
    fn accepts_plain_text() {
        let opts = TextOptions::default();
        assert!(is_text(b"hello world\nsecond line\n", &opts));
    }

    #[test]
    fn rejects_nul_heavy_content() {
        let opts = TextOptions::default();
        assert!(!is_text(b"\x00\x01\x02 garbage", &opts));
    }

    #[test]
    fn rejects_long_lines() {
        let opts = TextOptions {
            max_line_len: 10,
            ..Default::default()
        };
        assert!(is_text(b"short\nlines\n", &opts));
        assert!(!is_text(b"this line is much too long\n", &opts));
    }

    #[test]
    fn rejects_too_many_trigrams() {
        let opts = TextOptions {
            max_trigrams: 4,
            ..Default::default()
        };
        assert!(!is_text(b"abcdefghijklmnop\n", &opts));
    }

    #[test]
    fn multibyte_utf8_is_valid() {
        let opts = TextOptions::default();
        assert!(is_text("日本語のテキスト\n".as_bytes(), &opts));
    }

    #[test]
    fn utf8_validation_across_chunks() {
        // A multi-byte char split across the 64 KiB read boundary must not
        // count as invalid.
        let mut content = vec![b'a'; 64 * 1024 - 1];
        content.extend_from_slice("é".as_bytes());
        content.push(b'\n');
        let opts = TextOptions {
            max_line_len: 128 * 1024,
            max_trigrams: usize::MAX,
            max_invalid_utf8_ratio: 0.0,
        };
        match scan(&content[..], &opts).unwrap() {
            Scan::Text(_) => {}
            Scan::Skip(r) => panic!("unexpected skip: {}", r),
        }
    }

    #[test]
    fn truncated_utf8_at_eof_is_invalid() {
        let opts = TextOptions {
            max_invalid_utf8_ratio: 0.0,
            ..Default::default()
        };
        // 0xC3 starts a two-byte sequence that never completes.
        assert!(!is_text(b"abc\xC3", &opts));
    }
}
