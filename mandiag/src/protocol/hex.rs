//! Hex token helpers shared by the frame codec, the validator and the CAN
//! variant.
//!
//! The diagnostic protocol carries bytes as two-digit uppercase hex tokens
//! separated by single spaces. Humans (and test scripts) write them in many
//! other ways, so [`tokenize_hex`] accepts:
//!
//! - `"6D643E 00 01 01 01 00"` (compact multi-byte chunks)
//! - `"6D 64 3E 00 01"`
//! - `"0x6D,0x64;0x3E-00:01"`

use std::fmt::Write as _;

use crate::error::{Error, Result};

/// Wildcard byte token: matches any actual byte.
pub const WILDCARD: &str = "XX";

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-')
}

/// Split mixed hex notation into uppercase two-digit byte tokens.
///
/// With `allow_wildcard`, `XX` is accepted as a byte.
pub fn tokenize_hex(input: &str, allow_wildcard: bool) -> Result<Vec<String>> {
    let upper = input.to_ascii_uppercase();
    let mut tokens = Vec::new();

    for chunk in upper.split(is_separator).filter(|c| !c.is_empty()) {
        let chunk = chunk.strip_prefix("0X").unwrap_or(chunk);
        if chunk.is_empty() {
            continue;
        }

        let valid_chars = chunk
            .chars()
            .all(|c| c.is_ascii_hexdigit() || (allow_wildcard && c == 'X'));
        if !valid_chars {
            return Err(Error::InvalidHex(format!("invalid token '{chunk}'")));
        }
        if chunk.len() % 2 != 0 {
            return Err(Error::InvalidHex(format!("odd-length token '{chunk}'")));
        }

        for i in (0..chunk.len()).step_by(2) {
            let pair = &chunk[i..i + 2];
            if pair.contains('X') && pair != WILDCARD {
                return Err(Error::InvalidHex(format!("invalid byte '{pair}'")));
            }
            tokens.push(pair.to_string());
        }
    }

    Ok(tokens)
}

/// Join byte tokens with single spaces, uppercased.
pub fn normalize_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| t.as_ref().trim().to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert byte tokens to raw bytes.
pub fn tokens_to_bytes<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<u8>> {
    tokens
        .iter()
        .map(|t| {
            let t = t.as_ref();
            u8::from_str_radix(t, 16).map_err(|_| Error::InvalidHex(format!("invalid byte '{t}'")))
        })
        .collect()
}

/// Format bytes as space-separated uppercase hex tokens.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Compare one actual token against an expected token; `XX` matches anything.
pub fn token_matches(actual: &str, expected: &str) -> bool {
    let expected = expected.trim();
    expected.eq_ignore_ascii_case(WILDCARD) || actual.trim().eq_ignore_ascii_case(expected)
}

/// Compare token sequences with wildcard support.
///
/// Returns `Err(detail)` describing the first mismatch. When
/// `require_same_length` is false, `actual` may carry extra trailing tokens.
pub fn bytes_match_with_wildcards<A: AsRef<str>, E: AsRef<str>>(
    actual: &[A],
    expected: &[E],
    require_same_length: bool,
) -> std::result::Result<(), String> {
    if require_same_length && actual.len() != expected.len() {
        return Err(format!(
            "Length mismatch. Expected {} bytes, got {}",
            expected.len(),
            actual.len()
        ));
    }

    if expected.len() > actual.len() {
        return Err(format!(
            "Insufficient bytes. Expected at least {}, got {}",
            expected.len(),
            actual.len()
        ));
    }

    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if !token_matches(a.as_ref(), e.as_ref()) {
            return Err(format!(
                "Byte {i} mismatch. Expected {}, got {}",
                e.as_ref(),
                a.as_ref()
            ));
        }
    }

    Ok(())
}

/// Decode hex data bytes as ASCII text after skipping `skip` leading bytes.
///
/// Returns `None` when the data is too short or not valid ASCII hex.
pub fn decode_ascii_from(data_bytes: &str, skip: usize) -> Option<String> {
    let tokens = tokenize_hex(data_bytes, false).ok()?;
    if tokens.len() < skip {
        return None;
    }
    let bytes = tokens_to_bytes(&tokens[skip..]).ok()?;
    if !bytes.is_ascii() {
        return None;
    }
    String::from_utf8(bytes).ok()
}
