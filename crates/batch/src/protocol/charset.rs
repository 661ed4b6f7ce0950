//! Charset policy of the batch framing.
//!
//! Delimiter lines and part headers are scanned byte-wise as ASCII, so every part must
//! use an ASCII-compatible encoding: utf-8 or a single-byte charset. Multi-byte charsets
//! other than utf-8 would hide or forge delimiter bytes and are rejected.

use crate::error::BatchError;

const UTF_8: &[&str] = &["utf-8", "utf8"];

const SINGLE_BYTE: &[&str] = &[
    "us-ascii",
    "ascii",
    "latin1",
    "koi8-r",
    "koi8-u",
    "ibm437",
    "ibm850",
    "ibm852",
    "ibm866",
    "macintosh",
    "cp437",
    "cp850",
    "cp866",
];

const SINGLE_BYTE_PREFIXES: &[&str] = &["iso-8859-", "windows-125", "cp125"];

const MULTI_BYTE_PREFIXES: &[&str] = &[
    "utf-16", "utf-32", "ucs-2", "ucs-4", "unicode", "shift_jis", "shift-jis", "sjis", "euc-", "gb2312", "gbk", "gb18030", "big5",
    "iso-2022-", "hz-gb-",
];

/// Validates a charset parameter of a batch, changeset or operation content type.
///
/// # Errors
///
/// - [`BatchError::MultiByteCharset`] for multi-byte charsets other than utf-8
/// - [`BatchError::UnsupportedCharset`] for charsets not known to be ASCII-compatible
pub fn validate_charset(charset: &str) -> Result<(), BatchError> {
    let normalized = charset.trim().trim_matches('"').to_ascii_lowercase();

    if UTF_8.contains(&normalized.as_str()) || SINGLE_BYTE.contains(&normalized.as_str()) {
        return Ok(());
    }

    if SINGLE_BYTE_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix)) {
        return Ok(());
    }

    if MULTI_BYTE_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix)) {
        return Err(BatchError::MultiByteCharset { charset: charset.to_string() });
    }

    Err(BatchError::UnsupportedCharset { charset: charset.to_string() })
}
