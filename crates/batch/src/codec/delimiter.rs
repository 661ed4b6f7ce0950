//! Delimiter line recognition.
//!
//! A delimiter line is `--` + boundary, an optional `--` marking the terminal delimiter,
//! optional spaces or tabs, then CRLF, LF or the end of input. The line terminator
//! preceding a delimiter line belongs to the delimiter, not to the content before it.

use crate::ensure;
use crate::error::BatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineMatch {
    /// the line is not a delimiter of this boundary
    Mismatch,
    /// the buffered bytes are a prefix of a delimiter line
    Incomplete,
    /// a delimiter line of `len` bytes including its terminator
    Delimiter { terminal: bool, len: usize },
}

/// Matches `line`, which starts at a line start, against the delimiter of `boundary`.
///
/// # Errors
///
/// Returns [`BatchError::BoundaryPaddingTooLong`] as soon as the whitespace after the
/// boundary exceeds `max_padding`.
pub(crate) fn match_delimiter_line(line: &[u8], boundary: &[u8], max_padding: usize, eof: bool) -> Result<LineMatch, BatchError> {
    let need_more = if eof { LineMatch::Mismatch } else { LineMatch::Incomplete };

    let mut pos = 0;
    for expected in b"--".iter().chain(boundary) {
        match line.get(pos) {
            None => return Ok(need_more),
            Some(b) if b == expected => pos += 1,
            Some(_) => return Ok(LineMatch::Mismatch),
        }
    }

    let terminal = match (line.get(pos), line.get(pos + 1)) {
        (Some(b'-'), Some(b'-')) => {
            pos += 2;
            true
        }
        (Some(b'-'), None) => return Ok(need_more),
        (Some(b'-'), Some(_)) => return Ok(LineMatch::Mismatch),
        _ => false,
    };

    let padding = line[pos..].iter().take_while(|b| matches!(b, b' ' | b'\t')).take(max_padding + 1).count();
    ensure!(padding <= max_padding, BatchError::boundary_padding_too_long(max_padding));
    pos += padding;

    let matched = match (line.get(pos), line.get(pos + 1)) {
        (Some(b'\n'), _) => LineMatch::Delimiter { terminal, len: pos + 1 },
        (Some(b'\r'), Some(b'\n')) => LineMatch::Delimiter { terminal, len: pos + 2 },
        (Some(b'\r'), None) if eof => LineMatch::Delimiter { terminal, len: pos + 1 },
        (Some(b'\r'), None) => LineMatch::Incomplete,
        (Some(_), _) => LineMatch::Mismatch,
        (None, _) if eof => LineMatch::Delimiter { terminal, len: pos },
        (None, _) => LineMatch::Incomplete,
    };
    Ok(matched)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// A delimiter line was found. Content ends at `content_end`, the delimiter line
    /// including its terminator ends at `consumed`. `parent` is set when the delimiter
    /// belongs to the enclosing batch rather than the innermost boundary.
    Delimiter { content_end: usize, consumed: usize, terminal: bool, parent: bool },
    /// No delimiter yet, the first `safe` bytes can not be part of one.
    Pending { safe: usize },
}

/// Scans `buf` for the next delimiter line of the innermost boundary in `boundaries`,
/// also watching for the enclosing boundary.
pub(crate) fn scan(buf: &[u8], at_line_start: bool, boundaries: &[String], max_padding: usize, eof: bool) -> Result<Scan, BatchError> {
    let Some((own, enclosing)) = boundaries.split_last() else {
        return Ok(Scan::Pending { safe: buf.len() });
    };
    let parent = enclosing.first();

    let mut start = if at_line_start { Some(0) } else { next_line_start(buf, 0) };
    while let Some(s) = start {
        let content_end = line_content_end(buf, s);
        let line = &buf[s..];

        match match_delimiter_line(line, own.as_bytes(), max_padding, eof)? {
            LineMatch::Delimiter { terminal, len } => {
                return Ok(Scan::Delimiter { content_end, consumed: s + len, terminal, parent: false });
            }
            LineMatch::Incomplete => return Ok(Scan::Pending { safe: content_end }),
            LineMatch::Mismatch => {}
        }

        if let Some(parent) = parent {
            match match_delimiter_line(line, parent.as_bytes(), max_padding, eof)? {
                LineMatch::Delimiter { terminal, len } => {
                    return Ok(Scan::Delimiter { content_end, consumed: s + len, terminal, parent: true });
                }
                LineMatch::Incomplete => return Ok(Scan::Pending { safe: content_end }),
                LineMatch::Mismatch => {}
            }
        }

        start = next_line_start(buf, s);
    }

    // a trailing CR may be the start of the terminator before a delimiter
    let safe = match buf.last() {
        Some(b'\r') if !eof => buf.len() - 1,
        _ => buf.len(),
    };
    Ok(Scan::Pending { safe })
}

fn next_line_start(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].iter().position(|b| *b == b'\n').map(|i| from + i + 1)
}

/// End of the content before the line starting at `line_start`.
fn line_content_end(buf: &[u8], line_start: usize) -> usize {
    match line_start {
        0 => 0,
        s if s >= 2 && buf[s - 2] == b'\r' => s - 2,
        s => s - 1,
    }
}
