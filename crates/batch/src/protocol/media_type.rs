//! Content-Type handling for batch payloads and their parts.

use mime::Mime;

use crate::error::BatchError;
use crate::protocol::boundary::{is_token, validate_boundary};
use crate::protocol::charset::validate_charset;

/// What a batch part carries, decided by its `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    /// `multipart/mixed` part opening a change set
    Changeset { boundary: String },
    /// `application/http` part carrying one operation
    Operation,
}

fn parse(content_type: &str) -> Result<Mime, BatchError> {
    content_type.trim().parse::<Mime>().map_err(|e| BatchError::invalid_content_type(content_type, e))
}

fn is_multipart_mixed(mime: &Mime) -> bool {
    mime.type_().as_str().eq_ignore_ascii_case("multipart") && mime.subtype().as_str().eq_ignore_ascii_case("mixed")
}

fn is_application_http(mime: &Mime) -> bool {
    mime.type_().as_str().eq_ignore_ascii_case("application") && mime.subtype().as_str().eq_ignore_ascii_case("http")
}

fn check_charset(mime: &Mime) -> Result<(), BatchError> {
    match mime.get_param(mime::CHARSET) {
        Some(charset) => validate_charset(charset.as_str()),
        None => Ok(()),
    }
}

fn boundary_param(content_type: &str, mime: &Mime, max_boundary_length: usize) -> Result<String, BatchError> {
    let boundary = mime
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().trim_matches('"').to_string())
        .ok_or_else(|| BatchError::invalid_content_type(content_type, "missing boundary parameter"))?;
    validate_boundary(&boundary, max_boundary_length)?;
    Ok(boundary)
}

/// Extracts the boundary from a `multipart/mixed` batch content type.
///
/// # Errors
///
/// Fails if the media type is not `multipart/mixed`, if the boundary parameter is
/// missing or invalid, or if the charset parameter is rejected.
pub fn parse_batch_content_type(content_type: &str, max_boundary_length: usize) -> Result<String, BatchError> {
    let mime = parse(content_type)?;
    if !is_multipart_mixed(&mime) {
        return Err(BatchError::invalid_content_type(content_type, "expected multipart/mixed"));
    }
    check_charset(&mime)?;
    boundary_param(content_type, &mime, max_boundary_length)
}

/// Classifies a batch part by its `Content-Type` header value.
pub(crate) fn classify_part(content_type: &str, max_boundary_length: usize) -> Result<PartKind, BatchError> {
    let mime = parse(content_type)?;
    check_charset(&mime)?;

    if is_application_http(&mime) {
        return Ok(PartKind::Operation);
    }

    if is_multipart_mixed(&mime) {
        let boundary = boundary_param(content_type, &mime, max_boundary_length)?;
        return Ok(PartKind::Changeset { boundary });
    }

    Err(BatchError::invalid_content_type(content_type, "expected application/http or multipart/mixed"))
}

/// Checks the charset of an operation's own `Content-Type` header.
///
/// The media type itself is opaque to the engine, only its charset is constrained.
pub fn validate_operation_content_type(content_type: &str) -> Result<(), BatchError> {
    check_charset(&parse(content_type)?)
}

/// Builds `multipart/mixed; boundary=<boundary>`, quoting the boundary when needed.
pub fn multipart_mixed(boundary: &str) -> String {
    if is_token(boundary) {
        format!("multipart/mixed; boundary={boundary}")
    } else {
        format!("multipart/mixed; boundary=\"{boundary}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchErrorKind;

    #[test]
    fn batch_content_type() {
        assert_eq!(parse_batch_content_type("multipart/mixed; boundary=batch_1", 70).unwrap(), "batch_1");
        assert_eq!(parse_batch_content_type("Multipart/Mixed;boundary=\"batch_1\"", 70).unwrap(), "batch_1");
        assert_eq!(parse_batch_content_type("multipart/mixed; charset=utf-8; boundary=b", 70).unwrap(), "b");

        let e = parse_batch_content_type("application/json", 70).unwrap_err();
        assert!(matches!(e, BatchError::InvalidContentType { .. }));

        let e = parse_batch_content_type("multipart/mixed", 70).unwrap_err();
        assert!(matches!(e, BatchError::InvalidContentType { .. }));

        let e = parse_batch_content_type("multipart/mixed; boundary=b; charset=utf-16", 70).unwrap_err();
        assert!(matches!(e, BatchError::MultiByteCharset { .. }));
        assert_eq!(e.kind(), BatchErrorKind::Format);
    }

    #[test]
    fn part_classification() {
        assert_eq!(classify_part("application/http", 70).unwrap(), PartKind::Operation);
        assert_eq!(
            classify_part("multipart/mixed; boundary=changeset_1", 70).unwrap(),
            PartKind::Changeset { boundary: "changeset_1".into() }
        );
        assert!(matches!(classify_part("text/plain", 70), Err(BatchError::InvalidContentType { .. })));
        assert!(matches!(classify_part("multipart/mixed; boundary=changeset_1", 5), Err(BatchError::InvalidBoundary { .. })));

        // rejected either by the media type parser or by the boundary check
        let e = classify_part("multipart/mixed; boundary=\"\"", 70).unwrap_err();
        assert_eq!(e.kind(), BatchErrorKind::Format);
    }

    #[test]
    fn operation_charset() {
        validate_operation_content_type("application/json;odata.metadata=minimal;charset=utf-8").unwrap();
        validate_operation_content_type("text/plain; charset=iso-8859-1").unwrap();
        assert!(matches!(validate_operation_content_type("text/plain; charset=shift_jis"), Err(BatchError::MultiByteCharset { .. })));
    }

    #[test]
    fn quotes_boundary_when_not_a_token() {
        assert_eq!(multipart_mixed("batch_1"), "multipart/mixed; boundary=batch_1");
        assert_eq!(multipart_mixed("a:b"), "multipart/mixed; boundary=\"a:b\"");
    }
}
