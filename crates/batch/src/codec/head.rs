//! Header section decoding for batch parts.
//!
//! Two kinds of header sections appear in a batch:
//!
//! 1. the MIME headers of a part, ended by a blank line
//! 2. the head of the embedded HTTP message: a request line or status line, its headers
//!    and a blank line
//!
//! Both are parsed with `httparse` and copied into a [`HeaderCollection`], which rejects
//! duplicate names.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header section size: 8KB

use bytes::{Buf, BytesMut};
use http::{Method, StatusCode};
use httparse::{Error, Status};
use tracing::trace;

use crate::ensure;
use crate::error::BatchError;
use crate::protocol::{BatchKind, HeaderCollection, StartLine};

/// Maximum number of headers allowed in one header section
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for one header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes the MIME headers of a part.
///
/// Returns `Ok(None)` if more data is needed. On success the header section including
/// its blank line is consumed from `src`.
pub(crate) fn decode_part_headers(src: &mut BytesMut) -> Result<Option<HeaderCollection>, BatchError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];

    let status = httparse::parse_headers(&src[..], &mut headers).map_err(|e| match e {
        Error::TooManyHeaders => BatchError::too_many_headers(MAX_HEADER_NUM),
        e => BatchError::invalid_header(e),
    })?;

    match status {
        Status::Complete((offset, parsed)) => {
            ensure!(offset <= MAX_HEADER_BYTES, BatchError::too_large_header(offset, MAX_HEADER_BYTES));
            let collection = collect(parsed)?;
            trace!(size = offset, headers = collection.len(), "parsed part headers");
            src.advance(offset);
            Ok(Some(collection))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, BatchError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

/// Decodes the head of the HTTP message embedded in an operation part.
///
/// Request batches carry `METHOD target HTTP/1.1`, response batches carry
/// `HTTP/1.1 code reason`. Any other HTTP version is rejected.
pub(crate) fn decode_operation_head(src: &mut BytesMut, kind: BatchKind) -> Result<Option<(StartLine, HeaderCollection)>, BatchError> {
    match kind {
        BatchKind::Request => decode_request_head(src),
        BatchKind::Response => decode_response_head(src),
    }
}

fn decode_request_head(src: &mut BytesMut) -> Result<Option<(StartLine, HeaderCollection)>, BatchError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let status = req.parse(&src[..]).map_err(|e| match e {
        Error::TooManyHeaders => BatchError::too_many_headers(MAX_HEADER_NUM),
        e @ (Error::HeaderName | Error::HeaderValue) => BatchError::invalid_header(e),
        e => BatchError::invalid_request_line(e),
    })?;

    match status {
        Status::Complete(offset) => {
            ensure!(offset <= MAX_HEADER_BYTES, BatchError::too_large_header(offset, MAX_HEADER_BYTES));
            ensure!(req.version == Some(1), BatchError::invalid_request_line(format!("unsupported http version {:?}", req.version)));

            let method = req.method.ok_or_else(|| BatchError::invalid_request_line("missing method"))?;
            let method = Method::from_bytes(method.as_bytes()).map_err(BatchError::invalid_request_line)?;
            let target = req.path.ok_or_else(|| BatchError::invalid_request_line("missing request target"))?;

            let line = StartLine::request(method, target);
            let collection = collect(req.headers)?;
            trace!(?line, size = offset, "parsed operation request head");

            src.advance(offset);
            Ok(Some((line, collection)))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, BatchError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

fn decode_response_head(src: &mut BytesMut) -> Result<Option<(StartLine, HeaderCollection)>, BatchError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut resp = httparse::Response::new(&mut headers);

    let status = resp.parse(&src[..]).map_err(|e| match e {
        Error::TooManyHeaders => BatchError::too_many_headers(MAX_HEADER_NUM),
        e @ (Error::HeaderName | Error::HeaderValue) => BatchError::invalid_header(e),
        e => BatchError::invalid_response_line(e),
    })?;

    match status {
        Status::Complete(offset) => {
            ensure!(offset <= MAX_HEADER_BYTES, BatchError::too_large_header(offset, MAX_HEADER_BYTES));
            ensure!(resp.version == Some(1), BatchError::invalid_response_line(format!("unsupported http version {:?}", resp.version)));

            let code = resp.code.ok_or_else(|| BatchError::invalid_response_line("missing status code"))?;
            let status = StatusCode::from_u16(code).map_err(BatchError::invalid_response_line)?;
            let reason = resp.reason.unwrap_or_default().to_string();

            let line = StartLine::Response { status, reason };
            let collection = collect(resp.headers)?;
            trace!(?line, size = offset, "parsed operation response head");

            src.advance(offset);
            Ok(Some((line, collection)))
        }
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, BatchError::too_large_header(src.len(), MAX_HEADER_BYTES));
            Ok(None)
        }
    }
}

fn collect(parsed: &[httparse::Header<'_>]) -> Result<HeaderCollection, BatchError> {
    let mut collection = HeaderCollection::new();
    for header in parsed {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| BatchError::invalid_header(format!("value of `{}` is not valid utf-8", header.name)))?;
        collection.insert(header.name, value.trim())?;
    }
    Ok(collection)
}

/// Reads the `Content-Length` of an operation, if any.
pub(crate) fn parse_content_length(headers: &HeaderCollection) -> Result<Option<u64>, BatchError> {
    let Some(value) = headers.try_get(crate::protocol::header::CONTENT_LENGTH) else {
        return Ok(None);
    };

    let length = value.trim().parse::<u64>().map_err(|_| BatchError::invalid_content_length(format!("value {value} is not u64")))?;
    Ok(Some(length))
}
