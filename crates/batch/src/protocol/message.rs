use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};

use crate::ensure;
use crate::error::BatchError;
use crate::protocol::header::{CONTENT_ID, CONTENT_TYPE, HeaderCollection};
use crate::protocol::media_type::validate_operation_content_type;
use crate::protocol::BatchKind;

/// First line of an operation: a request line or a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD target HTTP/1.1`, the target kept as written
    Request { method: Method, target: String },
    /// `HTTP/1.1 code reason`
    Response { status: StatusCode, reason: String },
}

impl StartLine {
    pub fn request(method: Method, target: impl Into<String>) -> Self {
        Self::Request { method, target: target.into() }
    }

    /// Builds a status line using the canonical reason phrase of `status`.
    pub fn response(status: StatusCode) -> Self {
        Self::Response { status, reason: status.canonical_reason().unwrap_or_default().to_string() }
    }

    pub fn kind(&self) -> BatchKind {
        match self {
            StartLine::Request { .. } => BatchKind::Request,
            StartLine::Response { .. } => BatchKind::Response,
        }
    }
}

/// Represents an item in an operation's content stream.
///
/// Produced by the multipart decoder: content bytes up to the next delimiter line in
/// one or more chunks, followed by a single EOF marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of content
    Chunk(Bytes),
    /// Marks the end of the content
    Eof,
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

/// A decoded operation part: the MIME headers of the part, the start line and the
/// headers of the embedded HTTP message. The content follows as [`PayloadItem`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPart {
    pub part_headers: HeaderCollection,
    pub line: StartLine,
    pub headers: HeaderCollection,
}

impl OperationPart {
    /// Content-ID of the operation, taken from the part headers or else from the
    /// operation headers.
    pub fn content_id(&self) -> Option<&str> {
        self.part_headers.try_get(CONTENT_ID).or_else(|| self.headers.try_get(CONTENT_ID))
    }
}

/// One operation of a batch with its lifecycle flags.
///
/// Headers can be added until the content stream is requested or the message is
/// finalized; after that the message is frozen.
#[derive(Debug, Clone)]
pub struct OperationMessage {
    line: StartLine,
    headers: HeaderCollection,
    content_id: Option<String>,
    frozen: bool,
    stream_requested: bool,
}

impl OperationMessage {
    pub fn new(line: StartLine, content_id: Option<String>) -> Self {
        Self::with_headers(line, HeaderCollection::new(), content_id)
    }

    pub fn with_headers(line: StartLine, headers: HeaderCollection, content_id: Option<String>) -> Self {
        Self { line, headers, content_id, frozen: false, stream_requested: false }
    }

    pub fn line(&self) -> &StartLine {
        &self.line
    }

    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_stream_requested(&self) -> bool {
        self.stream_requested
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// - [`BatchError::MessageFrozen`] once the message is frozen
    /// - [`BatchError::DuplicateHeader`] or [`BatchError::InvalidHeader`] from the
    ///   header collection
    /// - a charset error if a `Content-Type` names a rejected charset
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), BatchError> {
        ensure!(!self.frozen, BatchError::MessageFrozen { name: name.to_string() });
        if name.eq_ignore_ascii_case(CONTENT_TYPE) {
            validate_operation_content_type(value)?;
        }
        self.headers.insert(name, value)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Marks the content stream as handed out, which also freezes the message.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::StreamAlreadyRequested`] on the second call.
    pub fn request_stream(&mut self) -> Result<(), BatchError> {
        ensure!(!self.stream_requested, BatchError::StreamAlreadyRequested);
        self.stream_requested = true;
        self.frozen = true;
        Ok(())
    }
}

/// Checks a request method against its position in the batch.
///
/// Outside a change set only `GET` is allowed. Inside a change set the method must
/// change state: `POST`, `PUT`, `PATCH`, `DELETE` or `MERGE`.
pub fn check_method(method: &Method, in_changeset: bool) -> Result<(), BatchError> {
    let allowed = if in_changeset {
        matches!(method, &Method::POST | &Method::PUT | &Method::PATCH | &Method::DELETE) || method.as_str() == "MERGE"
    } else {
        *method == Method::GET
    };

    ensure!(allowed, BatchError::MethodNotAllowed { method: method.to_string(), in_changeset });
    Ok(())
}

/// Checks a Content-ID before it is written into the part headers.
///
/// The value must be a non-empty header value without surrounding whitespace, so the
/// reader gets back exactly the ID that was written.
pub fn check_content_id(content_id: &str) -> Result<(), BatchError> {
    ensure!(!content_id.is_empty(), BatchError::invalid_header("empty Content-ID"));
    ensure!(content_id.trim() == content_id, BatchError::invalid_header(format!("Content-ID `{content_id}` has surrounding whitespace")));
    HeaderValue::from_str(content_id).map_err(|e| BatchError::invalid_header(format!("invalid Content-ID {content_id:?}: {e}")))?;
    Ok(())
}

/// Checks a request target before it goes into a request line.
///
/// Whitespace and control characters would end the request line early.
pub fn check_request_target(target: &str) -> Result<(), BatchError> {
    ensure!(!target.is_empty(), BatchError::invalid_uri(target, "empty request target"));
    ensure!(
        !target.chars().any(|c| c.is_whitespace() || c.is_control()),
        BatchError::invalid_uri(target.escape_debug(), "whitespace or control character in request target")
    );
    Ok(())
}
