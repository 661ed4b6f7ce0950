//! Error types of the batch engine.
//!
//! Every failure is reported through [`BatchError`]. Variants carry the detail needed to
//! diagnose a malformed payload or a misuse (which header, which Content-ID, which
//! state/action pair), and [`BatchError::kind`] maps each one onto a stable
//! [`BatchErrorKind`].

use std::fmt;
use std::io;

use thiserror::Error;

use crate::protocol::{BatchKind, CallingMode};

/// Stable category of a [`BatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchErrorKind {
    /// Malformed delimiter, header, start line, content type, charset or length.
    Format,
    /// A call that is illegal in the current reader/writer state.
    State,
    /// A configured maximum was exceeded.
    Limit,
    /// Duplicate Content-ID or duplicate header name.
    Uniqueness,
    /// Misuse of an operation message or its content stream.
    Lifecycle,
    /// Header lookup miss.
    NotFound,
    /// The underlying input or output failed.
    Io,
}

impl fmt::Display for BatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchErrorKind::Format => "format",
            BatchErrorKind::State => "state",
            BatchErrorKind::Limit => "limit",
            BatchErrorKind::Uniqueness => "uniqueness",
            BatchErrorKind::Lifecycle => "lifecycle",
            BatchErrorKind::NotFound => "not found",
            BatchErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("invalid boundary `{boundary}`: {reason}")]
    InvalidBoundary { boundary: String, reason: String },

    #[error("boundary line padding exceeds the limit {max_padding}")]
    BoundaryPaddingTooLong { max_padding: usize },

    #[error("boundary `{boundary}` of the enclosing batch found before the end of the changeset")]
    UnterminatedChangeset { boundary: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("missing required header `{name}`")]
    MissingHeader { name: &'static str },

    #[error("invalid header `{name}` value `{value}`, expected `{expected}`")]
    UnexpectedHeaderValue { name: &'static str, value: String, expected: &'static str },

    #[error("invalid content type `{content_type}`: {reason}")]
    InvalidContentType { content_type: String, reason: String },

    #[error("multi-byte charset `{charset}` is not supported, use utf-8 or a single-byte charset")]
    MultiByteCharset { charset: String },

    #[error("unsupported charset `{charset}`")]
    UnsupportedCharset { charset: String },

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid response line: {reason}")]
    InvalidResponseLine { reason: String },

    #[error("http method `{method}` is not allowed {}", scope_name(.in_changeset))]
    MethodNotAllowed { method: String, in_changeset: bool },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("content-length mismatch, declared {declared} but read {actual} bytes")]
    ContentLengthMismatch { declared: u64, actual: u64 },

    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("relative uri `{uri}` used without a base uri")]
    RelativeUriWithoutBase { uri: String },

    #[error("relative uri `{uri}` references content-id `{content_id}` which is not defined in the current changeset, and no base uri is available")]
    UndefinedContentIdReference { uri: String, content_id: String },

    #[error("`{action}` is not allowed in state {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("changesets can not be nested")]
    NestedChangeset,

    #[error("an operation message must be created for the current operation before `{action}`")]
    OperationMessageRequired { action: &'static str },

    #[error("an operation message has already been created for the current operation")]
    OperationMessageAlreadyCreated,

    #[error("can not create a {requested} message in a {expected} batch")]
    WrongMessageKind { expected: BatchKind, requested: BatchKind },

    #[error("{actual} call on a {expected} instance")]
    CallingModeMismatch { expected: CallingMode, actual: CallingMode },

    #[error("batch part count exceeds the limit {max}")]
    TooManyParts { max: usize },

    #[error("changeset operation count exceeds the limit {max}")]
    TooManyOperations { max: usize },

    #[error("header section too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("duplicate content-id `{content_id}` in changeset")]
    DuplicateContentId { content_id: String },

    #[error("duplicate header `{name}`")]
    DuplicateHeader { name: String },

    #[error("header `{name}` not found")]
    HeaderNotFound { name: String },

    #[error("content-id `{content_id}` not found")]
    ContentIdNotFound { content_id: String },

    #[error("can not modify header `{name}`, the operation message is read-only once its content stream was requested")]
    MessageFrozen { name: String },

    #[error("the content stream of this operation has already been requested")]
    StreamAlreadyRequested,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl BatchError {
    /// Returns the stable category of this error.
    pub fn kind(&self) -> BatchErrorKind {
        match self {
            BatchError::InvalidBoundary { .. }
            | BatchError::BoundaryPaddingTooLong { .. }
            | BatchError::UnterminatedChangeset { .. }
            | BatchError::InvalidHeader { .. }
            | BatchError::MissingHeader { .. }
            | BatchError::UnexpectedHeaderValue { .. }
            | BatchError::InvalidContentType { .. }
            | BatchError::MultiByteCharset { .. }
            | BatchError::UnsupportedCharset { .. }
            | BatchError::InvalidRequestLine { .. }
            | BatchError::InvalidResponseLine { .. }
            | BatchError::MethodNotAllowed { .. }
            | BatchError::InvalidContentLength { .. }
            | BatchError::ContentLengthMismatch { .. }
            | BatchError::UnexpectedEof { .. }
            | BatchError::InvalidUri { .. }
            | BatchError::RelativeUriWithoutBase { .. }
            | BatchError::UndefinedContentIdReference { .. } => BatchErrorKind::Format,

            BatchError::InvalidTransition { .. }
            | BatchError::NestedChangeset
            | BatchError::OperationMessageRequired { .. }
            | BatchError::OperationMessageAlreadyCreated
            | BatchError::WrongMessageKind { .. }
            | BatchError::CallingModeMismatch { .. } => BatchErrorKind::State,

            BatchError::TooManyParts { .. }
            | BatchError::TooManyOperations { .. }
            | BatchError::TooLargeHeader { .. }
            | BatchError::TooManyHeaders { .. } => BatchErrorKind::Limit,

            BatchError::DuplicateContentId { .. } | BatchError::DuplicateHeader { .. } => BatchErrorKind::Uniqueness,

            BatchError::MessageFrozen { .. } | BatchError::StreamAlreadyRequested => BatchErrorKind::Lifecycle,

            BatchError::HeaderNotFound { .. } | BatchError::ContentIdNotFound { .. } => BatchErrorKind::NotFound,

            BatchError::Io { .. } => BatchErrorKind::Io,
        }
    }

    pub fn invalid_boundary<B: ToString, S: ToString>(boundary: B, reason: S) -> Self {
        Self::InvalidBoundary { boundary: boundary.to_string(), reason: reason.to_string() }
    }

    pub fn boundary_padding_too_long(max_padding: usize) -> Self {
        Self::BoundaryPaddingTooLong { max_padding }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn missing_header(name: &'static str) -> Self {
        Self::MissingHeader { name }
    }

    pub fn invalid_content_type<C: ToString, S: ToString>(content_type: C, reason: S) -> Self {
        Self::InvalidContentType { content_type: content_type.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_response_line<S: ToString>(str: S) -> Self {
        Self::InvalidResponseLine { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn unexpected_eof(context: &'static str) -> Self {
        Self::UnexpectedEof { context }
    }

    pub fn invalid_uri<U: ToString, S: ToString>(uri: U, reason: S) -> Self {
        Self::InvalidUri { uri: uri.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_transition<S: fmt::Debug>(state: S, action: &'static str) -> Self {
        Self::InvalidTransition { state: format!("{state:?}"), action }
    }

    pub fn too_many_parts(max: usize) -> Self {
        Self::TooManyParts { max }
    }

    pub fn too_many_operations(max: usize) -> Self {
        Self::TooManyOperations { max }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

fn scope_name(in_changeset: &bool) -> &'static str {
    if *in_changeset { "inside a changeset" } else { "outside a changeset" }
}

/// Content streams report engine errors through `io::Result`.
impl From<BatchError> for io::Error {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Io { source } => source,
            e @ BatchError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            e => match e.kind() {
                BatchErrorKind::Format | BatchErrorKind::Limit | BatchErrorKind::Uniqueness => {
                    io::Error::new(io::ErrorKind::InvalidData, e)
                }
                _ => io::Error::other(e),
            },
        }
    }
}
