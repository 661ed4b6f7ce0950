use std::fmt;

/// Direction of a batch: a batch of requests or a batch of responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Request,
    Response,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Request => f.write_str("request"),
            BatchKind::Response => f.write_str("response"),
        }
    }
}

/// Calling convention of a reader or writer, fixed at construction.
///
/// A synchronous instance only accepts the blocking calls (`read`, `flush`,
/// `std::io::Read`/`Write` on content streams); an asynchronous instance only
/// accepts the `_async` calls and `AsyncRead`/`AsyncWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingMode {
    Synchronous,
    Asynchronous,
}

impl fmt::Display for CallingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallingMode::Synchronous => f.write_str("synchronous"),
            CallingMode::Asynchronous => f.write_str("asynchronous"),
        }
    }
}
