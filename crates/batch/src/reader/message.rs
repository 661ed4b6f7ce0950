//! Operation messages handed out by a [`BatchReader`] and their content streams.
//!
//! A message mutably borrows its reader, so the reader can not move on while the
//! message or its [`ContentReader`] is alive.

use std::fmt;
use std::io;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Method, StatusCode};
use tokio::io::{AsyncRead, ReadBuf};
use url::Url;

use crate::error::BatchError;
use crate::protocol::HeaderCollection;
use crate::reader::BatchReader;

/// A request operation read from a request batch.
///
/// Its headers are read-only.
pub struct OperationRequestMessage<'r, R> {
    pub(super) reader: &'r mut BatchReader<R>,
    pub(super) method: Method,
    pub(super) target: String,
    pub(super) url: Url,
    pub(super) headers: HeaderCollection,
    pub(super) part_headers: HeaderCollection,
    pub(super) content_id: Option<String>,
    pub(super) stream_requested: bool,
}

impl<R> OperationRequestMessage<'_, R> {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target as written in the payload, possibly a `$<id>` reference.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The request target resolved against the change set's Content-IDs and the base URI.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    /// # Errors
    ///
    /// Returns [`BatchError::HeaderNotFound`] if the header is absent.
    pub fn header(&self, name: &str) -> Result<&str, BatchError> {
        self.headers.get(name)
    }

    /// Headers of the enclosing MIME part.
    pub fn part_headers(&self) -> &HeaderCollection {
        &self.part_headers
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Returns the content of this operation.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::StreamAlreadyRequested`] on the second call.
    pub fn content_stream(&mut self) -> Result<ContentReader<'_, R>, BatchError> {
        let result = request_stream(&mut self.stream_requested);
        self.reader.track(result)?;
        Ok(ContentReader { reader: &mut *self.reader })
    }
}

impl<R> fmt::Debug for OperationRequestMessage<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequestMessage")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("content_id", &self.content_id)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A response operation read from a response batch.
pub struct OperationResponseMessage<'r, R> {
    pub(super) reader: &'r mut BatchReader<R>,
    pub(super) status: StatusCode,
    pub(super) reason: String,
    pub(super) headers: HeaderCollection,
    pub(super) part_headers: HeaderCollection,
    pub(super) content_id: Option<String>,
    pub(super) stream_requested: bool,
}

impl<R> OperationResponseMessage<'_, R> {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    /// # Errors
    ///
    /// Returns [`BatchError::HeaderNotFound`] if the header is absent.
    pub fn header(&self, name: &str) -> Result<&str, BatchError> {
        self.headers.get(name)
    }

    pub fn part_headers(&self) -> &HeaderCollection {
        &self.part_headers
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Returns the content of this operation.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::StreamAlreadyRequested`] on the second call.
    pub fn content_stream(&mut self) -> Result<ContentReader<'_, R>, BatchError> {
        let result = request_stream(&mut self.stream_requested);
        self.reader.track(result)?;
        Ok(ContentReader { reader: &mut *self.reader })
    }
}

impl<R> fmt::Debug for OperationResponseMessage<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResponseMessage")
            .field("status", &self.status)
            .field("content_id", &self.content_id)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn request_stream(requested: &mut bool) -> Result<(), BatchError> {
    if *requested {
        return Err(BatchError::StreamAlreadyRequested);
    }
    *requested = true;
    Ok(())
}

/// Content of one operation.
///
/// Implements [`std::io::Read`] for synchronous readers and [`tokio::io::AsyncRead`]
/// for asynchronous ones; using the other one fails with a calling mode mismatch.
/// Reading returns 0 at the end of the operation content.
pub struct ContentReader<'r, R> {
    reader: &'r mut BatchReader<R>,
}

impl<R> fmt::Debug for ContentReader<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader").field("state", &self.reader.state()).finish()
    }
}

impl<R: Read> Read for ContentReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_content(buf).map_err(io::Error::from)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ContentReader<'_, R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.get_mut().reader.poll_read_content(cx, buf).map_err(io::Error::from)
    }
}
