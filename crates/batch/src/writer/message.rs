//! Operation messages created by a [`BatchWriter`](crate::BatchWriter) and their
//! content streams.

use std::fmt;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::error::BatchError;
use crate::protocol::{HeaderCollection, OperationMessage, StartLine};
use crate::writer::batch_writer::WriterCore;

/// A request operation being written.
pub struct OperationRequestMessage<'w, W> {
    pub(super) core: &'w mut WriterCore<W>,
    pub(super) message: &'w mut OperationMessage,
}

/// A response operation being written.
pub struct OperationResponseMessage<'w, W> {
    pub(super) core: &'w mut WriterCore<W>,
    pub(super) message: &'w mut OperationMessage,
}

macro_rules! operation_message_impl {
    ($name:ident) => {
        impl<W> $name<'_, W> {
            /// The start line, with the request target as it goes on the wire.
            pub fn line(&self) -> &StartLine {
                self.message.line()
            }

            pub fn headers(&self) -> &HeaderCollection {
                self.message.headers()
            }

            pub fn content_id(&self) -> Option<&str> {
                self.message.content_id()
            }

            /// Adds an operation header.
            ///
            /// A failure is fatal for the writer, like every other writer error.
            ///
            /// # Errors
            ///
            /// Returns [`BatchError::MessageFrozen`] once the content stream was requested,
            /// otherwise the errors of [`OperationMessage::add_header`].
            pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), BatchError> {
                let result = self.message.add_header(name, value);
                self.core.track(result)
            }

            /// Writes the operation head and returns the content stream.
            ///
            /// # Errors
            ///
            /// Returns [`BatchError::StreamAlreadyRequested`] on the second call.
            pub fn content_stream(&mut self) -> Result<ContentWriter<'_, W>, BatchError> {
                let result = self.core.request_stream(self.message);
                self.core.track(result)?;
                Ok(ContentWriter { core: &mut *self.core })
            }
        }

        impl<W> fmt::Debug for $name<'_, W> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name)).field("message", &self.message).finish_non_exhaustive()
            }
        }
    };
}

operation_message_impl!(OperationRequestMessage);
operation_message_impl!(OperationResponseMessage);

/// Content of one operation, written straight into the batch.
///
/// Implements [`std::io::Write`] for synchronous writers and [`tokio::io::AsyncWrite`]
/// for asynchronous ones. Dropping it releases the writer.
pub struct ContentWriter<'w, W> {
    core: &'w mut WriterCore<W>,
}

impl<W> fmt::Debug for ContentWriter<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentWriter").finish_non_exhaustive()
    }
}

impl<W: Write> Write for ContentWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.core.write_content(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.core.flush_content().map_err(io::Error::from)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ContentWriter<'_, W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().core.poll_write_content(cx, buf).map_err(io::Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().core.poll_flush_content(cx).map_err(io::Error::from)
    }

    /// Flushes; the batch itself goes on after this operation.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

impl<W> Drop for ContentWriter<'_, W> {
    fn drop(&mut self) {
        self.core.dispose_stream();
    }
}
