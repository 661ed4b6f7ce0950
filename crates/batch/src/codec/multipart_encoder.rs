//! Boundary framing encoder for batch payloads.
//!
//! Every part opens with a delimiter line. Each delimiter except the first one of its
//! scope is preceded by CRLF, which ends the content of the previous part. An operation
//! part is written as:
//!
//! ```text
//! --<boundary>
//! Content-Type: application/http
//! Content-Transfer-Encoding: binary
//! [Content-ID: <id>]
//!
//! <start line>
//! <headers>
//!
//! <content>
//! ```

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::ensure;
use crate::error::BatchError;
use crate::protocol::header::{CONTENT_ID, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE};
use crate::protocol::{HeaderCollection, StartLine, multipart_mixed};

/// Initial buffer size reserved for a part head
const INIT_HEAD_SIZE: usize = 1024;

/// One item to encode, borrowed from the writer.
#[derive(Debug, Clone, Copy)]
pub enum EncodeFrame<'a> {
    /// delimiter, part headers and head of an operation
    Operation { content_id: Option<&'a str>, line: &'a StartLine, headers: &'a HeaderCollection },
    ChangesetStart { boundary: &'a str },
    ChangesetEnd,
    BatchEnd,
    Payload(&'a [u8]),
}

#[derive(Debug)]
struct Scope {
    boundary: String,
    has_parts: bool,
}

#[derive(Debug)]
pub struct MultipartEncoder {
    scopes: Vec<Scope>,
}

impl MultipartEncoder {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self { scopes: vec![Scope { boundary: boundary.into(), has_parts: false }] }
    }

    pub fn in_changeset(&self) -> bool {
        self.scopes.len() > 1
    }

    fn delimiter(&mut self, dst: &mut BytesMut, terminal: bool) -> Result<(), BatchError> {
        let scope = self.scopes.last_mut().ok_or_else(|| BatchError::invalid_transition("no open scope", "write delimiter"))?;

        if scope.has_parts {
            dst.put_slice(b"\r\n");
        }
        scope.has_parts = true;

        dst.put_slice(b"--");
        dst.put_slice(scope.boundary.as_bytes());
        if terminal {
            dst.put_slice(b"--");
        }
        trace!(boundary = %scope.boundary, terminal, "write delimiter");
        Ok(())
    }
}

impl Encoder<EncodeFrame<'_>> for MultipartEncoder {
    type Error = BatchError;

    fn encode(&mut self, item: EncodeFrame<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            EncodeFrame::Operation { content_id, line, headers } => {
                dst.reserve(INIT_HEAD_SIZE);
                self.delimiter(dst, false)?;
                write!(FastWrite(dst), "\r\n{CONTENT_TYPE}: application/http\r\n{CONTENT_TRANSFER_ENCODING}: binary\r\n")?;
                if let Some(content_id) = content_id {
                    write!(FastWrite(dst), "{CONTENT_ID}: {content_id}\r\n")?;
                }
                dst.put_slice(b"\r\n");

                match line {
                    StartLine::Request { method, target } => write!(FastWrite(dst), "{method} {target} HTTP/1.1\r\n")?,
                    StartLine::Response { status, reason } => write!(FastWrite(dst), "HTTP/1.1 {} {reason}\r\n", status.as_str())?,
                }

                for (name, value) in headers {
                    dst.put_slice(name.as_bytes());
                    dst.put_slice(b": ");
                    dst.put_slice(value.as_bytes());
                    dst.put_slice(b"\r\n");
                }
                dst.put_slice(b"\r\n");
            }

            EncodeFrame::ChangesetStart { boundary } => {
                ensure!(!self.in_changeset(), BatchError::NestedChangeset);
                self.delimiter(dst, false)?;
                write!(FastWrite(dst), "\r\n{CONTENT_TYPE}: {}\r\n\r\n", multipart_mixed(boundary))?;
                self.scopes.push(Scope { boundary: boundary.to_string(), has_parts: false });
            }

            EncodeFrame::ChangesetEnd => {
                ensure!(self.in_changeset(), BatchError::invalid_transition("batch scope", "write changeset end"));
                self.delimiter(dst, true)?;
                self.scopes.pop();
            }

            EncodeFrame::BatchEnd => {
                ensure!(!self.in_changeset(), BatchError::invalid_transition("changeset scope", "write batch end"));
                self.delimiter(dst, true)?;
                dst.put_slice(b"\r\n");
            }

            EncodeFrame::Payload(bytes) => dst.put_slice(bytes),
        }
        Ok(())
    }
}

/// Fast writer implementation for writing formatted text to BytesMut.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
