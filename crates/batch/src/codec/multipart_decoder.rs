//! Boundary framing decoder for batch payloads.
//!
//! The decoder walks a `multipart/mixed` batch and produces [`Frame`]s: the start of
//! every operation (part headers, start line and headers), its content as payload
//! chunks followed by an EOF marker, and the structural change set and batch ends.
//!
//! # State Machine
//!
//! ```text
//! Preamble -> Delimiter -> PartHeaders -> OperationHead -> Content -> Delimiter -> ...
//!                              |
//!                              +-> (change set) Preamble of the change set boundary
//! ```
//!
//! Preamble and epilogue bytes are ignored. Inside a change set the boundary stack
//! holds both boundaries, so a delimiter of the enclosing batch is detected and
//! reported as an unterminated change set.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::delimiter::{Scan, scan};
use crate::codec::head::{decode_operation_head, decode_part_headers, parse_content_length};
use crate::config::BatchConfig;
use crate::ensure;
use crate::error::BatchError;
use crate::protocol::header::{CONTENT_TRANSFER_ENCODING, CONTENT_TYPE};
use crate::protocol::media_type::{PartKind, classify_part, validate_operation_content_type};
use crate::protocol::{BatchKind, HeaderCollection, OperationPart, PayloadItem, validate_boundary};

/// One decoded item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Start of an operation, its content follows as [`Frame::Payload`] items
    Operation(OperationPart),
    /// Start of a change set with the part headers that opened it
    ChangesetStart { boundary: String, headers: HeaderCollection },
    ChangesetEnd,
    BatchEnd,
    Payload(PayloadItem),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// skipping bytes up to the first delimiter of the innermost boundary
    Preamble,
    PartHeaders,
    OperationHead,
    Content,
    /// a delimiter line was consumed
    Delimiter { terminal: bool },
    /// terminal batch delimiter seen, the rest is epilogue
    Done,
}

#[derive(Debug)]
pub struct MultipartDecoder {
    kind: BatchKind,
    max_boundary_length: usize,
    max_padding: usize,
    /// batch boundary, plus the change set boundary while inside a change set
    boundaries: Vec<String>,
    state: DecodeState,
    at_line_start: bool,
    part_headers: Option<HeaderCollection>,
    declared_length: Option<u64>,
    content_read: u64,
}

impl MultipartDecoder {
    /// Creates a decoder for a batch framed by `boundary`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBoundary`] if the boundary is invalid.
    pub fn new(boundary: impl Into<String>, kind: BatchKind, config: &BatchConfig) -> Result<Self, BatchError> {
        let boundary = boundary.into();
        validate_boundary(&boundary, config.max_boundary_length)?;

        Ok(Self {
            kind,
            max_boundary_length: config.max_boundary_length,
            max_padding: config.max_boundary_padding,
            boundaries: vec![boundary],
            state: DecodeState::Preamble,
            at_line_start: true,
            part_headers: None,
            declared_length: None,
            content_read: 0,
        })
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn in_changeset(&self) -> bool {
        self.boundaries.len() > 1
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// Decodes the next frame from `src`.
    ///
    /// `eof` tells the decoder that no more bytes will be appended to `src`. Returns
    /// `Ok(None)` if more data is needed, which never happens at `eof` unless the batch
    /// is complete.
    pub fn decode_frame(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<Frame>, BatchError> {
        loop {
            match self.state {
                DecodeState::Preamble => match self.scan(src, eof)? {
                    Scan::Delimiter { consumed, terminal, parent, .. } => {
                        self.check_enclosing(parent)?;
                        trace!(skipped = consumed, terminal, "found first delimiter");
                        self.consume_delimiter(src, consumed, terminal);
                    }
                    Scan::Pending { safe } => {
                        self.discard(src, safe);
                        ensure!(!eof, BatchError::unexpected_eof("batch delimiter"));
                        return Ok(None);
                    }
                },

                DecodeState::Delimiter { terminal: false } => self.state = DecodeState::PartHeaders,

                DecodeState::Delimiter { terminal: true } => {
                    if self.in_changeset() {
                        let boundary = self.boundaries.pop();
                        trace!(?boundary, "changeset end");
                        self.state = DecodeState::Preamble;
                        return Ok(Some(Frame::ChangesetEnd));
                    }
                    trace!("batch end");
                    self.state = DecodeState::Done;
                    return Ok(Some(Frame::BatchEnd));
                }

                DecodeState::PartHeaders => {
                    let Some(headers) = decode_part_headers(src)? else {
                        ensure!(!eof, BatchError::unexpected_eof("part headers"));
                        return Ok(None);
                    };
                    self.at_line_start = true;

                    let content_type = headers.try_get(CONTENT_TYPE).ok_or(BatchError::missing_header(CONTENT_TYPE))?;
                    match classify_part(content_type, self.max_boundary_length)? {
                        PartKind::Operation => {
                            check_transfer_encoding(&headers)?;
                            self.part_headers = Some(headers);
                            self.state = DecodeState::OperationHead;
                        }
                        PartKind::Changeset { boundary } => {
                            ensure!(!self.in_changeset(), BatchError::NestedChangeset);
                            ensure!(
                                boundary != self.boundaries[0],
                                BatchError::invalid_boundary(&boundary, "changeset boundary equals the batch boundary")
                            );
                            trace!(%boundary, "changeset start");
                            self.boundaries.push(boundary.clone());
                            self.state = DecodeState::Preamble;
                            return Ok(Some(Frame::ChangesetStart { boundary, headers }));
                        }
                    }
                }

                DecodeState::OperationHead => {
                    let Some((line, headers)) = decode_operation_head(src, self.kind)? else {
                        ensure!(!eof, BatchError::unexpected_eof("operation head"));
                        return Ok(None);
                    };
                    if let Some(content_type) = headers.try_get(CONTENT_TYPE) {
                        validate_operation_content_type(content_type)?;
                    }

                    self.declared_length = parse_content_length(&headers)?;
                    self.content_read = 0;
                    self.at_line_start = true;
                    self.state = DecodeState::Content;

                    let part_headers = self.part_headers.take().unwrap_or_default();
                    return Ok(Some(Frame::Operation(OperationPart { part_headers, line, headers })));
                }

                DecodeState::Content => match self.scan(src, eof)? {
                    Scan::Delimiter { content_end, consumed, terminal, parent } => {
                        self.check_enclosing(parent)?;
                        if content_end > 0 {
                            return self.chunk(src, content_end).map(Some);
                        }

                        if let Some(declared) = self.declared_length {
                            ensure!(
                                declared == self.content_read,
                                BatchError::ContentLengthMismatch { declared, actual: self.content_read }
                            );
                        }
                        trace!(content_size = self.content_read, "operation content end");
                        self.consume_delimiter(src, consumed, terminal);
                        return Ok(Some(Frame::Payload(PayloadItem::Eof)));
                    }
                    Scan::Pending { safe } if safe > 0 => return self.chunk(src, safe).map(Some),
                    Scan::Pending { .. } => {
                        ensure!(!eof, BatchError::unexpected_eof("operation content"));
                        return Ok(None);
                    }
                },

                DecodeState::Done => {
                    if !src.is_empty() {
                        trace!(size = src.len(), "skip epilogue");
                        src.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn scan(&self, src: &BytesMut, eof: bool) -> Result<Scan, BatchError> {
        scan(src, self.at_line_start, &self.boundaries, self.max_padding, eof)
    }

    fn check_enclosing(&self, parent: bool) -> Result<(), BatchError> {
        match self.boundaries.last() {
            Some(boundary) if parent => Err(BatchError::UnterminatedChangeset { boundary: boundary.clone() }),
            _ => Ok(()),
        }
    }

    fn consume_delimiter(&mut self, src: &mut BytesMut, consumed: usize, terminal: bool) {
        src.advance(consumed);
        self.at_line_start = true;
        self.state = DecodeState::Delimiter { terminal };
    }

    fn discard(&mut self, src: &mut BytesMut, len: usize) {
        if len > 0 {
            self.at_line_start = src[len - 1] == b'\n';
            src.advance(len);
        }
    }

    fn chunk(&mut self, src: &mut BytesMut, len: usize) -> Result<Frame, BatchError> {
        let bytes = src.split_to(len).freeze();
        self.at_line_start = bytes.last() == Some(&b'\n');
        self.content_read += bytes.len() as u64;

        if let Some(declared) = self.declared_length {
            ensure!(self.content_read <= declared, BatchError::ContentLengthMismatch { declared, actual: self.content_read });
        }

        trace!(size = bytes.len(), "operation content chunk");
        Ok(Frame::Payload(PayloadItem::Chunk(bytes)))
    }
}

fn check_transfer_encoding(headers: &HeaderCollection) -> Result<(), BatchError> {
    let value = headers.try_get(CONTENT_TRANSFER_ENCODING).ok_or(BatchError::missing_header(CONTENT_TRANSFER_ENCODING))?;
    ensure!(
        value.trim().eq_ignore_ascii_case("binary"),
        BatchError::UnexpectedHeaderValue { name: CONTENT_TRANSFER_ENCODING, value: value.to_string(), expected: "binary" }
    );
    Ok(())
}

impl Decoder for MultipartDecoder {
    type Item = Frame;
    type Error = BatchError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode_frame(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decode_frame(src, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StartLine;
    use bytes::Bytes;
    use futures::StreamExt;
    use http::{Method, StatusCode};
    use indoc::indoc;
    use tokio_util::codec::FramedRead;

    const CHANGESET_BATCH: &str = indoc! {r##"
        --batch_1
        Content-Type: multipart/mixed; boundary=changeset_1

        --changeset_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary
        Content-ID: 1

        POST Customers HTTP/1.1
        Content-Type: application/json

        {"Name":"A"}
        --changeset_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary
        Content-ID: 2

        POST $1/Lines HTTP/1.1
        Content-Type: application/json

        {"Qty":1}
        --changeset_1--
        --batch_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary

        GET Customers HTTP/1.1
        Accept: application/json

        --batch_1--
        "##};

    fn decoder(kind: BatchKind) -> MultipartDecoder {
        MultipartDecoder::new("batch_1", kind, &BatchConfig::default()).unwrap()
    }

    fn decode_all(decoder: &mut MultipartDecoder, src: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode_frame(src, true).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn content(frame: &Frame) -> &Bytes {
        match frame {
            Frame::Payload(item) => item.as_bytes().unwrap(),
            other => panic!("expect payload chunk, got {other:?}"),
        }
    }

    #[test]
    fn decode_changeset_batch() {
        let mut buf = BytesMut::from(CHANGESET_BATCH);
        let mut decoder = decoder(BatchKind::Request);
        let frames = decode_all(&mut decoder, &mut buf);

        assert_eq!(frames.len(), 11);
        assert!(matches!(&frames[0], Frame::ChangesetStart { boundary, .. } if boundary == "changeset_1"));

        let Frame::Operation(part) = &frames[1] else { panic!("expect operation") };
        assert_eq!(part.line, StartLine::request(Method::POST, "Customers"));
        assert_eq!(part.content_id(), Some("1"));
        assert_eq!(part.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(&content(&frames[2])[..], br#"{"Name":"A"}"#);
        assert_eq!(frames[3], Frame::Payload(PayloadItem::Eof));

        let Frame::Operation(part) = &frames[4] else { panic!("expect operation") };
        assert_eq!(part.line, StartLine::request(Method::POST, "$1/Lines"));
        assert_eq!(&content(&frames[5])[..], br#"{"Qty":1}"#);
        assert_eq!(frames[6], Frame::Payload(PayloadItem::Eof));
        assert_eq!(frames[7], Frame::ChangesetEnd);

        let Frame::Operation(part) = &frames[8] else { panic!("expect operation") };
        assert_eq!(part.line, StartLine::request(Method::GET, "Customers"));
        assert_eq!(part.content_id(), None);
        assert_eq!(frames[9], Frame::Payload(PayloadItem::Eof));
        assert_eq!(frames[10], Frame::BatchEnd);

        assert!(decoder.is_done());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_byte_by_byte() {
        let mut decoder = decoder(BatchKind::Request);
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        let mut body = Vec::new();

        for b in CHANGESET_BATCH.as_bytes() {
            buf.extend_from_slice(&[*b]);
            while let Some(frame) = decoder.decode_frame(&mut buf, false).unwrap() {
                match frame {
                    Frame::Payload(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                    frame => frames.push(frame),
                }
            }
        }

        assert_eq!(body, br#"{"Name":"A"}{"Qty":1}"#);
        assert_eq!(frames.last(), Some(&Frame::BatchEnd));
        assert_eq!(frames.iter().filter(|f| matches!(f, Frame::Operation(_))).count(), 3);
    }

    #[test]
    fn decode_crlf_and_preamble() {
        let payload = "preamble\r\n--b\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\n\
                       HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nline1\r\n\r\n--b-- \r\nepilogue";

        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Response, &BatchConfig::default()).unwrap();
        let frames = decode_all(&mut decoder, &mut buf);

        let Frame::Operation(part) = &frames[0] else { panic!("expect operation") };
        assert_eq!(part.line, StartLine::Response { status: StatusCode::OK, reason: "OK".into() });
        assert_eq!(&content(&frames[1])[..], b"line1\r\n");
        assert_eq!(frames[2], Frame::Payload(PayloadItem::Eof));
        assert_eq!(frames[3], Frame::BatchEnd);
    }

    #[test]
    fn content_length_mismatch() {
        let payload = indoc! {r##"
            --b
            Content-Type: application/http
            Content-Transfer-Encoding: binary

            HTTP/1.1 200 OK
            Content-Length: 10

            short
            --b--
            "##};

        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Response, &BatchConfig::default()).unwrap();

        assert!(decoder.decode_frame(&mut buf, true).unwrap().is_some());
        assert!(decoder.decode_frame(&mut buf, true).unwrap().is_some());
        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::ContentLengthMismatch { declared: 10, actual: 5 }));
    }

    #[test]
    fn missing_transfer_encoding() {
        let payload = "--b\r\nContent-Type: application/http\r\n\r\nGET A HTTP/1.1\r\n\r\n--b--\r\n";
        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Request, &BatchConfig::default()).unwrap();

        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::MissingHeader { name: CONTENT_TRANSFER_ENCODING }));
    }

    #[test]
    fn wrong_transfer_encoding() {
        let payload = "--b\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: base64\r\n\r\nGET A HTTP/1.1\r\n\r\n--b--\r\n";
        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Request, &BatchConfig::default()).unwrap();

        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::UnexpectedHeaderValue { .. }));
    }

    #[test]
    fn missing_content_type() {
        let payload = "--b\r\nContent-Transfer-Encoding: binary\r\n\r\nGET A HTTP/1.1\r\n\r\n--b--\r\n";
        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Request, &BatchConfig::default()).unwrap();

        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::MissingHeader { name: CONTENT_TYPE }));
    }

    #[test]
    fn unterminated_changeset() {
        let payload = indoc! {r##"
            --batch_1
            Content-Type: multipart/mixed; boundary=changeset_1

            --changeset_1
            Content-Type: application/http
            Content-Transfer-Encoding: binary

            DELETE Customers(1) HTTP/1.1

            --batch_1--
            "##};

        let mut buf = BytesMut::from(payload);
        let mut decoder = decoder(BatchKind::Request);

        assert!(matches!(decoder.decode_frame(&mut buf, true).unwrap(), Some(Frame::ChangesetStart { .. })));
        assert!(matches!(decoder.decode_frame(&mut buf, true).unwrap(), Some(Frame::Operation(_))));
        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::UnterminatedChangeset { ref boundary } if boundary == "changeset_1"));
    }

    #[test]
    fn nested_changeset() {
        let payload = indoc! {r##"
            --batch_1
            Content-Type: multipart/mixed; boundary=changeset_1

            --changeset_1
            Content-Type: multipart/mixed; boundary=changeset_2

            --changeset_2--
            --changeset_1--
            --batch_1--
            "##};

        let mut buf = BytesMut::from(payload);
        let mut decoder = decoder(BatchKind::Request);

        assert!(decoder.decode_frame(&mut buf, true).unwrap().is_some());
        assert!(matches!(decoder.decode_frame(&mut buf, true), Err(BatchError::NestedChangeset)));
    }

    #[test]
    fn changeset_boundary_equals_batch_boundary() {
        let payload = "--batch_1\r\nContent-Type: multipart/mixed; boundary=batch_1\r\n\r\n--batch_1--\r\n--batch_1--\r\n";
        let mut buf = BytesMut::from(payload);
        let mut decoder = decoder(BatchKind::Request);

        assert!(matches!(decoder.decode_frame(&mut buf, true), Err(BatchError::InvalidBoundary { .. })));
    }

    #[test]
    fn padding_too_long() {
        let config = BatchConfig::default().with_max_boundary_padding(4);
        let payload = format!("--b{}\r\n", " ".repeat(5));
        let mut buf = BytesMut::from(payload.as_str());
        let mut decoder = MultipartDecoder::new("b", BatchKind::Request, &config).unwrap();

        let e = decoder.decode_frame(&mut buf, false).unwrap_err();
        assert!(matches!(e, BatchError::BoundaryPaddingTooLong { max_padding: 4 }));
    }

    #[test]
    fn unexpected_eof() {
        let payload = "--b\r\nContent-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n\r\nGET A HTTP/1.1\r\n\r\npartial";
        let mut buf = BytesMut::from(payload);
        let mut decoder = MultipartDecoder::new("b", BatchKind::Request, &BatchConfig::default()).unwrap();

        assert!(matches!(decoder.decode_frame(&mut buf, true).unwrap(), Some(Frame::Operation(_))));
        assert!(matches!(decoder.decode_frame(&mut buf, true).unwrap(), Some(Frame::Payload(PayloadItem::Chunk(_)))));
        let e = decoder.decode_frame(&mut buf, true).unwrap_err();
        assert!(matches!(e, BatchError::UnexpectedEof { context: "operation content" }));
    }

    #[test]
    fn empty_batch() {
        let mut buf = BytesMut::from("--batch_1--");
        let mut decoder = decoder(BatchKind::Request);

        assert_eq!(decoder.decode_frame(&mut buf, true).unwrap(), Some(Frame::BatchEnd));
        assert_eq!(decoder.decode_frame(&mut buf, true).unwrap(), None);
    }

    #[tokio::test]
    async fn framed_read() {
        let mut framed = FramedRead::with_capacity(CHANGESET_BATCH.as_bytes(), decoder(BatchKind::Request), 16);

        let mut operations = 0;
        let mut last = None;
        while let Some(frame) = framed.next().await {
            let frame = frame.unwrap();
            if matches!(frame, Frame::Operation(_)) {
                operations += 1;
            }
            last = Some(frame);
        }

        assert_eq!(operations, 3);
        assert_eq!(last, Some(Frame::BatchEnd));
    }
}
