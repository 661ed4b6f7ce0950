use std::cmp;
use std::future::poll_fn;
use std::io;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::poll_read_buf;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::codec::{Frame, MultipartDecoder};
use crate::config::BatchConfig;
use crate::ensure;
use crate::error::BatchError;
use crate::protocol::scope::BatchScope;
use crate::protocol::{BatchKind, CallingMode, ContentIdRegistry, HeaderCollection, OperationPart, PayloadItem, StartLine, check_method, parse_batch_content_type};
use crate::reader::message::{OperationRequestMessage, OperationResponseMessage};
use crate::reader::state::{BatchReaderState, ReaderEvent};

/// The operation the reader is positioned on.
#[derive(Debug)]
struct CurrentOperation {
    /// taken when the message is created
    part: Option<OperationPart>,
    /// request URL resolved before the operation's own Content-ID was registered
    resolved: Option<Result<Url, BatchError>>,
    content_done: bool,
}

/// Pull reader over a batch payload.
///
/// Each [`read`](Self::read) (or [`read_async`](Self::read_async)) advances to the next
/// structural item: an operation, a change set start or end, or the end of the batch.
/// When positioned on an operation, exactly one operation message has to be created
/// before reading on; its content stream is optional and unread content is skipped.
///
/// The reader is either synchronous (`R: std::io::Read`) or asynchronous
/// (`R: tokio::io::AsyncRead`), fixed by its [`CallingMode`].
#[derive(Debug)]
pub struct BatchReader<R> {
    io: R,
    buf: BytesMut,
    eof: bool,
    decoder: MultipartDecoder,
    state: BatchReaderState,
    scope: BatchScope,
    config: BatchConfig,
    mode: CallingMode,
    current: Option<CurrentOperation>,
    /// unread rest of the last content chunk
    chunk: Bytes,
    /// read target of the sync path, zeroed once
    scratch: Vec<u8>,
}

type RequestParts = (Method, String, Url, HeaderCollection, HeaderCollection, Option<String>);

impl<R> BatchReader<R> {
    /// Creates a reader for a batch framed by `boundary`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBoundary`] if the boundary is invalid.
    pub fn new(io: R, boundary: impl Into<String>, kind: BatchKind, mode: CallingMode, config: BatchConfig) -> Result<Self, BatchError> {
        let decoder = MultipartDecoder::new(boundary, kind, &config)?;
        let scope = BatchScope::new(config.max_parts_per_batch, config.max_operations_per_changeset);

        Ok(Self {
            io,
            buf: BytesMut::with_capacity(config.buffer_size),
            eof: false,
            decoder,
            state: BatchReaderState::Initial,
            scope,
            config,
            mode,
            current: None,
            chunk: Bytes::new(),
            scratch: Vec::new(),
        })
    }

    /// Creates a reader from the `multipart/mixed` content type of the batch.
    ///
    /// # Errors
    ///
    /// Fails if the content type is not `multipart/mixed`, lacks a valid boundary, or
    /// names a rejected charset.
    pub fn from_content_type(io: R, content_type: &str, kind: BatchKind, mode: CallingMode, config: BatchConfig) -> Result<Self, BatchError> {
        let boundary = parse_batch_content_type(content_type, config.max_boundary_length)?;
        Self::new(io, boundary, kind, mode, config)
    }

    pub fn state(&self) -> BatchReaderState {
        self.state
    }

    pub fn kind(&self) -> BatchKind {
        self.decoder.kind()
    }

    pub fn calling_mode(&self) -> CallingMode {
        self.mode
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn in_changeset(&self) -> bool {
        self.scope.in_changeset()
    }

    /// Content-IDs of the open change set.
    pub fn content_ids(&self) -> &ContentIdRegistry {
        self.scope.registry()
    }

    /// Lets a server record the location of a created resource with
    /// [`ContentIdRegistry::set_target`], so later `$<id>` references resolve to it.
    pub fn content_ids_mut(&mut self) -> &mut ContentIdRegistry {
        self.scope.registry_mut()
    }

    pub fn get_ref(&self) -> &R {
        &self.io
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    /// Creates the request message of the current operation.
    ///
    /// # Errors
    ///
    /// - [`BatchError::InvalidTransition`] unless the reader is positioned on an operation
    /// - [`BatchError::OperationMessageAlreadyCreated`] on the second call for an operation
    /// - [`BatchError::WrongMessageKind`] on a response batch
    /// - a URL resolution error if the request target can not be resolved
    pub fn create_operation_request_message(&mut self) -> Result<OperationRequestMessage<'_, R>, BatchError> {
        let result = self.take_message(BatchKind::Request).and_then(|(part, resolved)| {
            let content_id = part.content_id().map(str::to_string);
            match (part.line, resolved) {
                (StartLine::Request { method, target }, Some(url)) => Ok((method, target, url?, part.headers, part.part_headers, content_id)),
                _ => Err(BatchError::WrongMessageKind { expected: BatchKind::Response, requested: BatchKind::Request }),
            }
        });
        let (method, target, url, headers, part_headers, content_id): RequestParts = self.track(result)?;

        trace!(%method, %url, ?content_id, "operation request message created");
        Ok(OperationRequestMessage { reader: self, method, target, url, headers, part_headers, content_id, stream_requested: false })
    }

    /// Creates the response message of the current operation.
    ///
    /// # Errors
    ///
    /// - [`BatchError::InvalidTransition`] unless the reader is positioned on an operation
    /// - [`BatchError::OperationMessageAlreadyCreated`] on the second call for an operation
    /// - [`BatchError::WrongMessageKind`] on a request batch
    pub fn create_operation_response_message(&mut self) -> Result<OperationResponseMessage<'_, R>, BatchError> {
        let result = self.take_message(BatchKind::Response).and_then(|(part, _)| {
            let content_id = part.content_id().map(str::to_string);
            match part.line {
                StartLine::Response { status, reason } => Ok((status, reason, part.headers, part.part_headers, content_id)),
                StartLine::Request { .. } => Err(BatchError::WrongMessageKind { expected: BatchKind::Request, requested: BatchKind::Response }),
            }
        });
        let (status, reason, headers, part_headers, content_id) = self.track(result)?;

        trace!(%status, ?content_id, "operation response message created");
        Ok(OperationResponseMessage { reader: self, status, reason, headers, part_headers, content_id, stream_requested: false })
    }

    fn take_message(&mut self, requested: BatchKind) -> Result<(OperationPart, Option<Result<Url, BatchError>>), BatchError> {
        ensure!(self.state == BatchReaderState::Operation, BatchError::invalid_transition(self.state, "create operation message"));
        let expected = self.kind();
        ensure!(requested == expected, BatchError::WrongMessageKind { expected, requested });

        let state = self.state;
        let current = self.current.as_mut().ok_or_else(|| BatchError::invalid_transition(state, "create operation message"))?;
        let part = current.part.take().ok_or(BatchError::OperationMessageAlreadyCreated)?;
        Ok((part, current.resolved.take()))
    }

    /// Moves the reader to `Exception` if `result` is an error.
    pub(crate) fn track<T>(&mut self, result: Result<T, BatchError>) -> Result<T, BatchError> {
        if let Err(e) = &result {
            if self.state != BatchReaderState::Exception {
                error!(state = ?self.state, error = %e, "batch reader failed");
                self.state = BatchReaderState::Exception;
            }
        }
        result
    }

    fn check_mode(&self, actual: CallingMode) -> Result<(), BatchError> {
        ensure!(self.mode == actual, BatchError::CallingModeMismatch { expected: self.mode, actual });
        Ok(())
    }

    /// Checks a read call, returns false if the batch is already complete.
    fn begin_read(&mut self, mode: CallingMode) -> Result<bool, BatchError> {
        self.check_mode(mode)?;
        match self.state {
            BatchReaderState::Completed => return Ok(false),
            BatchReaderState::Exception => return Err(BatchError::invalid_transition(self.state, "read")),
            BatchReaderState::Operation => {
                let created = self.current.as_ref().is_some_and(|current| current.part.is_none());
                ensure!(created, BatchError::OperationMessageRequired { action: "read" });
            }
            _ => {}
        }
        Ok(true)
    }

    fn needs_skip(&self) -> bool {
        self.current.as_ref().is_some_and(|current| !current.content_done)
    }

    fn content_done(&self) -> bool {
        self.current.as_ref().is_none_or(|current| current.content_done)
    }

    fn decode_step(&mut self) -> Result<Option<Frame>, BatchError> {
        self.decoder.decode_frame(&mut self.buf, self.eof)
    }

    /// Accepts a frame of the current operation's content, returns the chunk if any.
    fn on_content_frame(&mut self, frame: Frame) -> Result<Option<Bytes>, BatchError> {
        match frame {
            Frame::Payload(PayloadItem::Chunk(bytes)) => Ok(Some(bytes)),
            Frame::Payload(PayloadItem::Eof) => {
                if let Some(current) = self.current.as_mut() {
                    current.content_done = true;
                }
                Ok(None)
            }
            _ => Err(BatchError::invalid_transition(self.state, "read content")),
        }
    }

    fn warn_skipped(&self, skipped: usize) {
        if skipped > 0 {
            warn!(skipped, "skipped unread operation content");
        }
    }

    /// Applies a structural frame and returns whether items remain.
    fn on_frame(&mut self, frame: Frame) -> Result<bool, BatchError> {
        let event = match &frame {
            Frame::Operation(_) => ReaderEvent::OperationFound,
            Frame::ChangesetStart { .. } => ReaderEvent::ChangesetStarted,
            Frame::ChangesetEnd => ReaderEvent::ChangesetEnded,
            Frame::BatchEnd => ReaderEvent::BatchEnded,
            Frame::Payload(_) => return Err(BatchError::invalid_transition(self.state, "read payload")),
        };
        let next = self.state.on_event(event, self.scope.in_changeset())?;

        self.current = None;
        self.chunk = Bytes::new();
        match frame {
            Frame::Operation(part) => {
                let resolved = match &part.line {
                    StartLine::Request { method, target } => {
                        check_method(method, self.scope.in_changeset())?;
                        Some(self.scope.registry().resolve(target, self.config.base_uri.as_ref()))
                    }
                    StartLine::Response { .. } => None,
                };
                let target = resolved.as_ref().and_then(|r| r.as_ref().ok()).cloned();
                self.scope.add_operation(part.content_id(), target)?;
                self.current = Some(CurrentOperation { part: Some(part), resolved, content_done: false });
            }
            Frame::ChangesetStart { .. } => self.scope.start_changeset()?,
            Frame::ChangesetEnd => self.scope.end_changeset(),
            Frame::BatchEnd | Frame::Payload(_) => {}
        }

        debug!(from = ?self.state, to = ?next, "batch reader transition");
        self.state = next;
        Ok(next != BatchReaderState::Completed)
    }

    fn copy_chunk(&mut self, len: usize) -> Bytes {
        let len = cmp::min(len, self.chunk.len());
        self.chunk.split_to(len)
    }
}

impl<R: Read> BatchReader<R> {
    /// Advances to the next item of the batch.
    ///
    /// Returns `Ok(true)` while items remain and `Ok(false)` once the batch is complete.
    ///
    /// # Errors
    ///
    /// - [`BatchError::CallingModeMismatch`] on an asynchronous reader
    /// - [`BatchError::OperationMessageRequired`] if no message was created for the
    ///   current operation
    /// - any framing, limit or uniqueness error of the next item
    pub fn read(&mut self) -> Result<bool, BatchError> {
        let result = self.read_next();
        self.track(result)
    }

    fn read_next(&mut self) -> Result<bool, BatchError> {
        if !self.begin_read(CallingMode::Synchronous)? {
            return Ok(false);
        }

        let mut skipped = self.chunk.len();
        self.chunk.clear();
        while self.needs_skip() {
            let frame = self.next_frame()?;
            if let Some(bytes) = self.on_content_frame(frame)? {
                skipped += bytes.len();
            }
        }
        self.warn_skipped(skipped);

        let frame = self.next_frame()?;
        self.on_frame(frame)
    }

    fn next_frame(&mut self) -> Result<Frame, BatchError> {
        loop {
            if let Some(frame) = self.decode_step()? {
                return Ok(frame);
            }
            ensure!(!self.eof, BatchError::unexpected_eof("batch"));
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<(), BatchError> {
        let size = self.config.buffer_size.max(1);
        if self.scratch.len() != size {
            self.scratch.resize(size, 0);
        }

        loop {
            match self.io.read(&mut self.scratch) {
                Ok(n) => {
                    self.buf.extend_from_slice(&self.scratch[..n]);
                    self.eof = n == 0;
                    trace!(read = n, "fill batch buffer");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn read_content(&mut self, dst: &mut [u8]) -> Result<usize, BatchError> {
        let result = self.read_content_inner(dst);
        self.track(result)
    }

    fn read_content_inner(&mut self, dst: &mut [u8]) -> Result<usize, BatchError> {
        self.check_mode(CallingMode::Synchronous)?;
        ensure!(self.state == BatchReaderState::Operation, BatchError::invalid_transition(self.state, "read content"));

        loop {
            if dst.is_empty() {
                return Ok(0);
            }
            if !self.chunk.is_empty() {
                let bytes = self.copy_chunk(dst.len());
                dst[..bytes.len()].copy_from_slice(&bytes);
                return Ok(bytes.len());
            }
            if self.content_done() {
                return Ok(0);
            }

            let frame = self.next_frame()?;
            if let Some(bytes) = self.on_content_frame(frame)? {
                self.chunk = bytes;
            }
        }
    }
}

impl<R: AsyncRead + Unpin> BatchReader<R> {
    /// Advances to the next item of the batch, see [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::CallingModeMismatch`] on a synchronous reader, otherwise the
    /// errors of [`read`](Self::read).
    pub async fn read_async(&mut self) -> Result<bool, BatchError> {
        let result = self.read_next_async().await;
        self.track(result)
    }

    async fn read_next_async(&mut self) -> Result<bool, BatchError> {
        if !self.begin_read(CallingMode::Asynchronous)? {
            return Ok(false);
        }

        let mut skipped = self.chunk.len();
        self.chunk.clear();
        while self.needs_skip() {
            let frame = poll_fn(|cx| self.poll_next_frame(cx)).await?;
            if let Some(bytes) = self.on_content_frame(frame)? {
                skipped += bytes.len();
            }
        }
        self.warn_skipped(skipped);

        let frame = poll_fn(|cx| self.poll_next_frame(cx)).await?;
        self.on_frame(frame)
    }

    fn poll_next_frame(&mut self, cx: &mut Context<'_>) -> Poll<Result<Frame, BatchError>> {
        loop {
            if let Some(frame) = self.decode_step()? {
                return Poll::Ready(Ok(frame));
            }
            if self.eof {
                return Poll::Ready(Err(BatchError::unexpected_eof("batch")));
            }

            self.buf.reserve(self.config.buffer_size);
            let n = ready!(poll_read_buf(Pin::new(&mut self.io), cx, &mut self.buf))?;
            trace!(read = n, "fill batch buffer");
            self.eof = n == 0;
        }
    }

    pub(crate) fn poll_read_content(&mut self, cx: &mut Context<'_>, dst: &mut ReadBuf<'_>) -> Poll<Result<(), BatchError>> {
        let result = ready!(self.poll_read_content_inner(cx, dst));
        Poll::Ready(self.track(result))
    }

    fn poll_read_content_inner(&mut self, cx: &mut Context<'_>, dst: &mut ReadBuf<'_>) -> Poll<Result<(), BatchError>> {
        self.check_mode(CallingMode::Asynchronous)?;
        if self.state != BatchReaderState::Operation {
            return Poll::Ready(Err(BatchError::invalid_transition(self.state, "read content")));
        }

        loop {
            if dst.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            if !self.chunk.is_empty() {
                let bytes = self.copy_chunk(dst.remaining());
                dst.put_slice(&bytes);
                return Poll::Ready(Ok(()));
            }
            if self.content_done() {
                return Poll::Ready(Ok(()));
            }

            let frame = ready!(self.poll_next_frame(cx))?;
            if let Some(bytes) = self.on_content_frame(frame)? {
                self.chunk = bytes;
            }
        }
    }
}
