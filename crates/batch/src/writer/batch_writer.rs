use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use http::{Method, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tokio_util::io::poll_write_buf;
use tracing::{debug, error, trace};

use crate::codec::{EncodeFrame, MultipartEncoder};
use crate::config::BatchConfig;
use crate::ensure;
use crate::error::BatchError;
use crate::protocol::scope::BatchScope;
use crate::protocol::{
    BatchKind, CallingMode, ContentIdRegistry, OperationMessage, StartLine, check_content_id, check_method, check_request_target,
    generate_batch_boundary, generate_changeset_boundary, multipart_mixed, validate_boundary,
};
use crate::writer::message::{OperationRequestMessage, OperationResponseMessage};
use crate::writer::state::{BatchWriterState, WriterAction};

/// Output side shared by the writer, its operation messages and their content streams.
#[derive(Debug)]
pub(crate) struct WriterCore<W> {
    writer: W,
    buffer: BytesMut,
    encoder: MultipartEncoder,
    state: BatchWriterState,
    scope: BatchScope,
    config: BatchConfig,
    mode: CallingMode,
    kind: BatchKind,
    boundary: String,
}

impl<W> WriterCore<W> {
    /// Moves the writer to `Exception` if `result` is an error.
    pub(crate) fn track<T>(&mut self, result: Result<T, BatchError>) -> Result<T, BatchError> {
        if let Err(e) = &result {
            if self.state != BatchWriterState::Exception {
                error!(state = ?self.state, error = %e, "batch writer failed");
                self.state = BatchWriterState::Exception;
            }
        }
        result
    }

    fn check_mode(&self, actual: CallingMode) -> Result<(), BatchError> {
        ensure!(self.mode == actual, BatchError::CallingModeMismatch { expected: self.mode, actual });
        Ok(())
    }

    fn transition(&self, action: WriterAction) -> Result<BatchWriterState, BatchError> {
        self.state.on_action(action, self.scope.in_changeset())
    }

    fn set_state(&mut self, next: BatchWriterState) {
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "batch writer transition");
        }
        self.state = next;
    }

    fn encode(&mut self, frame: EncodeFrame<'_>) -> Result<(), BatchError> {
        self.encoder.encode(frame, &mut self.buffer)
    }

    fn encode_head(&mut self, message: &OperationMessage) -> Result<(), BatchError> {
        self.encode(EncodeFrame::Operation { content_id: message.content_id(), line: message.line(), headers: message.headers() })
    }

    /// Writes the head of `message` and hands out its content stream.
    pub(crate) fn request_stream(&mut self, message: &mut OperationMessage) -> Result<(), BatchError> {
        ensure!(!message.is_stream_requested(), BatchError::StreamAlreadyRequested);
        let next = self.transition(WriterAction::RequestStream)?;
        message.request_stream()?;
        self.encode_head(message)?;
        self.set_state(next);
        Ok(())
    }

    /// Runs when a content stream is dropped.
    pub(crate) fn dispose_stream(&mut self) {
        if self.state != BatchWriterState::OperationStreamRequested {
            return;
        }
        if let Ok(next) = self.transition(WriterAction::DisposeStream) {
            self.set_state(next);
        }
    }

    fn check_content(&self, mode: CallingMode) -> Result<(), BatchError> {
        self.check_mode(mode)?;
        ensure!(self.state == BatchWriterState::OperationStreamRequested, BatchError::invalid_transition(self.state, "write content"));
        Ok(())
    }

    fn needs_drain(&self, force: bool) -> bool {
        !self.buffer.is_empty() && (force || self.buffer.len() >= self.config.buffer_size)
    }
}

impl<W: Write> WriterCore<W> {
    fn drain(&mut self, force: bool) -> Result<(), BatchError> {
        if self.needs_drain(force) {
            trace!(len = self.buffer.len(), "drain batch buffer");
            self.writer.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), BatchError> {
        self.drain(true)?;
        self.writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_content(&mut self, data: &[u8]) -> Result<usize, BatchError> {
        let result = self.check_content(CallingMode::Synchronous).and_then(|()| {
            self.encode(EncodeFrame::Payload(data))?;
            self.drain(false)
        });
        self.track(result).map(|()| data.len())
    }

    pub(crate) fn flush_content(&mut self) -> Result<(), BatchError> {
        let result = self.check_content(CallingMode::Synchronous).and_then(|()| self.flush_all());
        self.track(result)
    }
}

impl<W: AsyncWrite + Unpin> WriterCore<W> {
    async fn drain_async(&mut self, force: bool) -> Result<(), BatchError> {
        if self.needs_drain(force) {
            trace!(len = self.buffer.len(), "drain batch buffer");
            self.writer.write_all_buf(&mut self.buffer).await?;
        }
        Ok(())
    }

    async fn flush_all_async(&mut self) -> Result<(), BatchError> {
        self.drain_async(true).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BatchError>> {
        while !self.buffer.is_empty() {
            let n = ready!(poll_write_buf(Pin::new(&mut self.writer), cx, &mut self.buffer))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero).into()));
            }
        }
        Poll::Ready(Ok(()))
    }

    pub(crate) fn poll_write_content(&mut self, cx: &mut Context<'_>, data: &[u8]) -> Poll<Result<usize, BatchError>> {
        let result = ready!(self.poll_write_content_inner(cx, data));
        Poll::Ready(self.track(result))
    }

    fn poll_write_content_inner(&mut self, cx: &mut Context<'_>, data: &[u8]) -> Poll<Result<usize, BatchError>> {
        self.check_content(CallingMode::Asynchronous)?;
        if self.buffer.len() >= self.config.buffer_size {
            ready!(self.poll_drain(cx))?;
        }
        self.encode(EncodeFrame::Payload(data))?;
        Poll::Ready(Ok(data.len()))
    }

    pub(crate) fn poll_flush_content(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BatchError>> {
        let result = ready!(self.poll_flush_content_inner(cx));
        Poll::Ready(self.track(result))
    }

    fn poll_flush_content_inner(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BatchError>> {
        self.check_content(CallingMode::Asynchronous)?;
        ready!(self.poll_drain(cx))?;
        ready!(Pin::new(&mut self.writer).poll_flush(cx))?;
        Poll::Ready(Ok(()))
    }
}

/// Push writer producing a batch payload.
///
/// Calls follow the batch structure: [`write_start_batch`](Self::write_start_batch),
/// any number of operations and change sets, then [`write_end_batch`](Self::write_end_batch).
/// An operation message accepts headers until its content stream is requested; the
/// operation head is written then, or by the next writer call if no stream was taken.
///
/// Output is buffered and drained to the sink once the buffer reaches
/// [`BatchConfig::buffer_size`], on [`flush`](Self::flush) and at the end of the batch.
#[derive(Debug)]
pub struct BatchWriter<W> {
    core: WriterCore<W>,
    /// the last created operation
    pending: Option<OperationMessage>,
}

impl<W> BatchWriter<W> {
    /// Creates a writer with a generated `batch_<uuid>` boundary.
    pub fn new(writer: W, kind: BatchKind, mode: CallingMode, config: BatchConfig) -> Self {
        Self::build(writer, generate_batch_boundary(), kind, mode, config)
    }

    /// Creates a writer with a caller supplied boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBoundary`] if the boundary is invalid.
    pub fn with_boundary(writer: W, boundary: impl Into<String>, kind: BatchKind, mode: CallingMode, config: BatchConfig) -> Result<Self, BatchError> {
        let boundary = boundary.into();
        validate_boundary(&boundary, config.max_boundary_length)?;
        Ok(Self::build(writer, boundary, kind, mode, config))
    }

    fn build(writer: W, boundary: String, kind: BatchKind, mode: CallingMode, config: BatchConfig) -> Self {
        let core = WriterCore {
            writer,
            buffer: BytesMut::with_capacity(config.buffer_size),
            encoder: MultipartEncoder::new(boundary.as_str()),
            state: BatchWriterState::Start,
            scope: BatchScope::new(config.max_parts_per_batch, config.max_operations_per_changeset),
            config,
            mode,
            kind,
            boundary,
        };
        Self { core, pending: None }
    }

    pub fn boundary(&self) -> &str {
        &self.core.boundary
    }

    /// The `multipart/mixed` Content-Type of the batch.
    pub fn content_type(&self) -> String {
        multipart_mixed(&self.core.boundary)
    }

    pub fn state(&self) -> BatchWriterState {
        self.core.state
    }

    pub fn kind(&self) -> BatchKind {
        self.core.kind
    }

    pub fn calling_mode(&self) -> CallingMode {
        self.core.mode
    }

    pub fn config(&self) -> &BatchConfig {
        &self.core.config
    }

    pub fn in_changeset(&self) -> bool {
        self.core.scope.in_changeset()
    }

    /// Content-IDs of the open change set.
    pub fn content_ids(&self) -> &ContentIdRegistry {
        self.core.scope.registry()
    }

    pub fn content_ids_mut(&mut self) -> &mut ContentIdRegistry {
        self.core.scope.registry_mut()
    }

    pub fn get_ref(&self) -> &W {
        &self.core.writer
    }

    pub fn into_inner(self) -> W {
        self.core.writer
    }

    /// Validates `action` and writes the head of an operation whose stream was never taken.
    fn begin(&mut self, mode: CallingMode, action: WriterAction) -> Result<BatchWriterState, BatchError> {
        self.core.check_mode(mode)?;
        let next = self.core.transition(action)?;

        if let Some(mut message) = self.pending.take() {
            if !message.is_stream_requested() {
                message.freeze();
                self.core.encode_head(&message)?;
            }
        }
        Ok(next)
    }

    fn start_batch(&mut self, mode: CallingMode) -> Result<(), BatchError> {
        let next = self.begin(mode, WriterAction::StartBatch)?;
        self.core.set_state(next);
        Ok(())
    }

    fn start_changeset(&mut self, mode: CallingMode, boundary: String) -> Result<(), BatchError> {
        let next = self.begin(mode, WriterAction::StartChangeset)?;
        validate_boundary(&boundary, self.core.config.max_boundary_length)?;
        ensure!(boundary != self.core.boundary, BatchError::invalid_boundary(&boundary, "changeset boundary equals the batch boundary"));

        self.core.scope.start_changeset()?;
        self.core.encode(EncodeFrame::ChangesetStart { boundary: &boundary })?;
        self.core.set_state(next);
        Ok(())
    }

    fn end_changeset(&mut self, mode: CallingMode) -> Result<(), BatchError> {
        let next = self.begin(mode, WriterAction::EndChangeset)?;
        self.core.scope.end_changeset();
        self.core.encode(EncodeFrame::ChangesetEnd)?;
        self.core.set_state(next);
        Ok(())
    }

    fn end_batch(&mut self, mode: CallingMode) -> Result<(), BatchError> {
        let next = self.begin(mode, WriterAction::EndBatch)?;
        self.core.encode(EncodeFrame::BatchEnd)?;
        self.core.set_state(next);
        Ok(())
    }

    fn check_flush(&mut self, mode: CallingMode) -> Result<(), BatchError> {
        self.core.check_mode(mode)?;
        let next = self.core.transition(WriterAction::Flush)?;
        self.core.set_state(next);
        Ok(())
    }

    fn create_request(&mut self, mode: CallingMode, method: Method, url: &str, content_id: Option<&str>) -> Result<OperationMessage, BatchError> {
        let next = self.begin(mode, WriterAction::CreateOperation)?;
        let kind = self.core.kind;
        ensure!(kind == BatchKind::Request, BatchError::WrongMessageKind { expected: kind, requested: BatchKind::Request });
        check_method(&method, self.core.scope.in_changeset())?;
        check_request_target(url)?;
        if let Some(content_id) = content_id {
            check_content_id(content_id)?;
        }

        let registry = self.core.scope.registry();
        let resolved = registry.resolve(url, self.core.config.base_uri.as_ref())?;
        // `$<id>` references stay verbatim for the receiver to resolve
        let target = if registry.is_reference(url) { url.to_string() } else { resolved.to_string() };
        self.core.scope.add_operation(content_id, Some(resolved))?;

        trace!(%method, %target, ?content_id, "operation request message created");
        self.core.set_state(next);
        Ok(OperationMessage::new(StartLine::request(method, target), content_id.map(str::to_string)))
    }

    fn create_response(&mut self, mode: CallingMode, status: StatusCode, content_id: Option<&str>) -> Result<OperationMessage, BatchError> {
        let next = self.begin(mode, WriterAction::CreateOperation)?;
        let kind = self.core.kind;
        ensure!(kind == BatchKind::Response, BatchError::WrongMessageKind { expected: kind, requested: BatchKind::Response });
        if let Some(content_id) = content_id {
            check_content_id(content_id)?;
        }
        self.core.scope.add_operation(content_id, None)?;

        trace!(%status, ?content_id, "operation response message created");
        self.core.set_state(next);
        Ok(OperationMessage::new(StartLine::response(status), content_id.map(str::to_string)))
    }
}

impl<W: Write> BatchWriter<W> {
    /// # Errors
    ///
    /// Fails unless this is the first call on the writer.
    pub fn write_start_batch(&mut self) -> Result<(), BatchError> {
        let result = self.start_batch(CallingMode::Synchronous).and_then(|()| self.core.drain(false));
        self.core.track(result)
    }

    /// Starts a change set with a generated `changeset_<uuid>` boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NestedChangeset`] if a change set is open.
    pub fn write_start_changeset(&mut self) -> Result<(), BatchError> {
        self.write_start_changeset_with_boundary(generate_changeset_boundary())
    }

    /// # Errors
    ///
    /// Returns [`BatchError::NestedChangeset`] if a change set is open and
    /// [`BatchError::InvalidBoundary`] for an invalid boundary or one equal to the
    /// batch boundary.
    pub fn write_start_changeset_with_boundary(&mut self, boundary: impl Into<String>) -> Result<(), BatchError> {
        let result = self.start_changeset(CallingMode::Synchronous, boundary.into()).and_then(|()| self.core.drain(false));
        self.core.track(result)
    }

    /// # Errors
    ///
    /// Fails unless a change set is open.
    pub fn write_end_changeset(&mut self) -> Result<(), BatchError> {
        let result = self.end_changeset(CallingMode::Synchronous).and_then(|()| self.core.drain(false));
        self.core.track(result)
    }

    /// Writes the terminal delimiter and flushes the sink.
    ///
    /// # Errors
    ///
    /// Fails if a change set is open or a content stream is alive.
    pub fn write_end_batch(&mut self) -> Result<(), BatchError> {
        let result = self.end_batch(CallingMode::Synchronous).and_then(|()| self.core.flush_all());
        self.core.track(result)
    }

    /// Drains the buffer and flushes the sink.
    ///
    /// # Errors
    ///
    /// Fails on an asynchronous writer or if the sink fails.
    pub fn flush(&mut self) -> Result<(), BatchError> {
        let result = self.check_flush(CallingMode::Synchronous).and_then(|()| self.core.flush_all());
        self.core.track(result)
    }

    /// Creates a request operation.
    ///
    /// `url` is resolved against the Content-IDs of the open change set and the base URI.
    ///
    /// # Errors
    ///
    /// - [`BatchError::WrongMessageKind`] on a response writer
    /// - [`BatchError::MethodNotAllowed`] for a method not allowed at this position
    /// - [`BatchError::DuplicateContentId`] if `content_id` is taken in the change set
    /// - a URL resolution error or a limit error
    pub fn create_operation_request_message(
        &mut self,
        method: Method,
        url: &str,
        content_id: Option<&str>,
    ) -> Result<OperationRequestMessage<'_, W>, BatchError> {
        let result = self.create_request(CallingMode::Synchronous, method, url, content_id);
        let message = self.core.track(result)?;
        let message = self.pending.insert(message);

        let result = self.core.drain(false);
        self.core.track(result)?;
        Ok(OperationRequestMessage { core: &mut self.core, message })
    }

    /// Creates a response operation.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::WrongMessageKind`] on a request writer, otherwise limit and
    /// Content-ID errors.
    pub fn create_operation_response_message(
        &mut self,
        status: StatusCode,
        content_id: Option<&str>,
    ) -> Result<OperationResponseMessage<'_, W>, BatchError> {
        let result = self.create_response(CallingMode::Synchronous, status, content_id);
        let message = self.core.track(result)?;
        let message = self.pending.insert(message);

        let result = self.core.drain(false);
        self.core.track(result)?;
        Ok(OperationResponseMessage { core: &mut self.core, message })
    }
}

impl<W: AsyncWrite + Unpin> BatchWriter<W> {
    /// See [`write_start_batch`](Self::write_start_batch).
    ///
    /// # Errors
    ///
    /// Fails unless this is the first call on the writer.
    pub async fn write_start_batch_async(&mut self) -> Result<(), BatchError> {
        let result = async {
            self.start_batch(CallingMode::Asynchronous)?;
            self.core.drain_async(false).await
        }
        .await;
        self.core.track(result)
    }

    /// # Errors
    ///
    /// Returns [`BatchError::NestedChangeset`] if a change set is open.
    pub async fn write_start_changeset_async(&mut self) -> Result<(), BatchError> {
        self.write_start_changeset_with_boundary_async(generate_changeset_boundary()).await
    }

    /// # Errors
    ///
    /// See [`write_start_changeset_with_boundary`](Self::write_start_changeset_with_boundary).
    pub async fn write_start_changeset_with_boundary_async(&mut self, boundary: impl Into<String>) -> Result<(), BatchError> {
        let boundary = boundary.into();
        let result = async {
            self.start_changeset(CallingMode::Asynchronous, boundary)?;
            self.core.drain_async(false).await
        }
        .await;
        self.core.track(result)
    }

    /// # Errors
    ///
    /// Fails unless a change set is open.
    pub async fn write_end_changeset_async(&mut self) -> Result<(), BatchError> {
        let result = async {
            self.end_changeset(CallingMode::Asynchronous)?;
            self.core.drain_async(false).await
        }
        .await;
        self.core.track(result)
    }

    /// # Errors
    ///
    /// Fails if a change set is open or a content stream is alive.
    pub async fn write_end_batch_async(&mut self) -> Result<(), BatchError> {
        let result = async {
            self.end_batch(CallingMode::Asynchronous)?;
            self.core.flush_all_async().await
        }
        .await;
        self.core.track(result)
    }

    /// # Errors
    ///
    /// Fails on a synchronous writer or if the sink fails.
    pub async fn flush_async(&mut self) -> Result<(), BatchError> {
        let result = async {
            self.check_flush(CallingMode::Asynchronous)?;
            self.core.flush_all_async().await
        }
        .await;
        self.core.track(result)
    }

    /// See [`create_operation_request_message`](Self::create_operation_request_message).
    ///
    /// # Errors
    ///
    /// Same as the synchronous variant, plus a calling mode mismatch on a synchronous writer.
    pub async fn create_operation_request_message_async(
        &mut self,
        method: Method,
        url: &str,
        content_id: Option<&str>,
    ) -> Result<OperationRequestMessage<'_, W>, BatchError> {
        let result = self.create_request(CallingMode::Asynchronous, method, url, content_id);
        let message = self.core.track(result)?;
        let message = self.pending.insert(message);

        let result = self.core.drain_async(false).await;
        self.core.track(result)?;
        Ok(OperationRequestMessage { core: &mut self.core, message })
    }

    /// # Errors
    ///
    /// Same as the synchronous variant, plus a calling mode mismatch on a synchronous writer.
    pub async fn create_operation_response_message_async(
        &mut self,
        status: StatusCode,
        content_id: Option<&str>,
    ) -> Result<OperationResponseMessage<'_, W>, BatchError> {
        let result = self.create_response(CallingMode::Asynchronous, status, content_id);
        let message = self.core.track(result)?;
        let message = self.pending.insert(message);

        let result = self.core.drain_async(false).await;
        self.core.track(result)?;
        Ok(OperationResponseMessage { core: &mut self.core, message })
    }
}
