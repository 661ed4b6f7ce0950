//! Pull reader over a batch payload.
//!
//! ```text
//!            read()                     create_operation_*_message()
//! Initial ──────────▶ Operation ─────────────────────────────────────▶ message
//!    │                   ▲  │                                             │
//!    │                   │  ▼                                  content_stream()
//!    └──▶ ChangesetStart ┴─ ChangesetEnd ──▶ Completed                    ▼
//!                                                                    ContentReader
//! ```

mod batch_reader;
mod message;
mod state;

pub use batch_reader::BatchReader;
pub use message::{ContentReader, OperationRequestMessage, OperationResponseMessage};
pub use state::{BatchReaderState, ReaderEvent};

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};

    use indoc::indoc;
    use url::Url;

    use super::*;
    use crate::config::BatchConfig;
    use crate::error::BatchError;
    use crate::protocol::{BatchKind, CallingMode};

    fn to_crlf(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    const REQUEST_BATCH: &str = indoc! {r##"
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

        POST $1/Orders HTTP/1.1
        Content-Type: application/json

        {"Amount":1}
        --changeset_1--
        --batch_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary

        GET Customers HTTP/1.1
        Accept: application/json


        --batch_1--
        "##};

    fn config() -> BatchConfig {
        BatchConfig::default().with_base_uri(Url::parse("https://example.org/service/").unwrap())
    }

    fn sync_reader(payload: &str, config: BatchConfig) -> BatchReader<Cursor<Vec<u8>>> {
        BatchReader::new(Cursor::new(to_crlf(payload)), "batch_1", BatchKind::Request, CallingMode::Synchronous, config).unwrap()
    }

    #[test]
    fn read_request_batch() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        assert_eq!(reader.state(), BatchReaderState::Initial);

        assert!(reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::ChangesetStart);

        assert!(reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::Operation);
        {
            let mut message = reader.create_operation_request_message().unwrap();
            assert_eq!(message.method(), http::Method::POST);
            assert_eq!(message.url().as_str(), "https://example.org/service/Customers");
            assert_eq!(message.content_id(), Some("1"));
            assert_eq!(message.header("content-type").unwrap(), "application/json");

            let mut content = String::new();
            message.content_stream().unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, r#"{"Name":"A"}"#);
        }

        assert!(reader.read().unwrap());
        {
            let message = reader.create_operation_request_message().unwrap();
            assert_eq!(message.target(), "$1/Orders");
            assert_eq!(message.url().as_str(), "https://example.org/service/Customers/Orders");
        }

        assert!(reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::ChangesetEnd);

        assert!(reader.read().unwrap());
        {
            let message = reader.create_operation_request_message().unwrap();
            assert_eq!(message.method(), http::Method::GET);
            assert_eq!(message.content_id(), None);
        }

        assert!(!reader.read().unwrap());
        assert_eq!(reader.state(), BatchReaderState::Completed);
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn message_is_required_before_reading_on() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        reader.read().unwrap();
        reader.read().unwrap();

        let e = reader.read().unwrap_err();
        assert!(matches!(e, BatchError::OperationMessageRequired { .. }));
        assert_eq!(reader.state(), BatchReaderState::Exception);
        assert!(matches!(reader.read(), Err(BatchError::InvalidTransition { .. })));
    }

    #[test]
    fn message_is_created_once() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        reader.read().unwrap();
        reader.read().unwrap();

        reader.create_operation_request_message().unwrap();
        assert!(matches!(reader.create_operation_request_message(), Err(BatchError::OperationMessageAlreadyCreated)));
    }

    #[test]
    fn wrong_message_kind() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        reader.read().unwrap();
        reader.read().unwrap();

        assert!(matches!(
            reader.create_operation_response_message(),
            Err(BatchError::WrongMessageKind { expected: BatchKind::Request, requested: BatchKind::Response })
        ));
    }

    #[test]
    fn message_outside_operation() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        assert!(matches!(reader.create_operation_request_message(), Err(BatchError::InvalidTransition { .. })));
    }

    #[test]
    fn stream_requested_once() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        reader.read().unwrap();
        reader.read().unwrap();

        let mut message = reader.create_operation_request_message().unwrap();
        drop(message.content_stream().unwrap());
        assert!(matches!(message.content_stream(), Err(BatchError::StreamAlreadyRequested)));
    }

    #[test]
    fn unread_content_is_skipped() {
        let mut reader = sync_reader(REQUEST_BATCH, config());
        reader.read().unwrap();
        reader.read().unwrap();
        {
            let mut message = reader.create_operation_request_message().unwrap();
            let mut first = [0u8; 3];
            message.content_stream().unwrap().read_exact(&mut first).unwrap();
            assert_eq!(&first, b"{\"N");
        }

        assert!(reader.read().unwrap());
        let message = reader.create_operation_request_message().unwrap();
        assert_eq!(message.content_id(), Some("2"));
    }

    #[test]
    fn duplicate_content_id() {
        let payload = REQUEST_BATCH.replace("Content-ID: 2", "Content-ID: 1");
        let mut reader = sync_reader(&payload, config());
        reader.read().unwrap();
        reader.read().unwrap();
        reader.create_operation_request_message().unwrap();

        assert!(matches!(reader.read(), Err(BatchError::DuplicateContentId { content_id }) if content_id == "1"));
        assert_eq!(reader.state(), BatchReaderState::Exception);
    }

    #[test]
    fn relative_url_without_base() {
        let mut reader = sync_reader(REQUEST_BATCH, BatchConfig::default());
        reader.read().unwrap();
        reader.read().unwrap();

        assert!(matches!(reader.create_operation_request_message(), Err(BatchError::RelativeUriWithoutBase { .. })));
    }

    #[test]
    fn calling_mode_mismatch() {
        let mut reader =
            BatchReader::new(Cursor::new(to_crlf(REQUEST_BATCH)), "batch_1", BatchKind::Request, CallingMode::Asynchronous, config())
                .unwrap();

        assert!(matches!(
            reader.read(),
            Err(BatchError::CallingModeMismatch { expected: CallingMode::Asynchronous, actual: CallingMode::Synchronous })
        ));
    }

    /// Records the size of every read the reader asks for.
    struct RecordingSource<'a> {
        inner: &'a [u8],
        requested: Vec<usize>,
    }

    impl Read for RecordingSource<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.requested.push(buf.len());
            self.inner.read(buf)
        }
    }

    #[test]
    fn reads_are_bounded_by_buffer_size() {
        let payload = to_crlf(REQUEST_BATCH);
        let source = RecordingSource { inner: payload.as_slice(), requested: Vec::new() };
        let mut reader = BatchReader::new(source, "batch_1", BatchKind::Request, CallingMode::Synchronous, config().with_buffer_size(16)).unwrap();
        while reader.read().unwrap() {
            if reader.state() == BatchReaderState::Operation {
                reader.create_operation_request_message().unwrap();
            }
        }

        let requested = &reader.get_ref().requested;
        assert!(requested.len() > payload.len() / 16);
        assert!(requested.iter().all(|&len| len == 16));
    }

    #[test]
    fn small_buffer() {
        let mut reader = sync_reader(REQUEST_BATCH, config().with_buffer_size(1));
        let mut operations = 0;
        while reader.read().unwrap() {
            if reader.state() == BatchReaderState::Operation {
                let mut message = reader.create_operation_request_message().unwrap();
                let mut content = Vec::new();
                message.content_stream().unwrap().read_to_end(&mut content).unwrap();
                operations += 1;
            }
        }
        assert_eq!(operations, 3);
    }

    #[test]
    fn from_content_type() {
        let reader = BatchReader::from_content_type(
            Cursor::new(Vec::<u8>::new()),
            "multipart/mixed; boundary=batch_1",
            BatchKind::Request,
            CallingMode::Synchronous,
            BatchConfig::default(),
        );
        assert!(reader.is_ok());

        let reader = BatchReader::from_content_type(
            Cursor::new(Vec::<u8>::new()),
            "application/json",
            BatchKind::Request,
            CallingMode::Synchronous,
            BatchConfig::default(),
        );
        assert!(matches!(reader, Err(BatchError::InvalidContentType { .. })));
    }

    #[test]
    fn truncated_payload() {
        let payload = &REQUEST_BATCH[..REQUEST_BATCH.len() - 14];
        let mut reader = sync_reader(payload, config());
        let result = loop {
            match reader.read() {
                Ok(true) if reader.state() == BatchReaderState::Operation => {
                    reader.create_operation_request_message().unwrap();
                }
                Ok(true) => {}
                other => break other,
            }
        };
        assert!(matches!(result, Err(BatchError::UnexpectedEof { .. })));
    }

    #[tokio::test]
    async fn read_response_batch_async() {
        let payload = indoc! {r##"
            --batch_r
            Content-Type: application/http
            Content-Transfer-Encoding: binary

            HTTP/1.1 200 OK
            Content-Type: application/json

            {"value":[]}
            --batch_r
            Content-Type: application/http
            Content-Transfer-Encoding: binary

            HTTP/1.1 404 Not Found


            --batch_r--
            "##};

        let io = Cursor::new(to_crlf(payload));
        let mut reader = BatchReader::new(io, "batch_r", BatchKind::Response, CallingMode::Asynchronous, BatchConfig::default()).unwrap();

        assert!(reader.read_async().await.unwrap());
        {
            let mut message = reader.create_operation_response_message().unwrap();
            assert_eq!(message.status(), http::StatusCode::OK);
            let mut content = String::new();
            let mut stream = message.content_stream().unwrap();
            tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut content).await.unwrap();
            assert_eq!(content, r#"{"value":[]}"#);
        }

        assert!(reader.read_async().await.unwrap());
        {
            let message = reader.create_operation_response_message().unwrap();
            assert_eq!(message.status(), http::StatusCode::NOT_FOUND);
            assert_eq!(message.reason(), "Not Found");
        }

        assert!(!reader.read_async().await.unwrap());
        assert_eq!(reader.state(), BatchReaderState::Completed);
    }

    #[tokio::test]
    async fn sync_content_read_on_async_reader() {
        let io = Cursor::new(to_crlf(REQUEST_BATCH));
        let mut reader = BatchReader::new(io, "batch_1", BatchKind::Request, CallingMode::Asynchronous, config()).unwrap();
        reader.read_async().await.unwrap();
        reader.read_async().await.unwrap();

        let mut message = reader.create_operation_request_message().unwrap();
        let mut stream = message.content_stream().unwrap();
        let mut buf = [0u8; 4];
        let e = Read::read(&mut stream, &mut buf).unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::Other);
    }
}
