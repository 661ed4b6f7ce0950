use std::io::{Read, Write};

use http::{Method, StatusCode};
use indoc::indoc;
use micro_batch::{BatchConfig, BatchError, BatchKind, BatchReader, BatchReaderState, BatchWriter, CallingMode};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use url::Url;

/// Shows the engine's framing and transition logs for failing tests.
fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).with_test_writer().finish();
    // another test may have installed it already
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn service() -> BatchConfig {
    BatchConfig::default().with_base_uri(Url::parse("https://example.org/").unwrap())
}

#[derive(Debug, PartialEq)]
struct ReadOperation {
    method: Method,
    url: String,
    content_id: Option<String>,
    headers: Vec<(String, String)>,
    content: Vec<u8>,
}

fn read_requests(payload: &[u8], content_type: &str, config: BatchConfig) -> Result<Vec<ReadOperation>, BatchError> {
    let mut reader = BatchReader::from_content_type(payload, content_type, BatchKind::Request, CallingMode::Synchronous, config)?;
    let mut operations = Vec::new();

    while reader.read()? {
        if reader.state() != BatchReaderState::Operation {
            continue;
        }
        let mut message = reader.create_operation_request_message()?;
        let mut content = Vec::new();
        message.content_stream()?.read_to_end(&mut content).map_err(BatchError::io)?;
        operations.push(ReadOperation {
            method: message.method().clone(),
            url: message.url().to_string(),
            content_id: message.content_id().map(str::to_string),
            headers: message.headers().iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
            content,
        });
    }
    Ok(operations)
}

#[test]
fn write_then_read() {
    init_tracing();
    let mut writer = BatchWriter::new(Vec::new(), BatchKind::Request, CallingMode::Synchronous, service());
    writer.write_start_batch().unwrap();
    writer.create_operation_request_message(Method::GET, "Customers?$top=2", None).unwrap();

    writer.write_start_changeset().unwrap();
    {
        let mut message = writer.create_operation_request_message(Method::POST, "Customers", Some("1")).unwrap();
        message.add_header("Content-Type", "application/json").unwrap();
        // content that looks like a delimiter of neither scope
        message.content_stream().unwrap().write_all(b"line one\r\n--batch\r\n--changeset\r\n").unwrap();
    }
    {
        let mut message = writer.create_operation_request_message(Method::PATCH, "$1", Some("2")).unwrap();
        message.add_header("Content-Type", "application/json").unwrap();
        message.add_header("If-Match", "*").unwrap();
        message.content_stream().unwrap().write_all(br#"{"Name":"B"}"#).unwrap();
    }
    writer.write_end_changeset().unwrap();

    writer.write_start_changeset().unwrap();
    writer.create_operation_request_message(Method::DELETE, "Customers(7)", Some("1")).unwrap();
    writer.write_end_changeset().unwrap();
    writer.write_end_batch().unwrap();

    let content_type = writer.content_type();
    let payload = writer.into_inner();
    let operations = read_requests(&payload, &content_type, service()).unwrap();

    assert_eq!(operations.len(), 4);
    assert_eq!(operations[0].method, Method::GET);
    assert_eq!(operations[0].url, "https://example.org/Customers?$top=2");
    assert_eq!(operations[0].content_id, None);
    assert!(operations[0].content.is_empty());

    assert_eq!(operations[1].url, "https://example.org/Customers");
    assert_eq!(operations[1].content, b"line one\r\n--batch\r\n--changeset\r\n");
    assert_eq!(operations[1].headers, [("Content-Type".to_string(), "application/json".to_string())]);

    assert_eq!(operations[2].method, Method::PATCH);
    assert_eq!(operations[2].url, "https://example.org/Customers");
    assert_eq!(operations[2].content_id.as_deref(), Some("2"));
    assert_eq!(operations[2].headers.len(), 2);
    assert_eq!(operations[2].content, br#"{"Name":"B"}"#);

    // Content-ID 1 again, in a later change set
    assert_eq!(operations[3].method, Method::DELETE);
    assert_eq!(operations[3].content_id.as_deref(), Some("1"));
}

#[test]
fn response_round_trip() {
    let mut writer = BatchWriter::new(Vec::new(), BatchKind::Response, CallingMode::Synchronous, BatchConfig::default());
    writer.write_start_batch().unwrap();
    {
        let mut message = writer.create_operation_response_message(StatusCode::OK, None).unwrap();
        message.add_header("Content-Type", "application/json; charset=utf-8").unwrap();
        message.content_stream().unwrap().write_all(br#"{"value":[]}"#).unwrap();
    }
    writer.write_start_changeset().unwrap();
    writer.create_operation_response_message(StatusCode::CREATED, Some("1")).unwrap();
    writer.create_operation_response_message(StatusCode::NO_CONTENT, Some("2")).unwrap();
    writer.write_end_changeset().unwrap();
    writer.write_end_batch().unwrap();

    let content_type = writer.content_type();
    let payload = writer.into_inner();
    let mut reader =
        BatchReader::from_content_type(payload.as_slice(), &content_type, BatchKind::Response, CallingMode::Synchronous, BatchConfig::default())
            .unwrap();

    let mut statuses = Vec::new();
    let mut first_content = String::new();
    while reader.read().unwrap() {
        if reader.state() == BatchReaderState::Operation {
            let mut message = reader.create_operation_response_message().unwrap();
            if statuses.is_empty() {
                message.content_stream().unwrap().read_to_string(&mut first_content).unwrap();
            }
            statuses.push((message.status(), message.content_id().map(str::to_string)));
        }
    }

    assert_eq!(first_content, r#"{"value":[]}"#);
    assert_eq!(
        statuses,
        [(StatusCode::OK, None), (StatusCode::CREATED, Some("1".to_string())), (StatusCode::NO_CONTENT, Some("2".to_string()))]
    );
}

#[test]
fn lines_of_order_scenario() {
    let payload = indoc! {r##"
        --batch_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary

        GET /Customers HTTP/1.1
        Accept: application/json


        --batch_1
        Content-Type: multipart/mixed; boundary=changeset_1

        --changeset_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary
        Content-ID: 1

        POST /Orders HTTP/1.1
        Content-Type: application/json

        {"Id":1}
        --changeset_1
        Content-Type: application/http
        Content-Transfer-Encoding: binary
        Content-ID: 2

        PUT $1/Lines HTTP/1.1
        Content-Type: application/json

        {"Item":"A"}
        --changeset_1--
        --batch_1--
        "##}
    .replace('\n', "\r\n");

    let operations = read_requests(payload.as_bytes(), "multipart/mixed; boundary=batch_1", service()).unwrap();
    assert_eq!(operations.len(), 3);
    assert_eq!(operations[0].url, "https://example.org/Customers");
    assert_eq!(operations[1].url, "https://example.org/Orders");
    assert_eq!(operations[2].method, Method::PUT);
    assert_eq!(operations[2].url, "https://example.org/Orders/Lines");
    assert_eq!(operations[2].content, br#"{"Item":"A"}"#);

    let duplicate = payload.replace("Content-ID: 2", "Content-ID: 1");
    let result = read_requests(duplicate.as_bytes(), "multipart/mixed; boundary=batch_1", service());
    assert!(matches!(result, Err(BatchError::DuplicateContentId { content_id }) if content_id == "1"));
}

#[test]
fn quoted_boundary_with_space() {
    let mut writer =
        BatchWriter::with_boundary(Vec::new(), "batch 1", BatchKind::Request, CallingMode::Synchronous, service()).unwrap();
    assert_eq!(writer.content_type(), "multipart/mixed; boundary=\"batch 1\"");

    writer.write_start_batch().unwrap();
    writer.create_operation_request_message(Method::GET, "Customers", None).unwrap();
    writer.write_end_batch().unwrap();

    let content_type = writer.content_type();
    let payload = writer.into_inner();
    let operations = read_requests(&payload, &content_type, service()).unwrap();
    assert_eq!(operations.len(), 1);
}

#[tokio::test]
async fn async_round_trip() {
    init_tracing();
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut writer = BatchWriter::with_boundary(Vec::new(), "batch_a", BatchKind::Request, CallingMode::Asynchronous, service()).unwrap();
    writer.write_start_batch_async().await.unwrap();
    writer.write_start_changeset_async().await.unwrap();
    {
        let mut message = writer.create_operation_request_message_async(Method::PUT, "Customers(1)", Some("a")).await.unwrap();
        message.add_header("Content-Type", "text/plain").unwrap();
        let mut content = message.content_stream().unwrap();
        AsyncWriteExt::write_all(&mut content, &[b'z'; 20_000]).await.unwrap();
        AsyncWriteExt::shutdown(&mut content).await.unwrap();
    }
    writer.write_end_changeset_async().await.unwrap();
    writer.flush_async().await.unwrap();
    writer.write_end_batch_async().await.unwrap();

    let payload = writer.into_inner();
    let mut reader = BatchReader::new(payload.as_slice(), "batch_a", BatchKind::Request, CallingMode::Asynchronous, service()).unwrap();

    let mut contents = Vec::new();
    while reader.read_async().await.unwrap() {
        if reader.state() == BatchReaderState::Operation {
            let mut message = reader.create_operation_request_message().unwrap();
            assert_eq!(message.url().as_str(), "https://example.org/Customers(1)");
            let mut content = Vec::new();
            AsyncReadExt::read_to_end(&mut message.content_stream().unwrap(), &mut content).await.unwrap();
            contents.push(content);
        }
    }

    assert_eq!(contents, [vec![b'z'; 20_000]]);
}
