//! A reader and writer for OData `multipart/mixed` batch payloads.
//!
//! A batch carries many HTTP operations in one body. Operations are either top-level
//! parts or grouped into change sets, and operations of a change set can reference
//! each other's results through `$<Content-ID>` URLs.
//!
//! # Architecture
//!
//! - [`codec`]: sans-IO boundary framing over a `BytesMut`, usable with `tokio_util`'s
//!   `FramedRead` / `FramedWrite`
//! - [`protocol`]: headers, operation messages, Content-ID resolution and the
//!   Content-Type, charset and boundary rules
//! - [`reader`]: [`BatchReader`], pulls items from a `Read` or `AsyncRead` source
//! - [`writer`]: [`BatchWriter`], pushes items to a `Write` or `AsyncWrite` sink
//!
//! Both the reader and the writer validate every call against an explicit transition
//! table. The first failed call moves them into an `Exception` state, after which
//! every call fails.
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//!
//! use http::Method;
//! use micro_batch::{BatchConfig, BatchKind, BatchReader, BatchReaderState, BatchWriter, CallingMode};
//! use url::Url;
//!
//! let config = BatchConfig::default().with_base_uri(Url::parse("https://example.org/").unwrap());
//!
//! let mut writer = BatchWriter::new(Vec::new(), BatchKind::Request, CallingMode::Synchronous, config.clone());
//! writer.write_start_batch().unwrap();
//! writer.write_start_changeset().unwrap();
//! {
//!     let mut message = writer.create_operation_request_message(Method::POST, "Orders", Some("1")).unwrap();
//!     message.add_header("Content-Type", "application/json").unwrap();
//!     message.content_stream().unwrap().write_all(br#"{"Id":1}"#).unwrap();
//! }
//! writer.create_operation_request_message(Method::POST, "$1/Lines", Some("2")).unwrap();
//! writer.write_end_changeset().unwrap();
//! writer.write_end_batch().unwrap();
//!
//! let content_type = writer.content_type();
//! let payload = writer.into_inner();
//!
//! let mut reader =
//!     BatchReader::from_content_type(payload.as_slice(), &content_type, BatchKind::Request, CallingMode::Synchronous, config)
//!         .unwrap();
//! let mut urls = Vec::new();
//! while reader.read().unwrap() {
//!     if reader.state() == BatchReaderState::Operation {
//!         let mut message = reader.create_operation_request_message().unwrap();
//!         urls.push(message.url().to_string());
//!         let mut content = String::new();
//!         message.content_stream().unwrap().read_to_string(&mut content).unwrap();
//!     }
//! }
//! assert_eq!(urls, ["https://example.org/Orders", "https://example.org/Orders/Lines"]);
//! ```
//!
//! A content stream borrows its message, and the message borrows the writer, so the
//! writer can not move on while a stream is alive:
//!
//! ```compile_fail
//! use std::io::Write;
//!
//! use http::Method;
//! use micro_batch::{BatchConfig, BatchKind, BatchWriter, CallingMode};
//!
//! let mut writer = BatchWriter::new(Vec::new(), BatchKind::Request, CallingMode::Synchronous, BatchConfig::default());
//! writer.write_start_batch().unwrap();
//! let mut message = writer.create_operation_request_message(Method::GET, "https://example.org/A", None).unwrap();
//! let mut content = message.content_stream().unwrap();
//! writer.write_end_batch().unwrap();
//! content.write_all(b"too late").unwrap();
//! ```
//!
//! The same holds for the reader:
//!
//! ```compile_fail
//! use std::io::Read;
//!
//! use micro_batch::{BatchConfig, BatchKind, BatchReader, CallingMode};
//!
//! let payload: &[u8] = b"--batch_1--\r\n";
//! let mut reader = BatchReader::new(payload, "batch_1", BatchKind::Request, CallingMode::Synchronous, BatchConfig::default()).unwrap();
//! reader.read().unwrap();
//! let mut message = reader.create_operation_request_message().unwrap();
//! let mut content = message.content_stream().unwrap();
//! reader.read().unwrap();
//! content.read_to_end(&mut Vec::new()).unwrap();
//! ```

mod utils;

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod writer;

pub(crate) use utils::ensure;

pub use config::BatchConfig;
pub use error::{BatchError, BatchErrorKind};
pub use protocol::{BatchKind, CallingMode, ContentIdRegistry, HeaderCollection};
pub use reader::{BatchReader, BatchReaderState};
pub use writer::{BatchWriter, BatchWriterState};
