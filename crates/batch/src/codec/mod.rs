//! Sans-IO boundary framing for batch payloads.
//!
//! - [`MultipartDecoder`]: scans a byte buffer for delimiter lines, decodes part headers
//!   and operation heads, and yields operation content in chunks
//! - [`MultipartEncoder`]: writes delimiters, part headers, operation heads and content
//!
//! Both work on a `BytesMut` and implement the `tokio_util` codec traits, so they can
//! be driven by the blocking and async readers and writers of this crate as well as by
//! `FramedRead` / `FramedWrite`.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_batch::codec::{Frame, MultipartDecoder};
//! use micro_batch::{BatchConfig, BatchKind};
//!
//! let mut decoder = MultipartDecoder::new("batch_1", BatchKind::Request, &BatchConfig::default()).unwrap();
//! let mut buffer = BytesMut::from("--batch_1--\r\n");
//! let frame = decoder.decode_frame(&mut buffer, true).unwrap();
//! assert_eq!(frame, Some(Frame::BatchEnd));
//! ```

mod delimiter;
mod head;
mod multipart_decoder;
mod multipart_encoder;

pub use multipart_decoder::{Frame, MultipartDecoder};
pub use multipart_encoder::{EncodeFrame, MultipartEncoder};
