//! Protocol level building blocks of a batch.
//!
//! - **Headers** ([`header`]): [`HeaderCollection`], one value per case-insensitive name
//! - **Messages** ([`message`]): [`StartLine`], [`OperationMessage`] and the decoded
//!   [`OperationPart`] / [`PayloadItem`] items
//! - **Content-IDs** ([`content_id`]): [`ContentIdRegistry`] and `$<id>` resolution
//! - **Media types** ([`media_type`], [`charset`], [`boundary`]): Content-Type parsing,
//!   charset policy, boundary validation and generation
//!
//! Nothing in here performs I/O.

pub mod boundary;
pub mod charset;
pub mod content_id;
pub mod header;
pub mod media_type;
pub mod message;
mod mode;
pub(crate) mod scope;

pub use boundary::{DEFAULT_MAX_BOUNDARY_LENGTH, generate_batch_boundary, generate_changeset_boundary, validate_boundary};
pub use charset::validate_charset;
pub use content_id::ContentIdRegistry;
pub use header::HeaderCollection;
pub use media_type::{PartKind, multipart_mixed, parse_batch_content_type};
pub use message::{OperationMessage, OperationPart, PayloadItem, StartLine, check_content_id, check_method, check_request_target};
pub use mode::{BatchKind, CallingMode};
