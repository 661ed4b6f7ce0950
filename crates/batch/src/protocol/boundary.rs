//! Boundary delimiter validation and generation.

use uuid::Uuid;

use crate::ensure;
use crate::error::BatchError;

/// Upper bound of a boundary length according to RFC 2046.
pub const DEFAULT_MAX_BOUNDARY_LENGTH: usize = 70;

/// Checks a boundary token against the RFC 2046 `bchars` grammar and the configured length.
///
/// # Errors
///
/// Returns [`BatchError::InvalidBoundary`] for empty, too long or malformed boundaries.
pub fn validate_boundary(boundary: &str, max_length: usize) -> Result<(), BatchError> {
    ensure!(!boundary.is_empty(), BatchError::invalid_boundary(boundary, "boundary is empty"));
    ensure!(
        boundary.len() <= max_length,
        BatchError::invalid_boundary(boundary, format!("length {} exceeds the limit {max_length}", boundary.len()))
    );
    ensure!(
        boundary.bytes().all(is_bchar),
        BatchError::invalid_boundary(boundary, "contains characters outside the boundary alphabet")
    );
    ensure!(!boundary.ends_with(' '), BatchError::invalid_boundary(boundary, "ends with a space"));
    Ok(())
}

fn is_bchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' | b' ')
}

/// Returns true if the boundary can be written as a bare content type parameter.
pub(crate) fn is_token(boundary: &str) -> bool {
    boundary.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'\'' | b'+' | b'_' | b'-' | b'.'))
}

pub fn generate_batch_boundary() -> String {
    format!("batch_{}", Uuid::new_v4())
}

pub fn generate_changeset_boundary() -> String {
    format!("changeset_{}", Uuid::new_v4())
}
