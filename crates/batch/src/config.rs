//! Limits and defaults shared by [`BatchReader`](crate::BatchReader) and
//! [`BatchWriter`](crate::BatchWriter).

use url::Url;

use crate::protocol::DEFAULT_MAX_BOUNDARY_LENGTH;

const DEFAULT_MAX_PARTS_PER_BATCH: usize = 100;
const DEFAULT_MAX_OPERATIONS_PER_CHANGESET: usize = 1000;
const DEFAULT_MAX_BOUNDARY_PADDING: usize = 1024;
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Configuration of a batch reader or writer.
///
/// ```
/// use micro_batch::BatchConfig;
/// use url::Url;
///
/// let config = BatchConfig::default()
///     .with_max_parts_per_batch(10)
///     .with_base_uri(Url::parse("https://example.org/service/").unwrap());
/// assert_eq!(config.max_parts_per_batch, 10);
/// assert_eq!(config.max_operations_per_changeset, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Top-level parts of a batch, a change set counts as one part.
    pub max_parts_per_batch: usize,
    pub max_operations_per_changeset: usize,
    pub max_boundary_length: usize,
    /// Spaces and tabs allowed between a delimiter and its line terminator.
    pub max_boundary_padding: usize,
    /// Read chunk size of a reader, flush threshold of a writer.
    pub buffer_size: usize,
    /// Base for relative operation URLs.
    pub base_uri: Option<Url>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parts_per_batch: DEFAULT_MAX_PARTS_PER_BATCH,
            max_operations_per_changeset: DEFAULT_MAX_OPERATIONS_PER_CHANGESET,
            max_boundary_length: DEFAULT_MAX_BOUNDARY_LENGTH,
            max_boundary_padding: DEFAULT_MAX_BOUNDARY_PADDING,
            buffer_size: DEFAULT_BUFFER_SIZE,
            base_uri: None,
        }
    }
}

impl BatchConfig {
    pub fn with_max_parts_per_batch(mut self, max: usize) -> Self {
        self.max_parts_per_batch = max;
        self
    }

    pub fn with_max_operations_per_changeset(mut self, max: usize) -> Self {
        self.max_operations_per_changeset = max;
        self
    }

    pub fn with_max_boundary_length(mut self, max: usize) -> Self {
        self.max_boundary_length = max;
        self
    }

    pub fn with_max_boundary_padding(mut self, max: usize) -> Self {
        self.max_boundary_padding = max;
        self
    }

    /// Sets the buffer size, at least one byte.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_base_uri(mut self, base_uri: Url) -> Self {
        self.base_uri = Some(base_uri);
        self
    }
}
