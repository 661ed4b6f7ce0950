//! Case-insensitive, order-preserving header collection.
//!
//! Headers of a batch part or an operation carry one value per name. Names are compared
//! case-insensitively but written back with the casing they were inserted with, in
//! insertion order.

use http::{HeaderName, HeaderValue};

use crate::ensure;
use crate::error::BatchError;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
pub const CONTENT_ID: &str = "Content-ID";
pub const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    /// lower-cased name used for lookups
    key: String,
    name: String,
    value: String,
}

/// Header name to value store that rejects duplicate names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    entries: Vec<HeaderEntry>,
}

impl HeaderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header.
    ///
    /// # Errors
    ///
    /// - [`BatchError::InvalidHeader`] if the name is not a valid token or the value
    ///   contains control characters
    /// - [`BatchError::DuplicateHeader`] if a header with the same case-insensitive name
    ///   is already present
    pub fn insert<N, V>(&mut self, name: N, value: V) -> Result<(), BatchError>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();

        HeaderName::from_bytes(name.as_bytes()).map_err(|e| BatchError::invalid_header(format!("name `{name}`: {e}")))?;
        HeaderValue::from_bytes(value.as_bytes()).map_err(|e| BatchError::invalid_header(format!("value of `{name}`: {e}")))?;

        let key = name.to_ascii_lowercase();
        ensure!(!self.entries.iter().any(|entry| entry.key == key), BatchError::DuplicateHeader { name });

        self.entries.push(HeaderEntry { key, name, value });
        Ok(())
    }

    /// Looks up a header value by case-insensitive name.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::HeaderNotFound`] if no such header exists.
    pub fn get(&self, name: &str) -> Result<&str, BatchError> {
        self.try_get(name).ok_or_else(|| BatchError::HeaderNotFound { name: name.to_string() })
    }

    pub fn try_get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|entry| entry.key.eq_ignore_ascii_case(name)).map(|entry| entry.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.try_get(name).is_some()
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|entry| entry.key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs in insertion order, names in their original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|entry| (entry.name.as_str(), entry.value.as_str()))
    }
}

impl<'a> IntoIterator for &'a HeaderCollection {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
