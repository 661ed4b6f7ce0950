//! Content-ID bookkeeping of the active change set.
//!
//! Operations inside a change set may carry a Content-ID. Later operations of the same
//! change set refer to the resource addressed by an earlier one with `$<id>`, optionally
//! followed by a path: `$1/Lines` means "the resource created by operation 1, then
//! `/Lines`". The registry is cleared when the change set ends.

use std::collections::HashMap;

use tracing::trace;
use url::{ParseError, Url};

use crate::ensure;
use crate::error::BatchError;

#[derive(Debug, Clone, Default)]
pub struct ContentIdRegistry {
    targets: HashMap<String, Option<Url>>,
}

impl ContentIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a Content-ID with the URL it stands for, if known.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::DuplicateContentId`] if the ID is already registered in
    /// this change set.
    pub fn register(&mut self, content_id: &str, target: Option<Url>) -> Result<(), BatchError> {
        ensure!(!self.targets.contains_key(content_id), BatchError::DuplicateContentId { content_id: content_id.to_string() });
        trace!(content_id, target = ?target.as_ref().map(Url::as_str), "register content-id");
        self.targets.insert(content_id.to_string(), target);
        Ok(())
    }

    /// Records the location of the resource an operation created.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ContentIdNotFound`] if the ID is unknown.
    pub fn set_target(&mut self, content_id: &str, location: Url) -> Result<(), BatchError> {
        match self.targets.get_mut(content_id) {
            Some(target) => {
                *target = Some(location);
                Ok(())
            }
            None => Err(BatchError::ContentIdNotFound { content_id: content_id.to_string() }),
        }
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.targets.contains_key(content_id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    /// Returns the registered target when `reference` is `$<id>[rest]` naming a
    /// registered Content-ID that has a target.
    fn lookup<'a>(&'a self, reference: &'a str) -> Option<(&'a Url, &'a str)> {
        let (id, rest) = split_reference(reference)?;
        let target = self.targets.get(id)?.as_ref()?;
        Some((target, rest))
    }

    /// Returns true if `reference` starts with `$<id>` naming a registered Content-ID.
    pub fn is_reference(&self, reference: &str) -> bool {
        split_reference(reference).is_some_and(|(id, _)| self.contains(id))
    }

    /// Resolves an operation URL.
    ///
    /// Resolution order: a `$<id>` reference to a registered target, an absolute URL, a
    /// relative URL joined to `base`.
    ///
    /// # Errors
    ///
    /// - [`BatchError::UndefinedContentIdReference`] for an unresolvable `$` reference
    ///   without a base URI
    /// - [`BatchError::RelativeUriWithoutBase`] for any other relative URL without a base URI
    /// - [`BatchError::InvalidUri`] if the URL does not parse
    pub fn resolve(&self, reference: &str, base: Option<&Url>) -> Result<Url, BatchError> {
        if let Some((target, rest)) = self.lookup(reference) {
            return Ok(append_to_target(target, rest));
        }

        match Url::parse(reference) {
            Ok(url) => Ok(url),
            Err(ParseError::RelativeUrlWithoutBase) => match base {
                Some(base) => base.join(reference).map_err(|e| BatchError::invalid_uri(reference, e)),
                None => match split_reference(reference) {
                    Some((content_id, _)) => Err(BatchError::UndefinedContentIdReference {
                        uri: reference.to_string(),
                        content_id: content_id.to_string(),
                    }),
                    None => Err(BatchError::RelativeUriWithoutBase { uri: reference.to_string() }),
                },
            },
            Err(e) => Err(BatchError::invalid_uri(reference, e)),
        }
    }
}

/// Appends `rest` (`[/path][?query][#fragment]`) to `target`.
///
/// The path extends the target's path; a query or fragment in `rest` replaces the
/// target's own, otherwise the target's are kept.
fn append_to_target(target: &Url, rest: &str) -> Url {
    let (rest, fragment) = match rest.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (rest, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let mut url = target.clone();
    if !path.is_empty() {
        url.set_path(&format!("{}{path}", target.path().trim_end_matches('/')));
    }
    if query.is_some() {
        url.set_query(query);
    }
    if fragment.is_some() {
        url.set_fragment(fragment);
    }
    url
}

/// Splits `$<id>[rest]` into the id and the rest, which starts at the first `/`, `?` or `#`.
fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let tail = reference.strip_prefix('$')?;
    let end = tail.find(['/', '?', '#']).unwrap_or(tail.len());
    let (id, rest) = tail.split_at(end);
    (!id.is_empty()).then_some((id, rest))
}
