//! Position of a reader or writer inside the batch: whether a change set is open,
//! part and operation counters, and the Content-IDs of the open change set.

use tracing::debug;
use url::Url;

use crate::ensure;
use crate::error::BatchError;
use crate::protocol::content_id::ContentIdRegistry;

#[derive(Debug)]
pub(crate) struct BatchScope {
    max_parts: usize,
    max_operations: usize,
    in_changeset: bool,
    /// top-level parts: operations outside change sets and change sets themselves
    parts: usize,
    /// operations of the open change set
    operations: usize,
    registry: ContentIdRegistry,
}

impl BatchScope {
    pub(crate) fn new(max_parts: usize, max_operations: usize) -> Self {
        Self { max_parts, max_operations, in_changeset: false, parts: 0, operations: 0, registry: ContentIdRegistry::new() }
    }

    pub(crate) fn in_changeset(&self) -> bool {
        self.in_changeset
    }

    pub(crate) fn registry(&self) -> &ContentIdRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ContentIdRegistry {
        &mut self.registry
    }

    fn add_part(&mut self) -> Result<(), BatchError> {
        self.parts += 1;
        ensure!(self.parts <= self.max_parts, BatchError::too_many_parts(self.max_parts));
        Ok(())
    }

    pub(crate) fn start_changeset(&mut self) -> Result<(), BatchError> {
        ensure!(!self.in_changeset, BatchError::NestedChangeset);
        self.add_part()?;
        self.in_changeset = true;
        self.operations = 0;
        debug!(parts = self.parts, "changeset started");
        Ok(())
    }

    pub(crate) fn end_changeset(&mut self) {
        debug!(operations = self.operations, content_ids = self.registry.len(), "changeset ended");
        self.in_changeset = false;
        self.operations = 0;
        self.registry.clear();
    }

    /// Counts an operation and registers its Content-ID when inside a change set.
    ///
    /// Outside a change set Content-IDs are not tracked.
    pub(crate) fn add_operation(&mut self, content_id: Option<&str>, target: Option<Url>) -> Result<(), BatchError> {
        if !self.in_changeset {
            return self.add_part();
        }

        self.operations += 1;
        ensure!(self.operations <= self.max_operations, BatchError::too_many_operations(self.max_operations));

        if let Some(content_id) = content_id {
            self.registry.register(content_id, target)?;
        }
        Ok(())
    }
}
