use crate::error::BatchError;

/// Position of a [`BatchWriter`](crate::BatchWriter) in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchWriterState {
    /// nothing written yet
    Start,
    BatchStarted,
    ChangesetStarted,
    /// an operation was created, its content stream not yet requested
    OperationCreated,
    /// a content stream is alive
    OperationStreamRequested,
    /// the content stream of the last operation was released
    OperationStreamDisposed,
    ChangesetCompleted,
    BatchCompleted,
    /// a call failed, the writer is unusable
    Exception,
}

/// A writer call, validated against the current state before it does anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterAction {
    StartBatch,
    StartChangeset,
    CreateOperation,
    RequestStream,
    DisposeStream,
    EndChangeset,
    EndBatch,
    Flush,
}

impl WriterAction {
    pub(crate) fn name(self) -> &'static str {
        match self {
            WriterAction::StartBatch => "write start batch",
            WriterAction::StartChangeset => "write start changeset",
            WriterAction::CreateOperation => "create operation message",
            WriterAction::RequestStream => "request content stream",
            WriterAction::DisposeStream => "dispose content stream",
            WriterAction::EndChangeset => "write end changeset",
            WriterAction::EndBatch => "write end batch",
            WriterAction::Flush => "flush",
        }
    }
}

impl BatchWriterState {
    /// Returns the state after `action`, `in_changeset` being the position before it.
    ///
    /// # Errors
    ///
    /// - [`BatchError::NestedChangeset`] when starting a change set inside a change set
    /// - [`BatchError::InvalidTransition`] for every other pair not in the table
    pub fn on_action(self, action: WriterAction, in_changeset: bool) -> Result<Self, BatchError> {
        use BatchWriterState::*;
        use WriterAction::*;

        match (self, action, in_changeset) {
            (Start, StartBatch, _) => Ok(BatchStarted),

            (BatchStarted | ChangesetCompleted, StartChangeset, _) => Ok(ChangesetStarted),
            (OperationCreated | OperationStreamDisposed, StartChangeset, false) => Ok(ChangesetStarted),
            (ChangesetStarted, StartChangeset, _) | (OperationCreated | OperationStreamDisposed, StartChangeset, true) => {
                Err(BatchError::NestedChangeset)
            }

            (
                BatchStarted | ChangesetStarted | OperationCreated | OperationStreamDisposed | ChangesetCompleted,
                CreateOperation,
                _,
            ) => Ok(OperationCreated),

            (OperationCreated, RequestStream, _) => Ok(OperationStreamRequested),
            (OperationStreamRequested, DisposeStream, _) => Ok(OperationStreamDisposed),

            (ChangesetStarted, EndChangeset, _) => Ok(ChangesetCompleted),
            (OperationCreated | OperationStreamDisposed, EndChangeset, true) => Ok(ChangesetCompleted),

            (BatchStarted | ChangesetCompleted, EndBatch, _) => Ok(BatchCompleted),
            (OperationCreated | OperationStreamDisposed, EndBatch, false) => Ok(BatchCompleted),

            (
                BatchStarted
                | ChangesetStarted
                | OperationCreated
                | OperationStreamDisposed
                | ChangesetCompleted
                | BatchCompleted,
                Flush,
                _,
            ) => Ok(self),

            (state, action, _) => Err(BatchError::invalid_transition(state, action.name())),
        }
    }
}
