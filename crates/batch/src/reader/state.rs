use crate::error::BatchError;

/// Position of a [`BatchReader`](crate::BatchReader) in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchReaderState {
    /// nothing read yet
    Initial,
    /// positioned on an operation
    Operation,
    ChangesetStart,
    ChangesetEnd,
    /// the terminal batch delimiter was read
    Completed,
    /// a call failed, the reader is unusable
    Exception,
}

/// Structural item found by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEvent {
    OperationFound,
    ChangesetStarted,
    ChangesetEnded,
    BatchEnded,
}

impl ReaderEvent {
    fn name(self) -> &'static str {
        match self {
            ReaderEvent::OperationFound => "read operation",
            ReaderEvent::ChangesetStarted => "read changeset start",
            ReaderEvent::ChangesetEnded => "read changeset end",
            ReaderEvent::BatchEnded => "read batch end",
        }
    }
}

impl BatchReaderState {
    /// Returns the state after `event`, `in_changeset` being the position before it.
    ///
    /// # Errors
    ///
    /// - [`BatchError::NestedChangeset`] for a change set start inside a change set
    /// - [`BatchError::InvalidTransition`] for every other pair not in the table
    pub fn on_event(self, event: ReaderEvent, in_changeset: bool) -> Result<Self, BatchError> {
        use BatchReaderState::*;
        use ReaderEvent::*;

        match (self, event, in_changeset) {
            (Initial | ChangesetEnd, OperationFound, false) => Ok(Operation),
            (ChangesetStart, OperationFound, true) => Ok(Operation),
            (Operation, OperationFound, _) => Ok(Operation),

            (Initial | Operation | ChangesetEnd, ChangesetStarted, false) => Ok(ChangesetStart),
            (Operation | ChangesetStart, ChangesetStarted, true) => Err(BatchError::NestedChangeset),

            (ChangesetStart | Operation, ChangesetEnded, true) => Ok(ChangesetEnd),

            (Initial | Operation | ChangesetEnd, BatchEnded, false) => Ok(Completed),

            (state, event, _) => Err(BatchError::invalid_transition(state, event.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BatchReaderState::*;
    use super::ReaderEvent::*;
    use super::*;

    #[test]
    fn accepted_transitions() {
        assert_eq!(Initial.on_event(OperationFound, false).unwrap(), Operation);
        assert_eq!(Initial.on_event(ChangesetStarted, false).unwrap(), ChangesetStart);
        assert_eq!(Initial.on_event(BatchEnded, false).unwrap(), Completed);
        assert_eq!(ChangesetStart.on_event(OperationFound, true).unwrap(), Operation);
        assert_eq!(ChangesetStart.on_event(ChangesetEnded, true).unwrap(), ChangesetEnd);
        assert_eq!(Operation.on_event(OperationFound, true).unwrap(), Operation);
        assert_eq!(Operation.on_event(ChangesetEnded, true).unwrap(), ChangesetEnd);
        assert_eq!(Operation.on_event(BatchEnded, false).unwrap(), Completed);
        assert_eq!(ChangesetEnd.on_event(ChangesetStarted, false).unwrap(), ChangesetStart);
        assert_eq!(ChangesetEnd.on_event(OperationFound, false).unwrap(), Operation);
    }

    #[test]
    fn nested_changeset() {
        assert!(matches!(ChangesetStart.on_event(ChangesetStarted, true), Err(BatchError::NestedChangeset)));
        assert!(matches!(Operation.on_event(ChangesetStarted, true), Err(BatchError::NestedChangeset)));
    }

    #[test]
    fn rejected_transitions() {
        assert!(Operation.on_event(BatchEnded, true).is_err());
        assert!(Initial.on_event(ChangesetEnded, false).is_err());
        assert!(ChangesetEnd.on_event(ChangesetEnded, false).is_err());

        for event in [OperationFound, ChangesetStarted, ChangesetEnded, BatchEnded] {
            for in_changeset in [false, true] {
                assert!(matches!(Completed.on_event(event, in_changeset), Err(BatchError::InvalidTransition { .. })));
                assert!(matches!(Exception.on_event(event, in_changeset), Err(BatchError::InvalidTransition { .. })));
            }
        }
    }
}
