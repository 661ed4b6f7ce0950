//! Push writer producing a batch payload.
//!
//! ```text
//! Start ──▶ BatchStarted ──▶ ChangesetStarted ──▶ OperationCreated ──▶ OperationStreamRequested
//!                │                  ▲                 │    ▲                      │ drop
//!                │                  │                 │    └──── OperationStreamDisposed
//!                └──────────────────┴─ ChangesetCompleted ◀──┘
//!                                             │
//!                                             ▼
//!                                       BatchCompleted
//! ```

mod batch_writer;
mod message;
mod state;

pub use batch_writer::BatchWriter;
pub use message::{ContentWriter, OperationRequestMessage, OperationResponseMessage};
pub use state::{BatchWriterState, WriterAction};
