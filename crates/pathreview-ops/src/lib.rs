//! Optimistic edit engine for pathreview.
//!
//! Edits are applied to the local node immediately, sent to the backend by
//! a single serial worker, and then committed or rolled back. Results come
//! back over a channel, the same way every long-running job in the
//! workspace reports.

mod bulk;
mod error;
mod executor;
mod ledger;
mod operation;

pub use bulk::{BulkEdit, BulkReport, submit_bulk, wait_for_task};
pub use error::MutationError;
pub use executor::{
    MutationEvent, MutationExecutor, MutationJob, MutationWorker, start_mutation_worker,
};
pub use ledger::{LedgerEntry, LedgerOutcome, MutationLedger, Settlement};
pub use operation::{Mutation, MutationKind, NodeSnapshot};

/// Buffer size of the mutation worker's job and event channels.
pub const MUTATION_CHANNEL_SIZE: usize = 100;
