//! Live state for pathreview.
//!
//! A [`ReviewSession`] owns the paginated diff window, the selection and the
//! optimistic edit ledger for one migration. The poller feeds it status,
//! queue metrics and logs; every long-running loop here reports over an
//! `mpsc` channel.

mod debounce;
mod logs;
mod poller;
mod session;
mod window;

pub use debounce::{Debouncer, start_debounce};
pub use logs::{LogBuffer, LogLine, advance_cursor};
pub use poller::{
    PollControl, PollHandle, PollIntervals, PollStates, Stream, StreamState, SyncEvent,
    start_polling,
};
pub use session::{Notice, ReviewSession};
pub use window::{LoadOutcome, PageTicket, Stale, Window};

/// Buffer size of poller, debounce and control channels.
pub const SYNC_CHANNEL_SIZE: usize = 100;
