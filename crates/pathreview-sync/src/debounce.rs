//! Trailing-edge debounce for search input.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::SYNC_CHANNEL_SIZE;

/// Input side of a running debouncer. Dropping it discards any pending value.
#[derive(Debug)]
pub struct Debouncer<T> {
    input: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Debouncer<T> {
    /// Offer a new value; it is emitted once no newer value arrives for the
    /// debounce delay.
    pub async fn push(&self, value: T) {
        let _ = self.input.send(value).await;
    }

    /// Discard the pending value and stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a debouncer emitting the latest value after `delay` of quiet.
pub fn start_debounce<T: Send + 'static>(delay: Duration) -> (Debouncer<T>, mpsc::Receiver<T>) {
    let (input_tx, mut input_rx) = mpsc::channel::<T>(SYNC_CHANNEL_SIZE);
    let (tx, rx) = mpsc::channel(SYNC_CHANNEL_SIZE);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        loop {
            let mut pending = tokio::select! {
                _ = token.cancelled() => return,
                value = input_rx.recv() => match value {
                    Some(value) => value,
                    None => return,
                },
            };

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    value = input_rx.recv() => match value {
                        Some(value) => pending = value,
                        None => return,
                    },
                    _ = tokio::time::sleep(delay) => break,
                }
            }

            if tx.send(pending).await.is_err() {
                return;
            }
        }
    });

    (
        Debouncer {
            input: input_tx,
            cancel,
        },
        rx,
    )
}
