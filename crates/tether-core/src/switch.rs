//! Switch-latest: only the most recently started producer may emit.
//!
//! Starting a new producer cancels the previous one first. Items are tagged
//! with the generation of the producer that made them, so anything an old
//! producer had already queued is discarded on receipt.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

/// Holds at most one active producer task.
pub struct SwitchLatest<T> {
    parent: CancellationToken,
    current: Option<CancellationToken>,
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, T)>,
    rx: mpsc::UnboundedReceiver<(u64, T)>,
}

impl<T: Send + 'static> SwitchLatest<T> {
    /// Producers started here are also cancelled when `parent` is.
    pub fn new(parent: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            parent,
            current: None,
            generation: 0,
            tx,
            rx,
        }
    }

    /// Cancel the active producer, then start `producer` in its place.
    pub fn switch_to<S>(&mut self, producer: S)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        if let Some(old) = self.current.take() {
            old.cancel();
        }
        self.generation += 1;
        let generation = self.generation;
        let token = self.parent.child_token();
        self.current = Some(token.clone());
        let tx = self.tx.clone();

        drop(tokio::spawn(async move {
            let mut producer = std::pin::pin!(producer);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    item = producer.next() => match item {
                        Some(item) => {
                            if tx.send((generation, item)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        }));
    }

    /// Next item from the active producer. Pends while nothing is active.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            let (generation, item) = self.rx.recv().await?;
            if generation == self.generation {
                return Some(item);
            }
        }
    }

    /// Cancel the active producer without starting another.
    pub fn stop(&mut self) {
        if let Some(old) = self.current.take() {
            old.cancel();
        }
        self.generation += 1;
    }
}

impl<T> Drop for SwitchLatest<T> {
    fn drop(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }
}

/// Ticks every `period`, first tick one period from now.
///
/// Ticks are scheduled against the clock: a late tick does not shift the
/// ones after it, and ticks missed entirely are skipped.
pub fn ticker(period: Duration) -> IntervalStream {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    IntervalStream::new(interval)
}
