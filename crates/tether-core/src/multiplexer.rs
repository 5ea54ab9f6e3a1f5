//! Per-session stream table.
//!
//! Tracks every live stream on a session, on both the requesting and the
//! responding side. All mutation happens under one lock and signals are
//! pushed into per-stream inboxes while the lock is held, so removing a stream
//! is atomic with respect to dispatch: once [`StreamMultiplexer::cancel`]
//! returns, no further signal reaches that stream's consumer.
//!
//! Inboxes are bounded. An element arriving for a consumer that has fallen
//! `inbox_capacity` elements behind is dropped and counted. One slot is kept
//! back for the terminal signal so `Complete` and `Error` always arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::TetherError;
use crate::ids::{Role, StreamId, StreamIdAllocator};

/// Elements buffered per stream before new ones are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Signal delivered to the consumer of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// One element.
    Next(Value),
    /// The remote side is done.
    Complete,
    /// The remote side failed.
    Error(TetherError),
}

/// Which side of the interaction this peer plays for a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// We opened the stream and consume responses.
    Requester,
    /// The remote opened the stream and we produce responses.
    Responder,
}

struct StreamSlot {
    route: String,
    side: Side,
    inbox: Option<mpsc::Sender<StreamSignal>>,
    token: CancellationToken,
}

/// A stream removed from the table by [`StreamMultiplexer::drain`].
#[derive(Debug)]
pub struct DrainedStream {
    /// The stream.
    pub id: StreamId,
    /// Route it was opened on.
    pub route: String,
    /// Our side of it.
    pub side: Side,
}

/// Live stream table for one session.
pub struct StreamMultiplexer {
    role: Role,
    allocator: StreamIdAllocator,
    slots: Mutex<HashMap<StreamId, StreamSlot>>,
    inbox_capacity: usize,
    dropped: AtomicU64,
}

impl StreamMultiplexer {
    /// Empty table for a peer playing `role`.
    pub fn new(role: Role) -> Self {
        Self::with_inbox_capacity(role, DEFAULT_INBOX_CAPACITY)
    }

    /// Empty table buffering at most `capacity` elements per stream.
    pub fn with_inbox_capacity(role: Role, capacity: usize) -> Self {
        Self {
            role,
            allocator: StreamIdAllocator::new(role),
            slots: Mutex::new(HashMap::new()),
            inbox_capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn inbox(&self) -> (mpsc::Sender<StreamSignal>, mpsc::Receiver<StreamSignal>) {
        // +1: reserved for the terminal signal
        mpsc::channel(self.inbox_capacity + 1)
    }

    /// Allocate a fresh id for a stream we are opening.
    pub fn allocate(
        &self,
        route: &str,
        token: CancellationToken,
    ) -> (StreamId, mpsc::Receiver<StreamSignal>) {
        let (tx, rx) = self.inbox();
        let mut slots = self.slots.lock();
        let mut id = self.allocator.next_id();
        while slots.contains_key(&id) {
            id = self.allocator.next_id();
        }
        let _ = slots.insert(
            id,
            StreamSlot {
                route: route.to_owned(),
                side: Side::Requester,
                inbox: Some(tx),
                token,
            },
        );
        (id, rx)
    }

    /// Register a stream the remote peer opened.
    ///
    /// The id must come from the remote's id space and must not be live.
    pub fn accept(
        &self,
        id: StreamId,
        route: &str,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamSignal>, TetherError> {
        if !self.role.peer().allocates(id) {
            return Err(TetherError::Protocol(format!(
                "stream {id} is not in the {} id space",
                self.role.peer()
            )));
        }
        let (tx, rx) = self.inbox();
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return Err(TetherError::Protocol(format!("stream {id} is already live")));
        }
        let _ = slots.insert(
            id,
            StreamSlot {
                route: route.to_owned(),
                side: Side::Responder,
                inbox: Some(tx),
                token,
            },
        );
        Ok(rx)
    }

    /// Route an inbound signal to the stream's consumer.
    ///
    /// On the requester side a terminal signal removes the stream. On the
    /// responder side `Complete` only closes the inbound sequence, while
    /// `Error` ends the stream. Fails with [`TetherError::UnknownStream`]
    /// when the stream is not live.
    pub fn dispatch(&self, id: StreamId, signal: StreamSignal) -> Result<(), TetherError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&id).ok_or(TetherError::UnknownStream(id))?;

        match (slot.side, signal) {
            (_, StreamSignal::Next(value)) => {
                if let Some(inbox) = &slot.inbox {
                    // only this table sends, and only under the lock
                    if inbox.capacity() > 1 {
                        let _ = inbox.try_send(StreamSignal::Next(value));
                    } else if !inbox.is_closed() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            stream_id = %id,
                            route = %slot.route,
                            dropped,
                            "stream inbox full, element dropped"
                        );
                    }
                }
            }
            (Side::Requester, terminal) => {
                if let Some(inbox) = &slot.inbox {
                    let _ = inbox.try_send(terminal);
                }
                if let Some(slot) = slots.remove(&id) {
                    slot.token.cancel();
                }
            }
            (Side::Responder, StreamSignal::Complete) => {
                slot.inbox = None;
            }
            (Side::Responder, StreamSignal::Error(_)) => {
                if let Some(slot) = slots.remove(&id) {
                    slot.token.cancel();
                }
            }
        }
        Ok(())
    }

    /// Remove a stream that finished normally. Returns whether it was live.
    pub fn remove(&self, id: StreamId) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Cancel a stream. Idempotent; returns the side if the stream was live.
    pub fn cancel(&self, id: StreamId) -> Option<Side> {
        let slot = self.slots.lock().remove(&id)?;
        slot.token.cancel();
        Some(slot.side)
    }

    /// Remove every stream, cancelling each. Requester streams receive `reason`.
    pub fn drain(&self, reason: &TetherError) -> Vec<DrainedStream> {
        let slots: Vec<(StreamId, StreamSlot)> = self.slots.lock().drain().collect();
        slots
            .into_iter()
            .map(|(id, slot)| {
                if slot.side == Side::Requester {
                    if let Some(inbox) = &slot.inbox {
                        let _ = inbox.try_send(StreamSignal::Error(reason.clone()));
                    }
                }
                slot.token.cancel();
                DrainedStream {
                    id,
                    route: slot.route,
                    side: slot.side,
                }
            })
            .collect()
    }

    /// Whether `id` is live.
    pub fn is_live(&self, id: StreamId) -> bool {
        self.slots.lock().contains_key(&id)
    }

    /// Route a live stream was opened on.
    pub fn route_of(&self, id: StreamId) -> Option<String> {
        self.slots.lock().get(&id).map(|s| s.route.clone())
    }

    /// Number of live streams.
    pub fn live_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Elements dropped because a consumer fell behind.
    pub fn dropped_elements(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("role", &self.role)
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}
