//! Connection tracking and the server's drain on shutdown.
//!
//! The accept loop hands every connection task to a [`ConnectionTracker`].
//! On shutdown the tracker stops the accept loop, waits for the sessions the
//! registry closed to reach `Closed`, then joins the connection tasks. Tasks
//! still running when the deadline passes are aborted.

use std::time::Duration;

use parking_lot::Mutex;
use tether_core::Session;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of [`ConnectionTracker::drain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Sessions waited on.
    pub sessions: usize,
    /// Connection tasks joined or aborted.
    pub tasks: usize,
    /// Tasks aborted at the deadline.
    pub aborted: usize,
}

/// Connection tasks of one listener, plus the token that stops accepting.
#[derive(Default)]
pub struct ConnectionTracker {
    accepting: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionTracker {
    /// Tracker that is accepting and tracks nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the server stops accepting.
    pub fn token(&self) -> CancellationToken {
        self.accepting.clone()
    }

    /// Stop the accept loop and abandon pending handshakes. Idempotent.
    pub fn stop_accepting(&self) {
        self.accepting.cancel();
    }

    /// Whether the server has stopped accepting.
    pub fn is_stopped(&self) -> bool {
        self.accepting.is_cancelled()
    }

    /// Track a connection task. Finished tasks are forgotten.
    pub fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Connection tasks still running.
    pub fn running(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Stop accepting and wait up to `deadline` for `sessions` to close and
    /// every tracked task (plus `accept_task`) to finish.
    pub async fn drain(
        &self,
        sessions: Vec<Session>,
        accept_task: Option<JoinHandle<()>>,
        deadline: Duration,
    ) -> DrainReport {
        self.stop_accepting();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.extend(accept_task);
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let mut report = DrainReport {
            sessions: sessions.len(),
            tasks: tasks.len(),
            aborted: 0,
        };
        debug!(
            sessions = report.sessions,
            tasks = report.tasks,
            ?deadline,
            "draining connections"
        );

        let drained = async {
            let _ = futures::future::join_all(sessions.iter().map(|s| s.closed())).await;
            let _ = futures::future::join_all(tasks).await;
        };
        if tokio::time::timeout(deadline, drained).await.is_err() {
            for abort in aborts.iter().filter(|a| !a.is_finished()) {
                abort.abort();
                report.aborted += 1;
            }
            warn!(aborted = report.aborted, "connections still open after {deadline:?}, aborted");
        }
        report
    }
}
