//! Responder for the server's `client-status` callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_core::{
    Inbound, InteractionHandler, Reply, Session, StreamContext, TetherError, ticker,
};
use tracing::info;

/// Route the server calls after setup.
pub const STATUS_ROUTE: &str = "client-status";

/// Streams a status report every interval once the server asks for it.
pub struct StatusHandler {
    interval: Duration,
    session: Arc<Mutex<Option<Session>>>,
}

impl StatusHandler {
    /// Reports read the live session from `session` at each tick.
    pub fn new(interval: Duration, session: Arc<Mutex<Option<Session>>>) -> Self {
        Self { interval, session }
    }
}

/// Snapshot sent on each tick.
pub fn status_report(session: Option<&Session>) -> Value {
    match session {
        Some(session) => json!({
            "clientId": session.id().as_str(),
            "activeStreams": session.live_streams(),
            "droppedFrames": session.dropped_frames(),
            "uptimeMs": u64::try_from(session.uptime().as_millis()).unwrap_or(u64::MAX),
        }),
        None => json!({ "activeStreams": 0, "uptimeMs": 0 }),
    }
}

#[async_trait]
impl InteractionHandler for StatusHandler {
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        _inbound: Inbound,
    ) -> Result<Reply, TetherError> {
        let status = initial.as_str().unwrap_or("UNKNOWN");
        info!(session_id = %ctx.session_id, "Connection {status}");

        let slot = Arc::clone(&self.session);
        let reports = ticker(self.interval)
            .take_until(ctx.token().clone().cancelled_owned())
            .map(move |_| Ok(status_report(slot.lock().as_ref())));
        Ok(Reply::Many(reports.boxed()))
    }
}
