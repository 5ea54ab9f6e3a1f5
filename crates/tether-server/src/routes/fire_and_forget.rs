use async_trait::async_trait;
use serde_json::Value;
use tether_core::{Inbound, InteractionHandler, Notification, Reply, StreamContext, TetherError};
use tracing::info;

/// Logs the notification; emits nothing.
pub struct FireAndForgetHandler;

#[async_trait]
impl InteractionHandler for FireAndForgetHandler {
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        _inbound: Inbound,
    ) -> Result<Reply, TetherError> {
        ctx.authorize()?;
        super::log_initiated("Fire-and-forget", &ctx);
        let notification = Notification::from_payload(initial)?;
        info!(
            session_id = %ctx.session_id,
            stream_id = %ctx.stream_id,
            "Received fire-and-forget request: {notification}"
        );
        Ok(Reply::Empty)
    }
}
