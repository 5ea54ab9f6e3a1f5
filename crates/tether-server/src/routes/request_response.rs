use async_trait::async_trait;
use serde_json::Value;
use tether_core::{Inbound, InteractionHandler, Notification, Reply, StreamContext, TetherError};
use tracing::info;

/// Answers one notification with its derived reply.
pub struct RequestResponseHandler;

#[async_trait]
impl InteractionHandler for RequestResponseHandler {
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        _inbound: Inbound,
    ) -> Result<Reply, TetherError> {
        ctx.authorize()?;
        super::log_initiated("Request-response", &ctx);
        let notification = Notification::from_payload(initial)?;
        info!(
            session_id = %ctx.session_id,
            stream_id = %ctx.stream_id,
            "Received request-response request: {notification}"
        );
        Ok(Reply::Single(notification.reply().to_payload()))
    }
}
