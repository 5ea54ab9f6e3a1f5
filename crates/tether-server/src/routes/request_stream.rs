use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tether_core::{
    Inbound, InteractionHandler, Notification, Reply, StreamContext, TetherError, ticker,
};
use tracing::{debug, info};

/// Emits the derived reply once per interval, forever.
pub struct RequestStreamHandler {
    interval: Duration,
}

impl RequestStreamHandler {
    /// Emit every `interval`, first emission one interval after open.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl InteractionHandler for RequestStreamHandler {
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        _inbound: Inbound,
    ) -> Result<Reply, TetherError> {
        ctx.authorize()?;
        super::log_initiated("Stream", &ctx);
        let notification = Notification::from_payload(initial)?;
        info!(
            session_id = %ctx.session_id,
            stream_id = %ctx.stream_id,
            "Received stream request: {notification}"
        );
        let reply = notification.reply().to_payload();
        let stream_id = ctx.stream_id;
        let ticks = ticker(self.interval)
            .take_until(ctx.token().clone().cancelled_owned())
            .map(move |_| {
                debug!(%stream_id, "stream tick");
                Ok(reply.clone())
            });
        Ok(Reply::Many(ticks.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::STREAM;
    use crate::routes::test_support::{ctx, no_inbound, notification};
    use tether_core::Interaction;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn emits_each_interval() {
        let ctx = ctx(STREAM, Interaction::RequestStream, "USER");
        let handler = RequestStreamHandler::new(Duration::from_secs(5));
        let Reply::Many(mut items) = handler
            .on_open(ctx, notification("tick").to_payload(), no_inbound())
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };

        let start = Instant::now();
        for i in 1..=3_u64 {
            let item = Notification::from_payload(items.next().await.unwrap().unwrap()).unwrap();
            assert_eq!(item.text, "In response to: tick");
            assert_eq!(start.elapsed(), Duration::from_secs(5 * i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ends_once_cancelled() {
        let ctx = ctx(STREAM, Interaction::RequestStream, "USER");
        let token = ctx.token().clone();
        let handler = RequestStreamHandler::new(Duration::from_secs(5));
        let Reply::Many(mut items) = handler
            .on_open(ctx, notification("tick").to_payload(), no_inbound())
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };
        assert!(items.next().await.is_some());
        token.cancel();
        assert!(items.next().await.is_none());
    }

    #[tokio::test]
    async fn denied_for_unprivileged_principal() {
        let ctx = ctx(STREAM, Interaction::RequestStream, "NONE");
        let err = RequestStreamHandler::new(Duration::from_secs(5))
            .on_open(ctx, notification("tick").to_payload(), no_inbound())
            .await
            .unwrap_err();
        assert!(err.is_denied());
    }
}
