use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tether_core::{
    Inbound, InteractionHandler, Notification, Reply, StreamContext, SwitchLatest, TetherError,
    ticker,
};
use tracing::{debug, info, warn};

/// Counts inbound notifications and re-emits the count on a ticker.
///
/// Each notification bumps the count and restarts the ticker; only the most
/// recently started ticker may emit. The ticker keeps running after the
/// requester completes its side.
pub struct ChannelHandler {
    interval: Duration,
}

impl ChannelHandler {
    /// Tick every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

enum Event {
    Stop,
    Inbound(Option<Value>),
    Tick(Option<u64>),
}

#[async_trait]
impl InteractionHandler for ChannelHandler {
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        mut inbound: Inbound,
    ) -> Result<Reply, TetherError> {
        ctx.authorize()?;
        super::log_initiated("Channel", &ctx);
        let first = Notification::from_payload(initial)?;
        info!(
            session_id = %ctx.session_id,
            stream_id = %ctx.stream_id,
            "Received channel request: {first}"
        );

        let period = self.interval;
        let token = ctx.token().clone();
        let stream_id = ctx.stream_id;
        let mut switch = SwitchLatest::new(token.clone());
        let mut count = 1_u64;
        switch.switch_to(ticker(period).map(move |_| 1_u64));

        let counts = stream! {
            let mut inbound_open = true;
            loop {
                let event = tokio::select! {
                    biased;
                    () = token.cancelled() => Event::Stop,
                    item = inbound.next(), if inbound_open => Event::Inbound(item),
                    tick = switch.next() => Event::Tick(tick),
                };
                match event {
                    Event::Stop | Event::Tick(None) => break,
                    Event::Inbound(None) => {
                        debug!(%stream_id, count, "channel inbound completed");
                        inbound_open = false;
                    }
                    Event::Inbound(Some(payload)) => match Notification::from_payload(payload) {
                        Ok(notification) => {
                            count += 1;
                            info!(%stream_id, count, "Received channel notification: {notification}");
                            let captured = count;
                            switch.switch_to(ticker(period).map(move |_| captured));
                        }
                        Err(err) => {
                            warn!(%stream_id, error = %err, "dropping channel payload");
                        }
                    },
                    Event::Tick(Some(n)) => yield Ok(json!(n)),
                }
            }
            switch.stop();
        };
        Ok(Reply::Many(counts.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::CHANNEL;
    use crate::routes::test_support::{ctx, notification};
    use futures::stream::BoxStream;
    use tether_core::{Interaction, PayloadStream};
    use tokio::sync::mpsc;
    use tokio::time::{Instant, timeout};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    async fn open(
        handler: &ChannelHandler,
        ctx: StreamContext,
        inbound: BoxStream<'static, Value>,
    ) -> PayloadStream {
        let Reply::Many(items) = handler
            .on_open(ctx, notification("first").to_payload(), Inbound::from_stream(inbound))
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };
        items
    }

    async fn next_count(items: &mut PayloadStream) -> u64 {
        items.next().await.unwrap().unwrap().as_u64().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn latest_count_wins() {
        let handler = ChannelHandler::new(Duration::from_secs(10));
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let ctx = ctx(CHANNEL, Interaction::Channel, "USER");
        let mut items = open(&handler, ctx, UnboundedReceiverStream::new(rx).boxed()).await;

        let start = Instant::now();
        assert_eq!(next_count(&mut items).await, 1);
        assert_eq!(next_count(&mut items).await, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(notification("second").to_payload()).unwrap();
        let restarted = Instant::now();
        assert_eq!(next_count(&mut items).await, 2);
        assert_eq!(restarted.elapsed(), Duration::from_secs(10));
        assert_eq!(next_count(&mut items).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_survives_inbound_completion() {
        let handler = ChannelHandler::new(Duration::from_secs(10));
        let ctx = ctx(CHANNEL, Interaction::Channel, "USER");
        let mut items = open(&handler, ctx, futures::stream::empty().boxed()).await;
        for _ in 0..3 {
            assert_eq!(next_count(&mut items).await, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_after_cancel() {
        let handler = ChannelHandler::new(Duration::from_secs(10));
        let ctx = ctx(CHANNEL, Interaction::Channel, "USER");
        let token = ctx.token().clone();
        let mut items = open(&handler, ctx, futures::stream::pending().boxed()).await;
        assert_eq!(next_count(&mut items).await, 1);

        token.cancel();
        let after = timeout(Duration::from_secs(60), items.next()).await.unwrap();
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn denied_for_unprivileged_principal() {
        let handler = ChannelHandler::new(Duration::from_secs(10));
        let ctx = ctx(CHANNEL, Interaction::Channel, "NONE");
        let err = handler
            .on_open(ctx, notification("first").to_payload(), Inbound::empty())
            .await
            .unwrap_err();
        assert!(err.is_denied());
    }
}
