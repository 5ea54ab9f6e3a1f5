//! Interaction handler trait and route table.
//!
//! A route table maps route names to handlers and is built once at startup.
//! The session looks the route up when a request frame arrives, builds a
//! [`StreamContext`] and hands the handler the initial payload plus the
//! inbound sequence (non-empty only for channels).

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, future};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::errors::TetherError;
use crate::frame::Interaction;
use crate::ids::{ClientId, StreamId};
use crate::multiplexer::StreamSignal;
use crate::security::{Authorizer, Principal};

/// Boxed sequence of payloads produced by a handler.
pub type PayloadStream = BoxStream<'static, Result<Value, TetherError>>;

/// What a handler produces for a stream.
pub enum Reply {
    /// A single payload.
    Single(Value),
    /// No payload; the stream completes.
    Empty,
    /// A lazy sequence, ended by completion, error or cancellation.
    Many(PayloadStream),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => f.debug_tuple("Single").field(v).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::Many(_) => f.write_str("Many(..)"),
        }
    }
}

/// Everything a handler knows about the stream it is servicing.
#[derive(Clone)]
pub struct StreamContext {
    /// Session the stream belongs to.
    pub session_id: ClientId,
    /// The stream being serviced.
    pub stream_id: StreamId,
    /// Route the stream was opened on.
    pub route: String,
    /// Interaction model the requester asked for.
    pub interaction: Interaction,
    principal: Option<Arc<Principal>>,
    authorizer: Arc<dyn Authorizer>,
    token: CancellationToken,
}

impl fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContext")
            .field("session_id", &self.session_id)
            .field("stream_id", &self.stream_id)
            .field("route", &self.route)
            .field("interaction", &self.interaction)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

impl StreamContext {
    /// Build a context.
    pub fn new(
        session_id: ClientId,
        stream_id: StreamId,
        route: impl Into<String>,
        interaction: Interaction,
        principal: Option<Arc<Principal>>,
        authorizer: Arc<dyn Authorizer>,
        token: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            stream_id,
            route: route.into(),
            interaction,
            principal,
            authorizer,
            token,
        }
    }

    /// Principal bound to the session, if it was authenticated.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_deref()
    }

    /// Username for log lines.
    pub fn username(&self) -> &str {
        self.principal().map_or("anonymous", |p| p.username.as_str())
    }

    /// Check the session principal may use this route.
    pub fn authorize(&self) -> Result<(), TetherError> {
        if self.authorizer.authorize(self.principal(), &self.route) {
            Ok(())
        } else {
            debug!(
                stream_id = %self.stream_id,
                route = %self.route,
                username = self.username(),
                "authorization denied"
            );
            Err(TetherError::Authorization {
                route: self.route.clone(),
            })
        }
    }

    /// Token cancelled when the stream is cancelled or the session closes.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the stream is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Whether the stream has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Payloads the requester sends after the opening frame.
///
/// Ends when the requester completes its side, errors, or the stream is
/// cancelled.
pub struct Inbound {
    items: Option<BoxStream<'static, Value>>,
}

impl Inbound {
    pub(crate) fn new(rx: mpsc::Receiver<StreamSignal>) -> Self {
        let items = ReceiverStream::new(rx)
            .take_while(|signal| future::ready(matches!(signal, StreamSignal::Next(_))))
            .filter_map(|signal| {
                future::ready(match signal {
                    StreamSignal::Next(value) => Some(value),
                    StreamSignal::Complete | StreamSignal::Error(_) => None,
                })
            });
        Self::from_stream(items)
    }

    /// Wrap an arbitrary sequence of payloads.
    pub fn from_stream(items: impl Stream<Item = Value> + Send + 'static) -> Self {
        Self {
            items: Some(items.boxed()),
        }
    }

    /// An inbound sequence that is already finished.
    pub fn empty() -> Self {
        Self { items: None }
    }
}

impl Stream for Inbound {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let this = self.get_mut();
        let Some(items) = this.items.as_mut() else {
            return Poll::Ready(None);
        };
        match items.poll_next_unpin(cx) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(value)),
            Poll::Ready(None) => {
                this.items = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Services streams opened on one route.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Start servicing a stream.
    ///
    /// Implementations call [`StreamContext::authorize`] before anything else.
    async fn on_open(
        &self,
        ctx: StreamContext,
        initial: Value,
        inbound: Inbound,
    ) -> Result<Reply, TetherError>;

    /// Called once if the stream is cancelled before it finished.
    fn on_cancel(&self, ctx: &StreamContext) {
        debug!(stream_id = %ctx.stream_id, route = %ctx.route, "stream cancelled");
    }
}

/// Route name to handler lookup.
#[derive(Clone, Default)]
pub struct RouteTable {
    handlers: HashMap<String, Arc<dyn InteractionHandler>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a route, replacing any previous one.
    pub fn register(&mut self, route: &str, handler: impl InteractionHandler + 'static) {
        let _ = self.handlers.insert(route.to_owned(), Arc::new(handler));
    }

    /// Handler for `route`.
    pub fn get(&self, route: &str) -> Option<Arc<dyn InteractionHandler>> {
        self.handlers.get(route).cloned()
    }

    /// All registered routes (sorted).
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes())
            .finish()
    }
}
