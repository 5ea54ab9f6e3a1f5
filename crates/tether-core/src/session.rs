//! Sessions: one multiplexed connection between two peers.
//!
//! A [`Session`] owns a framed transport through a single I/O task. That task
//! reads inbound frames and pushes them into per-stream inboxes, writes
//! outbound frames from a bounded queue, runs keepalive checks and reacts to
//! [`Session::close`]. Dispatch never awaits. Handlers run on their own
//! tasks, one per responder stream.
//!
//! Either peer can open streams: requester calls go through
//! [`Session::request_response`], [`Session::fire_and_forget`],
//! [`Session::request_stream`] and [`Session::request_channel`], and inbound
//! request frames are serviced by the session's [`RouteTable`].
//!
//! Whatever ends the I/O task (local close, remote close, transport error,
//! keepalive timeout) the session runs the same teardown exactly once: state
//! becomes CLOSED, every live stream is cancelled, outstanding requesters see
//! a disconnection and the on-disconnect hooks fire.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::errors::TetherError;
use crate::frame::{CodecError, Frame, FrameCodec, Interaction};
use crate::handler::{Inbound, InteractionHandler, PayloadStream, Reply, RouteTable, StreamContext};
use crate::ids::{ClientId, Role, StreamId};
use crate::multiplexer::{Side, StreamMultiplexer, StreamSignal};
use crate::security::{Authorizer, Principal};

/// Lifecycle state. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Built, I/O not started yet.
    Connecting,
    /// Serving streams.
    Open,
    /// Close requested; teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Session::close`] was called.
    Local,
    /// The remote closed the transport.
    RemoteClosed,
    /// The remote sent a connection-level error.
    RemoteError(String),
    /// Reading or writing the transport failed.
    Transport(String),
    /// The remote sent something that is not a valid frame here.
    Protocol(String),
    /// Nothing was received for longer than the max lifetime.
    KeepaliveTimeout,
}

impl CloseReason {
    /// Whether the session ended because something went wrong.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Local | Self::RemoteClosed)
    }

    /// Error handed to requesters still waiting when the session ended.
    pub fn to_error(&self) -> TetherError {
        match self {
            Self::Local | Self::RemoteClosed => TetherError::Disconnected,
            Self::RemoteError(m) | Self::Transport(m) => TetherError::Transport(m.clone()),
            Self::Protocol(m) => TetherError::Protocol(m.clone()),
            Self::KeepaliveTimeout => TetherError::Transport("keepalive timeout".into()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::RemoteClosed => f.write_str("closed by remote"),
            Self::RemoteError(m) => write!(f, "remote error: {m}"),
            Self::Transport(m) => write!(f, "transport error: {m}"),
            Self::Protocol(m) => write!(f, "protocol error: {m}"),
            Self::KeepaliveTimeout => f.write_str("keepalive timeout"),
        }
    }
}

/// Timing and queueing knobs for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How often keepalives are sent (client) or liveness is checked.
    pub keepalive_interval: Duration,
    /// Idle time after which the session is considered dead.
    pub max_lifetime: Duration,
    /// Capacity of the outbound frame queue.
    pub send_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(20),
            max_lifetime: Duration::from_secs(90),
            send_queue: 256,
        }
    }
}

/// Everything needed to start a session on an established transport.
pub struct SessionOptions {
    /// Session id (the client id).
    pub id: ClientId,
    /// Which end of the connection we are.
    pub role: Role,
    /// Principal negotiated at setup, if any.
    pub principal: Option<Principal>,
    /// Routes this peer answers.
    pub routes: RouteTable,
    /// Authorization applied to inbound streams.
    pub authorizer: Arc<dyn Authorizer>,
    /// Timing knobs.
    pub config: SessionConfig,
}

type DisconnectHook = Box<dyn FnOnce(&CloseReason) + Send>;

struct Inner {
    id: ClientId,
    role: Role,
    principal: Option<Arc<Principal>>,
    routes: RouteTable,
    authorizer: Arc<dyn Authorizer>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    streams: StreamMultiplexer,
    outbound: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    hooks: Mutex<Option<Vec<DisconnectHook>>>,
    close_reason: Mutex<Option<CloseReason>>,
    last_received: Mutex<Instant>,
    opened_at: Instant,
    dropped_frames: AtomicU64,
}

/// Handle to a multiplexed session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Start a session on a transport whose setup exchange already succeeded.
    pub fn start<T>(transport: Framed<T, FrameCodec>, options: SessionOptions) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let SessionOptions {
            id,
            role,
            principal,
            routes,
            authorizer,
            config,
        } = options;
        let (tx, rx) = mpsc::channel(config.send_queue.max(1));
        let now = Instant::now();

        let session = Self {
            inner: Arc::new(Inner {
                id,
                role,
                principal: principal.map(Arc::new),
                routes,
                authorizer,
                config,
                state: Mutex::new(SessionState::Connecting),
                streams: StreamMultiplexer::new(role),
                outbound: tx,
                shutdown: CancellationToken::new(),
                terminated: CancellationToken::new(),
                hooks: Mutex::new(Some(Vec::new())),
                close_reason: Mutex::new(None),
                last_received: Mutex::new(now),
                opened_at: now,
                dropped_frames: AtomicU64::new(0),
            }),
        };

        let span = info_span!("session", session_id = %session.id(), %role);
        *session.inner.state.lock() = SessionState::Open;
        drop(tokio::spawn(
            session.clone().run(transport, rx).instrument(span.clone()),
        ));
        span.in_scope(|| {
            info!(
                username = session.principal().map_or("anonymous", |p| p.username.as_str()),
                "session open"
            );
        });
        session
    }

    /// Session id.
    pub fn id(&self) -> &ClientId {
        &self.inner.id
    }

    /// Our end of the connection.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Principal bound at setup.
    pub fn principal(&self) -> Option<&Principal> {
        self.inner.principal.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Whether the session accepts new streams.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Why the session ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// Number of live streams, both directions.
    pub fn live_streams(&self) -> usize {
        self.inner.streams.live_count()
    }

    /// Frames dropped because the outbound queue or a stream inbox was full.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed) + self.inner.streams.dropped_elements()
    }

    /// Time since the session started.
    pub fn uptime(&self) -> Duration {
        self.inner.opened_at.elapsed()
    }

    /// Whether two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a hook run exactly once when the session ends.
    ///
    /// Runs immediately if the session has already ended.
    pub fn on_disconnect(&self, hook: impl FnOnce(&CloseReason) + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        if let Some(pending) = hooks.as_mut() {
            pending.push(Box::new(hook));
            return;
        }
        drop(hooks);
        let reason = self.close_reason().unwrap_or(CloseReason::Local);
        hook(&reason);
    }

    /// Request the session to close. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if matches!(*state, SessionState::Connecting | SessionState::Open) {
                *state = SessionState::Closing;
            }
        }
        self.inner.shutdown.cancel();
    }

    /// Resolves once teardown has finished.
    pub async fn closed(&self) {
        self.inner.terminated.cancelled().await;
    }

    /// Cancel a live stream. Idempotent; returns whether the stream was live.
    pub fn cancel_stream(&self, id: StreamId) -> bool {
        match self.inner.streams.cancel(id) {
            Some(Side::Requester) => {
                debug!(session_id = %self.id(), stream_id = %id, "cancelling stream");
                let _ = self.try_send_frame(Frame::Cancel { stream_id: id });
                true
            }
            Some(Side::Responder) => {
                let _ = self.try_send_frame(Frame::error(id, &TetherError::Cancelled));
                true
            }
            None => false,
        }
    }

    // ── Requester side ──────────────────────────────────────────────────

    /// Open a stream on the remote peer's `route`.
    pub async fn open_stream(
        &self,
        interaction: Interaction,
        route: &str,
        payload: Value,
    ) -> Result<StreamHandle, TetherError> {
        self.ensure_open()?;
        let token = self.inner.shutdown.child_token();
        let (id, rx) = self.inner.streams.allocate(route, token.clone());
        // close may have drained the table between the check and the insert
        if !self.is_open() {
            let _ = self.inner.streams.remove(id);
            return Err(TetherError::SessionNotOpen(self.state()));
        }

        let mut handle = StreamHandle {
            session: self.clone(),
            id,
            route: route.to_owned(),
            rx,
            cancelled: CancellationToken::new(),
            slot: token,
            done: false,
        };
        if !self.send_frame(interaction.request_frame(id, route, payload)).await {
            let _ = self.inner.streams.remove(id);
            handle.done = true;
            return Err(TetherError::Disconnected);
        }
        debug!(session_id = %self.id(), stream_id = %id, route, %interaction, "stream opened");
        Ok(handle)
    }

    /// Send one request and wait for its single response.
    ///
    /// A response completed without a payload yields `Value::Null`.
    pub async fn request_response(&self, route: &str, payload: Value) -> Result<Value, TetherError> {
        let mut stream = self
            .open_stream(Interaction::RequestResponse, route, payload)
            .await?;
        stream.next().await.unwrap_or(Ok(Value::Null))
    }

    /// Send one request and wait for the responder to acknowledge it.
    pub async fn fire_and_forget(&self, route: &str, payload: Value) -> Result<(), TetherError> {
        let mut stream = self
            .open_stream(Interaction::FireAndForget, route, payload)
            .await?;
        match stream.next().await {
            None => Ok(()),
            Some(Err(err)) => Err(err),
            Some(Ok(_)) => Err(TetherError::Protocol(
                "fire-and-forget stream produced a payload".into(),
            )),
        }
    }

    /// Send one request and receive a lazy sequence of responses.
    pub async fn request_stream(
        &self,
        route: &str,
        payload: Value,
    ) -> Result<StreamHandle, TetherError> {
        self.open_stream(Interaction::RequestStream, route, payload)
            .await
    }

    /// Stream `outbound` to the remote and receive a lazy sequence back.
    ///
    /// The first outbound element opens the channel; the rest follow as
    /// `NEXT` frames and a `COMPLETE` when `outbound` ends. Outbound
    /// forwarding stops when the channel is cancelled or the responder ends
    /// it.
    pub async fn request_channel<S>(&self, route: &str, outbound: S) -> Result<StreamHandle, TetherError>
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        let mut outbound = Box::pin(outbound);
        let first = outbound.next().await.ok_or_else(|| {
            TetherError::Protocol("a channel needs at least one outbound element".into())
        })?;
        let handle = self.open_stream(Interaction::Channel, route, first).await?;

        let session = self.clone();
        let id = handle.id;
        let cancelled = handle.cancelled.clone();
        let ended = handle.slot.clone();
        drop(tokio::spawn(
            async move {
                loop {
                    let item = tokio::select! {
                        biased;
                        () = cancelled.cancelled() => return,
                        () = ended.cancelled() => return,
                        item = outbound.next() => item,
                    };
                    let frame = match item {
                        Some(payload) => Frame::Next {
                            stream_id: id,
                            payload,
                            complete: false,
                        },
                        None => Frame::Complete { stream_id: id },
                    };
                    let last = matches!(frame, Frame::Complete { .. });
                    if !session.emit(id, frame).await || last {
                        return;
                    }
                }
            }
            .instrument(Span::current()),
        ));
        Ok(handle)
    }

    // ── I/O task ────────────────────────────────────────────────────────

    async fn run<T>(self, mut transport: Framed<T, FrameCodec>, mut outbound: mpsc::Receiver<Frame>)
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let period = self.inner.config.keepalive_interval;
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => break CloseReason::Local,
                frame = transport.next() => match frame {
                    Some(Ok(frame)) => {
                        *self.inner.last_received.lock() = Instant::now();
                        if let Some(reason) = self.handle_frame(frame) {
                            break reason;
                        }
                    }
                    Some(Err(CodecError::Json(e))) => break CloseReason::Protocol(e.to_string()),
                    Some(Err(CodecError::Io(e))) => break CloseReason::Transport(e.to_string()),
                    None => break CloseReason::RemoteClosed,
                },
                Some(frame) = outbound.recv() => {
                    if let Err(e) = transport.send(frame).await {
                        break CloseReason::Transport(e.to_string());
                    }
                }
                _ = keepalive.tick() => {
                    let idle = self.inner.last_received.lock().elapsed();
                    if idle >= self.inner.config.max_lifetime {
                        warn!(idle_ms = idle.as_millis(), "no traffic within max lifetime");
                        break CloseReason::KeepaliveTimeout;
                    }
                    if self.inner.role == Role::Client {
                        let _ = self.try_send_frame(Frame::Keepalive { respond: true });
                    }
                }
            }
        };

        if reason == CloseReason::Local {
            // flush what was queued before the close (cancels, final errors)
            while let Ok(frame) = outbound.try_recv() {
                if transport.feed(frame).await.is_err() {
                    break;
                }
            }
            let _ = transport.close().await;
        }
        self.finish(reason);
    }

    fn handle_frame(&self, frame: Frame) -> Option<CloseReason> {
        match frame {
            Frame::Setup(_) | Frame::SetupAck { .. } => {
                let kind = frame.kind();
                warn!(kind, "setup frame on an open session");
                Some(CloseReason::Protocol(format!("unexpected {kind} frame")))
            }
            Frame::Keepalive { respond } => {
                if respond {
                    let _ = self.try_send_frame(Frame::Keepalive { respond: false });
                }
                None
            }
            Frame::Next {
                stream_id,
                payload,
                complete,
            } => {
                self.dispatch(stream_id, StreamSignal::Next(payload));
                if complete {
                    self.dispatch(stream_id, StreamSignal::Complete);
                }
                None
            }
            Frame::Complete { stream_id } => {
                self.dispatch(stream_id, StreamSignal::Complete);
                None
            }
            Frame::Error {
                stream_id,
                code,
                message,
            } => {
                if stream_id.is_connection() {
                    warn!(?code, %message, "connection error from remote");
                    return Some(CloseReason::RemoteError(message));
                }
                let route = self.inner.streams.route_of(stream_id).unwrap_or_default();
                let err = TetherError::from_remote(code, message, &route);
                self.dispatch(stream_id, StreamSignal::Error(err));
                None
            }
            Frame::Cancel { stream_id } => {
                if self.inner.streams.cancel(stream_id).is_none() {
                    debug!(stream_id = %stream_id, "cancel for a stream that is not live");
                }
                None
            }
            request => {
                let (interaction, stream_id, route, payload) = request.into_request()?;
                self.accept_request(interaction, stream_id, route, payload)
            }
        }
    }

    fn dispatch(&self, id: StreamId, signal: StreamSignal) {
        if let Err(err) = self.inner.streams.dispatch(id, signal) {
            debug!(stream_id = %id, error = %err, "dropping frame");
        }
    }

    // ── Responder side ──────────────────────────────────────────────────

    /// Start a handler for an inbound request. An illegal stream id ends the session.
    fn accept_request(
        &self,
        interaction: Interaction,
        id: StreamId,
        route: String,
        payload: Value,
    ) -> Option<CloseReason> {
        if !self.is_open() {
            debug!(stream_id = %id, route, "ignoring request on a closing session");
            return None;
        }
        let token = self.inner.shutdown.child_token();
        let inbox = match self.inner.streams.accept(id, &route, token.clone()) {
            Ok(inbox) => inbox,
            Err(err) => {
                warn!(stream_id = %id, route, error = %err, "illegal request frame");
                return Some(CloseReason::Protocol(err.to_string()));
            }
        };
        let Some(handler) = self.inner.routes.get(&route) else {
            warn!(stream_id = %id, route, "no handler for route");
            let _ = self.inner.streams.remove(id);
            let _ = self.try_send_frame(Frame::error(id, &TetherError::UnknownRoute(route)));
            return None;
        };

        let ctx = StreamContext::new(
            self.inner.id.clone(),
            id,
            route,
            interaction,
            self.inner.principal.clone(),
            Arc::clone(&self.inner.authorizer),
            token,
        );
        let span = info_span!("stream", stream_id = %id, route = %ctx.route, %interaction);
        drop(tokio::spawn(
            self.clone()
                .respond(handler, ctx, payload, Inbound::new(inbox))
                .instrument(span),
        ));
        None
    }

    async fn respond(
        self,
        handler: Arc<dyn InteractionHandler>,
        ctx: StreamContext,
        initial: Value,
        inbound: Inbound,
    ) {
        let id = ctx.stream_id;
        let opened = tokio::select! {
            biased;
            () = ctx.cancelled() => {
                handler.on_cancel(&ctx);
                return;
            }
            result = handler.on_open(ctx.clone(), initial, inbound) => result,
        };

        let reply = match opened {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_denied() {
                    info!(username = ctx.username(), "request denied");
                } else {
                    warn!(error = %err, kind = err.error_kind(), "handler failed");
                }
                self.finish_stream(id, Frame::error(id, &err)).await;
                return;
            }
        };

        match (ctx.interaction, reply) {
            (Interaction::FireAndForget, _) | (_, Reply::Empty) => {
                self.finish_stream(id, Frame::Complete { stream_id: id })
                    .await;
            }
            (_, Reply::Single(payload)) => {
                self.finish_stream(
                    id,
                    Frame::Next {
                        stream_id: id,
                        payload,
                        complete: true,
                    },
                )
                .await;
            }
            (Interaction::RequestResponse, Reply::Many(mut items)) => {
                let first = tokio::select! {
                    biased;
                    () = ctx.cancelled() => {
                        handler.on_cancel(&ctx);
                        return;
                    }
                    item = items.next() => item,
                };
                let frame = match first {
                    Some(Ok(payload)) => Frame::Next {
                        stream_id: id,
                        payload,
                        complete: true,
                    },
                    Some(Err(err)) => Frame::error(id, &err),
                    None => Frame::Complete { stream_id: id },
                };
                self.finish_stream(id, frame).await;
            }
            (_, Reply::Many(items)) => self.pump(handler.as_ref(), &ctx, items).await,
        }
    }

    async fn pump(&self, handler: &dyn InteractionHandler, ctx: &StreamContext, mut items: PayloadStream) {
        let id = ctx.stream_id;
        loop {
            let item = tokio::select! {
                biased;
                () = ctx.cancelled() => {
                    handler.on_cancel(ctx);
                    return;
                }
                item = items.next() => item,
            };
            match item {
                Some(Ok(payload)) => {
                    let frame = Frame::Next {
                        stream_id: id,
                        payload,
                        complete: false,
                    };
                    if !self.emit(id, frame).await {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "stream producer failed");
                    self.finish_stream(id, Frame::error(id, &err)).await;
                    return;
                }
                None => {
                    self.finish_stream(id, Frame::Complete { stream_id: id })
                        .await;
                    return;
                }
            }
        }
    }

    // ── Outbound helpers ────────────────────────────────────────────────

    /// Send a non-terminal frame if the stream is still live.
    async fn emit(&self, id: StreamId, frame: Frame) -> bool {
        self.inner.streams.is_live(id) && self.send_frame(frame).await
    }

    /// Remove a stream and send its terminal frame, unless it was cancelled.
    async fn finish_stream(&self, id: StreamId, frame: Frame) {
        if self.inner.streams.remove(id) {
            let _ = self.send_frame(frame).await;
        }
    }

    async fn send_frame(&self, frame: Frame) -> bool {
        self.inner.outbound.send(frame).await.is_ok()
    }

    /// Queue a frame without waiting. Counts and logs frames that don't fit.
    fn try_send_frame(&self, frame: Frame) -> bool {
        let kind = frame.kind();
        if self.inner.outbound.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %self.id(), kind, "outbound queue unavailable, frame dropped");
            false
        }
    }

    fn ensure_open(&self) -> Result<(), TetherError> {
        match self.state() {
            SessionState::Open => Ok(()),
            other => Err(TetherError::SessionNotOpen(other)),
        }
    }

    fn finish(&self, reason: CloseReason) {
        *self.inner.state.lock() = SessionState::Closed;
        *self.inner.close_reason.lock() = Some(reason.clone());
        self.inner.shutdown.cancel();

        let drained = self.inner.streams.drain(&reason.to_error());
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelled live streams");
        }

        let hooks = self.inner.hooks.lock().take().unwrap_or_default();
        for hook in hooks {
            hook(&reason);
        }
        if reason.is_error() {
            warn!(%reason, "session closed");
        } else {
            info!(%reason, "session closed");
        }
        self.inner.terminated.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("streams", &self.inner.streams)
            .finish_non_exhaustive()
    }
}

/// Cancels a requester stream from outside the task consuming it.
#[derive(Clone, Debug)]
pub struct StreamCanceller {
    session: Session,
    id: StreamId,
    cancelled: CancellationToken,
}

impl StreamCanceller {
    /// Cancel the stream. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.cancel();
        let _ = self.session.cancel_stream(self.id);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Stream being controlled.
    pub fn stream_id(&self) -> StreamId {
        self.id
    }
}

/// Receiving end of a stream this peer opened.
///
/// Yields `Ok` for each element, one `Err` if the stream fails, then ends.
/// Dropping the handle before the stream ends cancels it. Once cancelled, no
/// further element is yielded, even ones that were already buffered.
pub struct StreamHandle {
    session: Session,
    id: StreamId,
    route: String,
    rx: mpsc::Receiver<StreamSignal>,
    cancelled: CancellationToken,
    // cancelled by the table when the stream ends for any reason
    slot: CancellationToken,
    done: bool,
}

impl StreamHandle {
    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Route the stream was opened on.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Cancel the stream. Idempotent.
    pub fn cancel(&mut self) {
        if !self.done {
            self.done = true;
            self.cancelled.cancel();
            let _ = self.session.cancel_stream(self.id);
        }
    }

    /// Detached canceller for this stream.
    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller {
            session: self.session.clone(),
            id: self.id,
            cancelled: self.cancelled.clone(),
        }
    }

    /// Whether the stream has ended or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.done || self.cancelled.is_cancelled()
    }
}

impl Stream for StreamHandle {
    type Item = Result<Value, TetherError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done || this.cancelled.is_cancelled() {
            this.done = true;
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamSignal::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(StreamSignal::Error(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(StreamSignal::Complete) | None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.done {
            self.cancelled.cancel();
            let _ = self.session.cancel_stream(self.id);
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
