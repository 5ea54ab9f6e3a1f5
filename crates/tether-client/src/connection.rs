//! Client-side connection manager.
//!
//! Holds at most one session and at most one active stream or channel
//! subscription. Connecting again disposes the previous session first.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::Value;
use tether_core::{
    ClientId, CredentialMetadata, Frame, FrameCodec, Role, RoleAuthorizer, RouteTable, Session,
    SessionOptions, SetupPayload, StreamCanceller, StreamHandle, TetherError, UsernamePassword,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::status::{STATUS_ROUTE, StatusHandler};

/// Upper bound on waiting for a closed session to finish teardown.
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the client's session and its active subscription.
pub struct ConnectionManager {
    config: ClientConfig,
    client_id: ClientId,
    session: Arc<Mutex<Option<Session>>>,
    active: Mutex<Option<StreamCanceller>>,
}

impl ConnectionManager {
    /// Manager with a freshly generated client id.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_client_id(config, ClientId::new())
    }

    /// Manager announcing `client_id` at setup.
    pub fn with_client_id(config: ClientConfig, client_id: ClientId) -> Self {
        Self {
            config,
            client_id,
            session: Arc::new(Mutex::new(None)),
            active: Mutex::new(None),
        }
    }

    /// Id announced in the setup frame.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    /// Whether an open session exists.
    pub fn is_connected(&self) -> bool {
        self.session.lock().as_ref().is_some_and(Session::is_open)
    }

    /// Connect and authenticate, replacing any existing session.
    ///
    /// Fails with [`ClientError::Connection`] if the transport cannot be
    /// established in time, or with the server's setup rejection.
    #[instrument(skip(self, password), fields(client_id = %self.client_id))]
    pub async fn connect(
        &self,
        username: &str,
        password: SecretString,
        host: &str,
        port: u16,
    ) -> Result<Session, ClientError> {
        let _ = self.dispose().await;
        info!(
            "Connecting using client ID: {} and username: {username}",
            self.client_id
        );

        let credentials = UsernamePassword::new(username, password);
        let setup = SetupPayload {
            route: self.config.setup_route.clone(),
            data: self.client_id.to_string(),
            metadata: Some(CredentialMetadata::simple(&credentials)?),
            keepalive_interval_ms: millis(self.config.session.keepalive_interval),
            max_lifetime_ms: millis(self.config.session.max_lifetime),
        };

        let framed = timeout(self.config.connect_timeout, self.handshake(host, port, setup))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "no setup acknowledgement from {host}:{port} within {:?}",
                    self.config.connect_timeout
                ))
            })??;

        let mut routes = RouteTable::new();
        routes.register(
            STATUS_ROUTE,
            StatusHandler::new(self.config.status_interval, Arc::clone(&self.session)),
        );
        let session = Session::start(
            framed,
            SessionOptions {
                id: self.client_id.clone(),
                role: Role::Client,
                principal: None,
                routes,
                authorizer: Arc::new(RoleAuthorizer::new()),
                config: self.config.session.clone(),
            },
        );

        *self.session.lock() = Some(session.clone());
        let slot = Arc::clone(&self.session);
        let watched = session.clone();
        session.on_disconnect(move |reason| {
            if reason.is_error() {
                warn!(%reason, "Connection CLOSED");
            }
            let mut current = slot.lock();
            if current.as_ref().is_some_and(|s| s.ptr_eq(&watched)) {
                *current = None;
            }
            drop(current);
            info!("Client DISCONNECTED");
        });
        Ok(session)
    }

    async fn handshake(
        &self,
        host: &str,
        port: u16,
        setup: SetupPayload,
    ) -> Result<Framed<TcpStream, FrameCodec>, ClientError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ClientError::Connection(format!("{host}:{port}: {e}")))?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "set_nodelay failed");
        }
        let mut framed = Framed::new(stream, FrameCodec::new(self.config.max_frame_length));
        framed
            .send(Frame::Setup(setup))
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        match framed.next().await {
            Some(Ok(Frame::SetupAck { session_id })) => {
                debug!(%session_id, "setup acknowledged");
                Ok(framed)
            }
            Some(Ok(Frame::Error { code, message, .. })) => {
                Err(TetherError::from_remote(code, message, &self.config.setup_route).into())
            }
            Some(Ok(other)) => Err(TetherError::Protocol(format!(
                "expected SETUP_ACK, got {}",
                other.kind()
            ))
            .into()),
            Some(Err(err)) => Err(ClientError::Connection(err.to_string())),
            None => Err(ClientError::Connection(
                "server closed the connection during setup".into(),
            )),
        }
    }

    fn require_session(&self) -> Result<Session, ClientError> {
        self.session()
            .filter(Session::is_open)
            .ok_or(ClientError::NotConnected)
    }

    /// Request-response on `route`.
    pub async fn invoke(&self, route: &str, payload: Value) -> Result<Value, ClientError> {
        let session = self.require_session()?;
        Ok(session.request_response(route, payload).await?)
    }

    /// Fire-and-forget on `route`; resolves once the server acknowledged it.
    pub async fn invoke_fire_and_forget(&self, route: &str, payload: Value) -> Result<(), ClientError> {
        let session = self.require_session()?;
        Ok(session.fire_and_forget(route, payload).await?)
    }

    /// Request-stream on `route`. Becomes the active subscription.
    pub async fn invoke_stream(&self, route: &str, payload: Value) -> Result<StreamHandle, ClientError> {
        let session = self.require_session()?;
        let handle = session.request_stream(route, payload).await?;
        self.replace_active(handle.canceller());
        Ok(handle)
    }

    /// Channel on `route`. Becomes the active subscription.
    pub async fn invoke_channel<S>(&self, route: &str, outbound: S) -> Result<StreamHandle, ClientError>
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        let session = self.require_session()?;
        let handle = session.request_channel(route, outbound).await?;
        self.replace_active(handle.canceller());
        Ok(handle)
    }

    fn replace_active(&self, canceller: StreamCanceller) {
        if let Some(previous) = self.active.lock().replace(canceller) {
            debug!(stream_id = %previous.stream_id(), "replacing active subscription");
            previous.cancel();
        }
    }

    /// Cancel the active stream or channel. Returns whether one was live.
    pub fn cancel_active(&self) -> bool {
        match self.active.lock().take() {
            Some(canceller) if !canceller.is_cancelled() => {
                canceller.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether a stream or channel subscription is active.
    pub fn has_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|c| !c.is_cancelled())
    }

    /// Cancel the active subscription and close the session.
    ///
    /// Returns whether a session was open.
    pub async fn dispose(&self) -> bool {
        let _ = self.cancel_active();
        let Some(session) = self.session.lock().take() else {
            return false;
        };
        session.close();
        if timeout(DISPOSE_TIMEOUT, session.closed()).await.is_err() {
            warn!(session_id = %session.id(), "session teardown timed out");
        }
        true
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
