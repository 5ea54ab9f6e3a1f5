//! `TetherServer`: TCP accept loop, setup handshake and session lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tether_core::{
    Authorizer, ConnectionId, CredentialVerifier, Frame, FrameCodec, Role, RouteTable, Session,
    SessionOptions, StreamId, TetherError,
};
use tether_settings::ServerSettings;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::AuthenticationNegotiator;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::registry::SessionRegistry;
use crate::routes;
use crate::shutdown::ConnectionTracker;
use crate::users::InMemoryCredentialVerifier;

/// State shared by every connection task.
struct Shared {
    config: ServerConfig,
    negotiator: AuthenticationNegotiator,
    routes: RouteTable,
    authorizer: Arc<dyn Authorizer>,
    registry: Arc<SessionRegistry>,
}

/// The Tether server, before it is bound.
pub struct TetherServer {
    shared: Arc<Shared>,
}

impl TetherServer {
    /// Server with the standard routes, verifying setups with `verifier`.
    pub fn new(config: ServerConfig, verifier: Arc<dyn CredentialVerifier>) -> Self {
        let negotiator = AuthenticationNegotiator::new(config.setup_route.clone(), verifier);
        let routes = routes::route_table(config.stream_interval, config.channel_interval);
        Self {
            shared: Arc::new(Shared {
                config,
                negotiator,
                routes,
                authorizer: Arc::new(routes::authorizer()),
                registry: Arc::new(SessionRegistry::new()),
            }),
        }
    }

    /// Server configured from settings, with the settings' user table.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let verifier = InMemoryCredentialVerifier::from_entries(&settings.users);
        Self::new(ServerConfig::from_settings(settings), Arc::new(verifier))
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    /// Bind the listener and start accepting connections.
    pub async fn bind(self) -> Result<ServerHandle, ServerError> {
        let addr = self.shared.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "server listening");

        let tracker = Arc::new(ConnectionTracker::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            Arc::clone(&tracker),
        ));

        Ok(ServerHandle {
            local_addr,
            shared: self.shared,
            tracker,
            accept_task,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    tracker: Arc<ConnectionTracker>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    /// Connection tasks still running.
    pub fn connections(&self) -> usize {
        self.tracker.running()
    }

    /// Stop accepting, close every session and wait for the connections to
    /// wind down, aborting those still open after the shutdown timeout.
    pub async fn shutdown(self) {
        info!("Detaching all remaining clients...");
        self.tracker.stop_accepting();
        let sessions = self.shared.registry.broadcast_shutdown();
        let report = self
            .tracker
            .drain(sessions, Some(self.accept_task), self.shared.config.shutdown_timeout)
            .await;
        info!(
            sessions = report.sessions,
            aborted = report.aborted,
            "Shutting down."
        );
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    tracker: Arc<ConnectionTracker>,
) {
    let token = tracker.token();
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let connection_id = ConnectionId::new();
                let span = info_span!("connection", %connection_id, %peer);
                tracker.track(tokio::spawn(
                    handle_connection(stream, Arc::clone(&shared), token.clone()).instrument(span),
                ));
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>, token: CancellationToken) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "set_nodelay failed");
    }
    let mut framed = Framed::new(stream, FrameCodec::new(shared.config.max_frame_length));

    let first = tokio::select! {
        () = token.cancelled() => return,
        first = tokio::time::timeout(shared.config.setup_timeout, framed.next()) => first,
    };
    let setup = match first {
        Err(_) => {
            warn!("no setup frame before deadline");
            return;
        }
        Ok(None) => {
            debug!("connection closed before setup");
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "unreadable setup frame");
            return;
        }
        Ok(Some(Ok(Frame::Setup(setup)))) => setup,
        Ok(Some(Ok(other))) => {
            let err = TetherError::InvalidSetup(format!("expected SETUP, got {}", other.kind()));
            reject(framed, &err).await;
            return;
        }
    };

    let negotiated = match shared.negotiator.negotiate(&setup).await {
        Ok(negotiated) => negotiated,
        Err(err) => {
            warn!(client_id = %setup.data, error = %err, "setup rejected");
            reject(framed, &err).await;
            return;
        }
    };
    let client_id = negotiated.client_id.clone();
    if shared.registry.is_closing() {
        reject(framed, &ServerError::ShuttingDown.to_setup_error()).await;
        return;
    }
    if shared.registry.contains(&client_id) {
        let err = ServerError::DuplicateSession(client_id.clone());
        warn!(%client_id, "duplicate client id");
        reject(framed, &err.to_setup_error()).await;
        return;
    }

    let ack = Frame::SetupAck {
        session_id: client_id.to_string(),
    };
    if let Err(err) = framed.send(ack).await {
        warn!(%client_id, error = %err, "failed to acknowledge setup");
        return;
    }

    let mut session_config = shared.config.session.clone();
    if let Some(interval) = negotiated.keepalive_interval {
        session_config.keepalive_interval = interval;
    }
    if let Some(lifetime) = negotiated.max_lifetime {
        session_config.max_lifetime = lifetime;
    }
    let session = Session::start(
        framed,
        SessionOptions {
            id: client_id.clone(),
            role: Role::Server,
            principal: Some(negotiated.principal),
            routes: shared.routes.clone(),
            authorizer: Arc::clone(&shared.authorizer),
            config: session_config,
        },
    );

    if let Err(err) = shared.registry.register(session.clone()) {
        warn!(%client_id, error = %err, "session not registered");
        session.close();
        session.closed().await;
        return;
    }
    let registry = Arc::clone(&shared.registry);
    let registered = session.clone();
    session.on_disconnect(move |reason| {
        let id = registered.id();
        if reason.is_error() {
            info!(client_id = %id, %reason, "Channel to client {id} CLOSED");
        }
        let _ = registry.unregister(&registered);
        info!(client_id = %id, "Client {id} DISCONNECTED");
    });
    info!(%client_id, "Client: {client_id} CONNECTED.");

    if let Some(route) = shared.config.status_route.clone() {
        drop(tokio::spawn(
            watch_client_status(session.clone(), route).in_current_span(),
        ));
    }

    session.closed().await;
}

/// Send a setup rejection on the connection stream and close the transport.
async fn reject(mut framed: Framed<TcpStream, FrameCodec>, err: &TetherError) {
    if let Err(send_err) = framed.send(Frame::error(StreamId::CONNECTION, err)).await {
        debug!(error = %send_err, "failed to send setup rejection");
    }
    if let Err(close_err) = framed.close().await {
        debug!(error = %close_err, "failed to close rejected connection");
    }
}

/// Ask the client for periodic status reports and log each one.
async fn watch_client_status(session: Session, route: String) {
    let client_id = session.id().clone();
    let mut reports = match session.request_stream(&route, Value::from("OPEN")).await {
        Ok(reports) => reports,
        Err(err) => {
            debug!(%client_id, error = %err, "status callback not started");
            return;
        }
    };
    while let Some(report) = reports.next().await {
        match report {
            Ok(report) => info!(%client_id, "Client: {client_id} status: {report}"),
            Err(err) => {
                debug!(%client_id, error = %err, "status callback ended");
                break;
            }
        }
    }
}
