//! Setup-time authentication.
//!
//! The negotiator checks the setup route, extracts the client id and
//! verifies the simple-auth credentials. It does no I/O of its own beyond
//! the call into the [`CredentialVerifier`].

use std::sync::Arc;
use std::time::Duration;

use tether_core::{ClientId, CredentialVerifier, Principal, SetupPayload, TetherError};
use tracing::{debug, instrument};

/// Outcome of a successful setup.
#[derive(Clone, Debug)]
pub struct Negotiated {
    /// Client-supplied id; becomes the session id.
    pub client_id: ClientId,
    /// Verified principal bound to the session.
    pub principal: Principal,
    /// Keepalive interval the client announced, if any.
    pub keepalive_interval: Option<Duration>,
    /// Max lifetime the client announced, if any.
    pub max_lifetime: Option<Duration>,
}

/// Validates setup frames and binds a principal.
pub struct AuthenticationNegotiator {
    setup_route: String,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AuthenticationNegotiator {
    /// Accept setups on `setup_route`, verifying credentials with `verifier`.
    pub fn new(setup_route: impl Into<String>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            setup_route: setup_route.into(),
            verifier,
        }
    }

    /// Route a setup must name.
    pub fn setup_route(&self) -> &str {
        &self.setup_route
    }

    /// Validate a setup.
    ///
    /// Fails with [`TetherError::InvalidSetup`] for a wrong route or missing
    /// client id and with [`TetherError::Authentication`] for missing or bad
    /// credentials.
    #[instrument(skip_all, fields(route = %setup.route, client_id = %setup.data))]
    pub async fn negotiate(&self, setup: &SetupPayload) -> Result<Negotiated, TetherError> {
        if setup.route != self.setup_route {
            return Err(TetherError::InvalidSetup(format!(
                "unsupported setup route '{}'",
                setup.route
            )));
        }
        let client_id = setup.data.trim();
        if client_id.is_empty() {
            return Err(TetherError::InvalidSetup("missing client id".into()));
        }
        let metadata = setup
            .metadata
            .as_ref()
            .ok_or_else(|| TetherError::Authentication("missing credentials".into()))?;
        let credentials = metadata.decode_simple()?;

        let principal = self
            .verifier
            .verify(credentials.username(), credentials.password())
            .await?;
        debug!(username = %principal.username, "credentials verified");

        let millis = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Ok(Negotiated {
            client_id: ClientId::from_raw(client_id),
            principal,
            keepalive_interval: millis(setup.keepalive_interval_ms),
            max_lifetime: millis(setup.max_lifetime_ms),
        })
    }
}
