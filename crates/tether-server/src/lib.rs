//! # tether-server
//!
//! TCP server for the Tether protocol.
//!
//! - Setup handshake: [`AuthenticationNegotiator`] checks the setup route and
//!   verifies simple-auth credentials against an [`InMemoryCredentialVerifier`]
//! - Interaction routes (`request-response`, `fire-and-forget`, `stream`,
//!   `channel`), each requiring the `USER` role
//! - [`SessionRegistry`]: live sessions keyed by client id
//! - Server-to-client status callback after setup
//! - Graceful shutdown: [`ConnectionTracker`] drains connections after the
//!   registry closes every session

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod registry;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod users;

pub use auth::{AuthenticationNegotiator, Negotiated};
pub use config::ServerConfig;
pub use errors::ServerError;
pub use registry::SessionRegistry;
pub use server::{ServerHandle, TetherServer};
pub use shutdown::{ConnectionTracker, DrainReport};
pub use users::InMemoryCredentialVerifier;
