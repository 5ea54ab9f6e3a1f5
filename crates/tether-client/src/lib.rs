//! # tether-client
//!
//! Client side of the Tether protocol.
//!
//! - [`ConnectionManager`]: connect with simple-auth credentials, invoke the
//!   four interaction models, one active cancellable subscription
//! - `client-status` responder answering the server's callback
//! - Interactive [`Shell`] mapping commands onto the manager

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod shell;
pub mod status;

pub use config::ClientConfig;
pub use connection::ConnectionManager;
pub use errors::{ClientError, ShellParseError};
pub use shell::{Flow, Shell, ShellCommand, run_shell};
pub use status::{STATUS_ROUTE, StatusHandler};
