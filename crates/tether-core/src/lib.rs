//! # tether-core
//!
//! Protocol core for Tether, a session and stream-multiplexing notification
//! protocol.
//!
//! - [`Notification`]: the payload every interaction carries
//! - Wire frames and the length-prefixed JSON codec ([`frame`])
//! - [`Session`]: one framed connection carrying many concurrent streams,
//!   with keepalive, teardown and on-disconnect hooks
//! - [`StreamMultiplexer`]: the per-session live stream table
//! - [`InteractionHandler`] and [`RouteTable`]: the responder seam
//! - Principals, simple-auth credentials and route authorization ([`security`])
//! - [`SwitchLatest`]: run only the most recent producer

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod handler;
pub mod ids;
pub mod multiplexer;
pub mod notification;
pub mod security;
pub mod session;
pub mod switch;

pub use errors::{ErrorCode, TetherError};
pub use frame::{Frame, FrameCodec, Interaction, SetupPayload};
pub use handler::{Inbound, InteractionHandler, PayloadStream, Reply, RouteTable, StreamContext};
pub use ids::{ClientId, ConnectionId, Role, StreamId};
pub use multiplexer::{DEFAULT_INBOX_CAPACITY, StreamMultiplexer, StreamSignal};
pub use notification::Notification;
pub use security::{
    Authorizer, CredentialMetadata, CredentialVerifier, Principal, ROLE_USER, RoleAuthorizer,
    UsernamePassword,
};
pub use session::{
    CloseReason, Session, SessionConfig, SessionOptions, SessionState, StreamCanceller,
    StreamHandle,
};
pub use switch::{SwitchLatest, ticker};
