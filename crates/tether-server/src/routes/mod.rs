//! The four interaction routes and their authorization table.
//!
//! Every handler calls [`StreamContext::authorize`](tether_core::StreamContext::authorize)
//! before it looks at the payload, so a principal without [`ROLE_USER`] gets
//! a denial on each route and the session stays usable.

mod channel;
mod fire_and_forget;
mod request_response;
mod request_stream;

use std::time::Duration;

use tether_core::{ROLE_USER, RoleAuthorizer, RouteTable, StreamContext};
use tracing::info;

pub use channel::ChannelHandler;
pub use fire_and_forget::FireAndForgetHandler;
pub use request_response::RequestResponseHandler;
pub use request_stream::RequestStreamHandler;

/// Route for one request, one reply.
pub const REQUEST_RESPONSE: &str = "request-response";
/// Route for fire-and-forget notifications.
pub const FIRE_AND_FORGET: &str = "fire-and-forget";
/// Route for the periodic reply stream.
pub const STREAM: &str = "stream";
/// Route for the counting channel.
pub const CHANNEL: &str = "channel";

/// Every interaction route.
pub const ALL: [&str; 4] = [REQUEST_RESPONSE, FIRE_AND_FORGET, STREAM, CHANNEL];

/// Route table with all four handlers.
pub fn route_table(stream_interval: Duration, channel_interval: Duration) -> RouteTable {
    let mut routes = RouteTable::new();
    routes.register(REQUEST_RESPONSE, RequestResponseHandler);
    routes.register(FIRE_AND_FORGET, FireAndForgetHandler);
    routes.register(STREAM, RequestStreamHandler::new(stream_interval));
    routes.register(CHANNEL, ChannelHandler::new(channel_interval));
    routes
}

/// Requires [`ROLE_USER`] on every interaction route.
pub fn authorizer() -> RoleAuthorizer {
    ALL.iter()
        .fold(RoleAuthorizer::new(), |auth, route| auth.require(*route, ROLE_USER))
}

/// Record who opened an interaction and with which roles.
fn log_initiated(interaction: &str, ctx: &StreamContext) {
    let user = ctx.username();
    let roles = ctx
        .principal()
        .map(|p| p.roles.iter().map(String::as_str).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    info!(
        session_id = %ctx.session_id,
        stream_id = %ctx.stream_id,
        username = user,
        roles = %roles,
        "{interaction} initiated by '{user}' in the role '{roles}'"
    );
}
