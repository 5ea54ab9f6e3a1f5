//! Branded identifiers and stream id allocation.
//!
//! String identifiers use the branded newtype pattern so a client id can't be
//! passed where a connection id is expected. Stream ids are small integers
//! scoped to one session; each peer allocates from its own parity so both
//! sides can open streams without coordinating.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new time-ordered identifier.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing identifier without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Client-supplied identifier carried in the setup frame. Doubles as the
    /// session id on the server.
    ClientId,
    "client"
);
branded_id!(
    /// Server-side identifier for an accepted transport connection, used for
    /// log correlation before the client id is known.
    ConnectionId,
    "conn"
);

/// Identifier of one logical stream within a session.
///
/// Id `0` is reserved for connection-level frames (setup, keepalive,
/// connection errors).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection-level stream.
    pub const CONNECTION: Self = Self(0);

    /// Wrap a raw stream id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the connection-level stream.
    pub const fn is_connection(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of the connection a peer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The peer that dialed the connection. Allocates odd stream ids.
    Client,
    /// The peer that accepted the connection. Allocates even stream ids.
    Server,
}

impl Role {
    /// The opposite role.
    pub const fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }

    /// Whether `id` belongs to the id space this role allocates from.
    pub const fn allocates(self, id: StreamId) -> bool {
        if id.is_connection() {
            return false;
        }
        match self {
            Self::Client => id.0 % 2 == 1,
            Self::Server => id.0 % 2 == 0,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Monotonic stream id allocator for one side of a session.
///
/// Ids advance by two and are never reused while the allocator lives.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    /// Create an allocator for the given role.
    pub fn new(role: Role) -> Self {
        let first = match role {
            Role::Client => 1,
            Role::Server => 2,
        };
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> StreamId {
        StreamId(self.next.fetch_add(2, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_has_prefix() {
        let id = ClientId::new();
        assert!(id.as_str().starts_with("client_"), "got: {id}");
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn from_raw_keeps_value() {
        let id = ClientId::from_raw("9b1c0e6e");
        assert_eq!(id.as_str(), "9b1c0e6e");
        assert_eq!(id.to_string(), "9b1c0e6e");
    }

    #[test]
    fn client_id_serde_is_transparent() {
        let id = ClientId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn client_allocator_is_odd_and_monotonic() {
        let alloc = StreamIdAllocator::new(Role::Client);
        let ids: Vec<u32> = (0..4).map(|_| alloc.next_id().get()).collect();
        assert_eq!(ids, vec![1, 3, 5, 7]);
    }

    #[test]
    fn server_allocator_is_even() {
        let alloc = StreamIdAllocator::new(Role::Server);
        assert_eq!(alloc.next_id(), StreamId::new(2));
        assert_eq!(alloc.next_id(), StreamId::new(4));
    }

    #[test]
    fn role_parity() {
        assert!(Role::Client.allocates(StreamId::new(1)));
        assert!(!Role::Client.allocates(StreamId::new(2)));
        assert!(Role::Server.allocates(StreamId::new(2)));
        assert!(!Role::Server.allocates(StreamId::CONNECTION));
        assert_eq!(Role::Client.peer(), Role::Server);
    }

    #[test]
    fn stream_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&StreamId::new(7)).unwrap(), "7");
    }
}
