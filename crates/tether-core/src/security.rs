//! Principals, credential metadata and the verifier/authorizer seams.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::TetherError;

/// Mime type for simple username/password authentication metadata.
pub const SIMPLE_AUTH_MIME_TYPE: &str = "message/x.rsocket.authentication.v0";

/// Auth type byte for the simple (username/password) scheme.
const SIMPLE_AUTH_TYPE: u8 = 0x01;

/// Role required by the interaction routes.
pub const ROLE_USER: &str = "USER";

/// Authenticated identity bound to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account name.
    pub username: String,
    /// Granted roles.
    pub roles: BTreeSet<String>,
}

impl Principal {
    /// Build a principal from a username and roles.
    pub fn new<I, S>(username: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            username: username.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the principal holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.username, self.roles)
    }
}

/// Username and password pair.
pub struct UsernamePassword {
    username: String,
    password: SecretString,
}

impl fmt::Debug for UsernamePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernamePassword")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl UsernamePassword {
    /// Pair a username with a password.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password, still wrapped.
    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Simple-auth encoding: type byte, u16 BE username length, username, password.
    pub fn encode(&self) -> Result<Vec<u8>, TetherError> {
        let name = self.username.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| TetherError::Authentication("username too long".into()))?;
        let password = self.password.expose_secret().as_bytes();

        let mut out = Vec::with_capacity(3 + name.len() + password.len());
        out.push(SIMPLE_AUTH_TYPE);
        out.extend_from_slice(&name_len.to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(password);
        Ok(out)
    }

    /// Decode the simple-auth encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, TetherError> {
        let malformed = |what: &str| TetherError::Authentication(format!("malformed credentials: {what}"));

        let (&auth_type, rest) = bytes.split_first().ok_or_else(|| malformed("empty"))?;
        if auth_type != SIMPLE_AUTH_TYPE {
            return Err(malformed("unsupported auth type"));
        }
        if rest.len() < 2 {
            return Err(malformed("missing username length"));
        }
        let name_len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        let rest = &rest[2..];
        if rest.len() < name_len {
            return Err(malformed("truncated username"));
        }
        let (name, password) = rest.split_at(name_len);
        let username = std::str::from_utf8(name).map_err(|_| malformed("username not utf-8"))?;
        let password = std::str::from_utf8(password).map_err(|_| malformed("password not utf-8"))?;

        Ok(Self::new(username, SecretString::from(password.to_owned())))
    }
}

/// Credential metadata carried in the setup frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    /// Encoding of `credentials`.
    pub mime_type: String,
    /// Base64 of the encoded credentials.
    pub credentials: String,
}

impl CredentialMetadata {
    /// Encode a username/password pair as simple-auth metadata.
    pub fn simple(credentials: &UsernamePassword) -> Result<Self, TetherError> {
        Ok(Self {
            mime_type: SIMPLE_AUTH_MIME_TYPE.to_owned(),
            credentials: STANDARD.encode(credentials.encode()?),
        })
    }

    /// Decode simple-auth metadata.
    pub fn decode_simple(&self) -> Result<UsernamePassword, TetherError> {
        if self.mime_type != SIMPLE_AUTH_MIME_TYPE {
            return Err(TetherError::Authentication(format!(
                "unsupported credential mime type '{}'",
                self.mime_type
            )));
        }
        let raw = STANDARD
            .decode(&self.credentials)
            .map_err(|e| TetherError::Authentication(format!("malformed credentials: {e}")))?;
        UsernamePassword::decode(&raw)
    }
}

/// Checks a username/password and produces the principal it belongs to.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify the credential. Fails with [`TetherError::Authentication`].
    async fn verify(&self, username: &str, password: &SecretString) -> Result<Principal, TetherError>;
}

/// Decides whether a principal may use a route.
pub trait Authorizer: Send + Sync {
    /// `principal` is `None` on sessions that were never authenticated.
    fn authorize(&self, principal: Option<&Principal>, route: &str) -> bool;
}

/// Route to required-role table. Routes without an entry are open.
#[derive(Clone, Debug, Default)]
pub struct RoleAuthorizer {
    required: HashMap<String, String>,
}

impl RoleAuthorizer {
    /// Table with no requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `role` for `route`.
    #[must_use]
    pub fn require(mut self, route: impl Into<String>, role: impl Into<String>) -> Self {
        let _ = self.required.insert(route.into(), role.into());
        self
    }

    /// Role required for `route`, if any.
    pub fn required_role(&self, route: &str) -> Option<&str> {
        self.required.get(route).map(String::as_str)
    }
}

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, principal: Option<&Principal>, route: &str) -> bool {
        match self.required_role(route) {
            None => true,
            Some(role) => principal.is_some_and(|p| p.has_role(role)),
        }
    }
}
