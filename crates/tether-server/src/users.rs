//! In-memory credential store.
//!
//! Passwords are kept as lowercase hex SHA-256 digests, never in clear.

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tether_core::{CredentialVerifier, Principal, TetherError};
use tether_settings::UserEntry;
use tracing::debug;

struct StoredUser {
    password_sha256: String,
    roles: Vec<String>,
}

/// Verifies username/password pairs against a fixed user table.
#[derive(Default)]
pub struct InMemoryCredentialVerifier {
    users: HashMap<String, StoredUser>,
}

impl InMemoryCredentialVerifier {
    /// Empty table; every verification fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table built from settings entries.
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut verifier = Self::new();
        for entry in entries {
            verifier.insert_digest(&entry.username, &entry.password_sha256, entry.roles.clone());
        }
        verifier
    }

    /// Add (or replace) a user given a clear-text password.
    pub fn insert(&mut self, username: &str, password: &str, roles: Vec<String>) {
        self.insert_digest(username, &sha256_hex(password), roles);
    }

    fn insert_digest(&mut self, username: &str, digest: &str, roles: Vec<String>) {
        let _ = self.users.insert(
            username.to_owned(),
            StoredUser {
                password_sha256: digest.to_ascii_lowercase(),
                roles,
            },
        );
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentialVerifier {
    async fn verify(&self, username: &str, password: &SecretString) -> Result<Principal, TetherError> {
        let digest = sha256_hex(password.expose_secret());
        match self.users.get(username) {
            Some(user) if constant_time_eq(user.password_sha256.as_bytes(), digest.as_bytes()) => {
                Ok(Principal::new(username, user.roles.iter().cloned()))
            }
            Some(_) => {
                debug!(username, "password mismatch");
                Err(TetherError::Authentication("bad credentials".into()))
            }
            None => {
                debug!(username, "unknown user");
                Err(TetherError::Authentication("bad credentials".into()))
            }
        }
    }
}

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_settings::ServerSettings;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn digest_of_known_value() {
        assert_eq!(
            sha256_hex("pass"),
            "d74ff0ee8da3b9806b18c877dbf29bbde50b5bd8e4dad7a3a725000feb82e8f1"
        );
    }

    #[tokio::test]
    async fn default_accounts_verify() {
        let verifier = InMemoryCredentialVerifier::from_entries(&ServerSettings::default().users);
        assert_eq!(verifier.len(), 2);

        let user = verifier.verify("user", &secret("pass")).await.unwrap();
        assert!(user.has_role("USER"));

        let test = verifier.verify("test", &secret("pass")).await.unwrap();
        assert!(!test.has_role("USER"));
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let mut verifier = InMemoryCredentialVerifier::new();
        verifier.insert("user", "pass", vec!["USER".into()]);
        let err = verifier.verify("user", &secret("nope")).await.unwrap_err();
        assert!(matches!(err, TetherError::Authentication(_)));
    }

    #[tokio::test]
    async fn unknown_user_fails_like_wrong_password() {
        let verifier = InMemoryCredentialVerifier::new();
        let err = verifier.verify("ghost", &secret("pass")).await.unwrap_err();
        assert_eq!(err, TetherError::Authentication("bad credentials".into()));
    }

    proptest::proptest! {
        #[test]
        fn digest_is_lowercase_hex(input in ".*") {
            let digest = sha256_hex(&input);
            proptest::prop_assert_eq!(digest.len(), 64);
            proptest::prop_assert!(digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }

        #[test]
        fn only_the_stored_password_verifies(password in "[ -~]{1,32}", other in "[ -~]{1,32}") {
            let mut verifier = InMemoryCredentialVerifier::new();
            verifier.insert("user", &password, vec![]);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            proptest::prop_assert!(rt.block_on(verifier.verify("user", &secret(&password))).is_ok());
            if other != password {
                proptest::prop_assert!(rt.block_on(verifier.verify("user", &secret(&other))).is_err());
            }
        }
    }

    #[test]
    fn uppercase_digest_is_normalized() {
        let entry = UserEntry {
            username: "ops".into(),
            password_sha256: sha256_hex("pw").to_uppercase(),
            roles: vec![],
        };
        let verifier = InMemoryCredentialVerifier::from_entries(&[entry]);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(rt.block_on(verifier.verify("ops", &secret("pw"))).is_ok());
    }
}
