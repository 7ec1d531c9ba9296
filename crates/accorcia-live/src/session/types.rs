//! Session types.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use accorcia_core::config::SessionSettings;

const DEFAULT_AVATAR: &str =
    "https://www.gravatar.com/avatar/36549f39abeae93ba58e4ed6abf46d91?s=32&d=mp";

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime assumed when the credential's expiry claim cannot be decoded.
    pub default_expiry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::from_secs(3600),
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            default_expiry: Duration::from_secs(settings.default_expiry_secs),
        }
    }
}

/// Successful login payload returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(alias = "username")]
    pub subject: String,
    #[serde(rename = "type", default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Opaque bearer credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Stored credential.
#[derive(Debug, Clone)]
pub(crate) struct Credential {
    pub token: BearerToken,
    pub subject: Option<String>,
}

/// Derived view of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub authenticated: bool,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl Session {
    /// Gravatar URL for the account email, or the generic avatar.
    pub fn avatar_url(&self) -> String {
        match &self.email {
            Some(email) if !email.trim().is_empty() => {
                let normalized = email.trim().to_lowercase();
                let hash = Sha256::digest(normalized.as_bytes());
                format!("https://www.gravatar.com/avatar/{hash:x}?d=identicon")
            }
            _ => DEFAULT_AVATAR.to_string(),
        }
    }
}

/// Value published on the authentication-state stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub session: Session,
    /// Incremented on every login; lets observers tell a fresh login from a
    /// stale one even if an intermediate logout was coalesced away.
    pub generation: u64,
    pub token: Option<BearerToken>,
}

impl AuthState {
    pub const fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn login_response_accepts_backend_field_names() {
        let resp: LoginResponse =
            serde_json::from_str(r#"{"token":"t","type":"Bearer","username":"alice"}"#).unwrap();
        assert_eq!(resp.subject, "alice");
        assert_eq!(resp.token_type, "Bearer");

        let resp: LoginResponse = serde_json::from_str(r#"{"token":"t","subject":"bob"}"#).unwrap();
        assert_eq!(resp.subject, "bob");
        assert_eq!(resp.token_type, "Bearer");
    }

    #[test]
    fn bearer_token_debug_is_redacted() {
        let token = BearerToken::new("secret-value");
        assert!(!format!("{token:?}").contains("secret-value"));
        assert_eq!(token.header_value(), "Bearer secret-value");
    }

    #[test]
    fn avatar_uses_normalized_email_hash() {
        let a = Session {
            email: Some("  Alice@Example.com ".into()),
            ..Default::default()
        };
        let b = Session {
            email: Some("alice@example.com".into()),
            ..Default::default()
        };
        assert_eq!(a.avatar_url(), b.avatar_url());
        assert!(a.avatar_url().ends_with("?d=identicon"));
    }

    #[test]
    fn avatar_falls_back_without_email() {
        assert_eq!(
            Session::default().avatar_url(),
            "https://www.gravatar.com/avatar/36549f39abeae93ba58e4ed6abf46d91?s=32&d=mp"
        );
    }
}
