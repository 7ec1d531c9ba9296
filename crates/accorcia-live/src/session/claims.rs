//! Credential claim decoding.
//!
//! Only the payload segment of the bearer token is inspected; the signature is
//! the backend's concern. The decoded expiry drives the local logout timer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Claims carried in the credential payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration (NumericDate: unix seconds, possibly fractional).
    pub exp: f64,
    /// Subject (username).
    #[serde(default)]
    pub sub: Option<String>,
    /// Account email, used for the avatar.
    #[serde(default)]
    pub email: Option<String>,
}

impl Claims {
    /// Expiry as a wall-clock instant. Negative or non-finite timestamps
    /// clamp to the epoch.
    pub fn expires_at(&self) -> SystemTime {
        Duration::try_from_secs_f64(self.exp)
            .ok()
            .and_then(|d| UNIX_EPOCH.checked_add(d))
            .unwrap_or(UNIX_EPOCH)
    }
}

/// Why a credential payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("Token has {0} segments, expected 3")]
    Segments(usize),

    #[error("Payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not a valid claims object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the claims of a three-part, dot-separated token.
pub fn decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(ClaimsError::Segments(segments.len()));
    }
    // Some issuers pad the segments; base64url in JWTs is normally unpadded.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}
