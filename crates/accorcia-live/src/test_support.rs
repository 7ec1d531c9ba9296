//! Helpers shared by unit tests: signed credentials with chosen expiries.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;

use crate::session::LoginResponse;

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

pub fn unix_now() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    i64::try_from(secs).unwrap()
}

/// HS256 token for `sub` expiring `expires_in` seconds from now (may be negative).
pub fn mint_token(sub: &str, expires_in: i64, email: Option<&str>) -> String {
    let claims = TestClaims {
        sub,
        exp: unix_now() + expires_in,
        email,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

pub fn login_response(sub: &str, expires_in: i64) -> LoginResponse {
    LoginResponse {
        token: mint_token(sub, expires_in, None),
        subject: sub.to_string(),
        token_type: "Bearer".to_string(),
    }
}
