//! Credential lifetime tracking.

mod claims;
mod manager;
mod types;

pub use claims::{Claims, ClaimsError, decode_claims};
pub use manager::SessionManager;
pub use types::{AuthState, BearerToken, LoginResponse, Session, SessionConfig};
