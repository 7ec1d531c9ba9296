//! REST client for the shortlink backend.
//!
//! Account calls (register, login, password change) and authorised GETs.
//! Any 401/403 answer to an authorised call forces a local logout.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use accorcia_core::config::ApiConfig;

use crate::session::{BearerToken, LoginResponse, SessionManager};

/// REST client errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// New account details. The backend requires an invite code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub invite_code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest<'a> {
    old_password: &'a str,
    new_password: &'a str,
}

/// REST client bound to a session.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionManager,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, session: SessionManager) -> Result<Self, ApiError> {
        if config.base_url.is_empty() {
            return Err(ApiError::Config("base_url is empty".into()));
        }

        // reqwest is built without a bundled crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange credentials for a bearer token and start the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
        let login: LoginResponse = resp.json().await?;
        self.session.login(login.clone());
        Ok(login)
    }

    /// Create an account. Returns the backend's confirmation message.
    /// Does not log in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(self.url("/auth/register"))
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }
        Ok(confirmation(&body))
    }

    /// Change the signed-in account's password.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<String, ApiError> {
        let token = self.bearer()?;
        let resp = self
            .http
            .post(self.url("/change-password"))
            .header(AUTHORIZATION, token.header_value())
            .json(&ChangePasswordRequest {
                old_password,
                new_password,
            })
            .send()
            .await?;
        let resp = self.check_status(resp).await?;
        Ok(confirmation(&resp.text().await?))
    }

    /// Authorised GET returning the decoded JSON body.
    pub async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let token = self.bearer()?;
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?;
        let resp = self.check_status(resp).await?;
        Ok(resp.json().await?)
    }

    fn bearer(&self) -> Result<BearerToken, ApiError> {
        match self.session.token() {
            Some(token) if self.session.is_authenticated() => Ok(token),
            _ => Err(ApiError::Unauthorized),
        }
    }

    /// Map non-success statuses to errors. 401/403 end the local session.
    async fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if matches!(status.as_u16(), 401 | 403) {
            warn!(status = status.as_u16(), "Backend rejected the credential, logging out");
            self.session.logout();
            return Err(ApiError::Unauthorized);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Api {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

/// The backend's `{"message": "..."}` text, or the raw body.
fn confirmation(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// The backend's `{"error": "..."}` message, or the status reason.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string())
}
