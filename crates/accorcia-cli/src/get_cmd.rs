//! `get`: authorised GET against the backend, printed as pretty JSON.

use std::io::{self, Write};
use std::path::Path;

use accorcia_core::Config;
use accorcia_live::{ApiClient, ApiError, SessionManager};

use crate::credentials::Credentials;

/// Fetch `path` with the stored session. A rejected credential is forgotten.
pub async fn run(
    path: &str,
    config: &Config,
    session: SessionManager,
    credentials: &Path,
) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        anyhow::bail!("Not logged in. Run `accorcia auth login` first");
    }
    let client = ApiClient::new(&config.api, session)?;
    match client.get_json(path).await {
        Ok(body) => {
            let mut out = io::stdout();
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
            Ok(())
        }
        Err(ApiError::Unauthorized) => {
            Credentials::clear(credentials)?;
            anyhow::bail!("The backend rejected the stored credential; log in again")
        }
        Err(e) => Err(e.into()),
    }
}
