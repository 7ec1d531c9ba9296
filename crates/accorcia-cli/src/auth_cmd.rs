//! Auth subcommands: login, register, change-password, logout, status.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use accorcia_core::Config;
use accorcia_live::{ApiClient, ApiError, RegisterRequest, Session, SessionManager};

use crate::credentials::Credentials;

/// Auth subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum AuthAction {
    /// Log in to the shortlink backend.
    Login {
        /// Username.
        #[arg(short, long)]
        username: String,
        /// Password.
        #[arg(short, long, env = "ACCORCIA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not log in).
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "ACCORCIA_PASSWORD", hide_env_values = true)]
        password: String,
        /// Invite code issued by the backend operator.
        #[arg(short, long)]
        invite_code: String,
    },
    /// Change the password of the logged-in account.
    ChangePassword {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    /// Forget the stored credential.
    Logout,
    /// Show current auth status.
    Status,
}

/// Execute an auth subcommand.
pub async fn run(action: AuthAction, config: &Config, credentials: &Path) -> anyhow::Result<()> {
    match action {
        AuthAction::Login { username, password } => {
            login(config, credentials, &username, &password).await
        }
        AuthAction::Register {
            username,
            email,
            password,
            invite_code,
        } => {
            let request = RegisterRequest {
                username,
                email,
                password,
                invite_code,
            };
            register(config, &request).await
        }
        AuthAction::ChangePassword { old, new } => {
            change_password(config, credentials, &old, &new).await
        }
        AuthAction::Logout => logout(credentials),
        AuthAction::Status => status(config, credentials),
    }
}

async fn login(
    config: &Config,
    credentials: &Path,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    let session = SessionManager::new((&config.session).into());
    let client = ApiClient::new(&config.api, session)?;
    let resp = client
        .login(username, password)
        .await
        .map_err(|e| anyhow::anyhow!("Login failed: {e}"))?;

    Credentials {
        username: resp.subject.clone(),
        token: resp.token,
    }
    .save(credentials)?;

    let mut out = io::stdout();
    writeln!(out, "Logged in as {}", resp.subject)?;
    if let Some(remaining) = remaining(&client.session().session()) {
        writeln!(out, "Session expires in {}", format_remaining(remaining))?;
    }
    Ok(())
}

async fn register(config: &Config, request: &RegisterRequest) -> anyhow::Result<()> {
    let client = ApiClient::new(&config.api, SessionManager::new((&config.session).into()))?;
    let message = client
        .register(request)
        .await
        .map_err(|e| anyhow::anyhow!("Registration failed: {e}"))?;
    writeln!(io::stdout(), "{message}")?;
    Ok(())
}

async fn change_password(
    config: &Config,
    credentials: &Path,
    old: &str,
    new: &str,
) -> anyhow::Result<()> {
    let stored = Credentials::load(credentials)
        .ok_or_else(|| anyhow::anyhow!("Not logged in. Run `accorcia auth login` first"))?;
    let client = ApiClient::new(&config.api, stored.restore(&config.session))?;
    match client.change_password(old, new).await {
        Ok(message) => {
            writeln!(io::stdout(), "{message}")?;
            Ok(())
        }
        Err(ApiError::Unauthorized) => {
            Credentials::clear(credentials)?;
            anyhow::bail!("The stored credential is no longer valid; log in again")
        }
        Err(e) => Err(anyhow::anyhow!("Password change failed: {e}")),
    }
}

fn logout(credentials: &Path) -> anyhow::Result<()> {
    let mut out = io::stdout();
    if Credentials::clear(credentials)? {
        writeln!(out, "Logged out")?;
    } else {
        writeln!(out, "Not logged in")?;
    }
    Ok(())
}

fn status(config: &Config, credentials: &Path) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let Some(stored) = Credentials::load(credentials) else {
        writeln!(out, "Not logged in")?;
        return Ok(());
    };

    let session = stored.restore(&config.session).session();
    if !session.authenticated {
        writeln!(
            out,
            "Credential for {} has expired; run `accorcia auth login`",
            stored.username
        )?;
        return Ok(());
    }

    writeln!(
        out,
        "Logged in as {}",
        session.subject.as_deref().unwrap_or(&stored.username)
    )?;
    if let Some(email) = &session.email {
        writeln!(out, "  Email:   {email}")?;
    }
    if let Some(remaining) = remaining(&session) {
        writeln!(out, "  Expires: in {}", format_remaining(remaining))?;
    }
    writeln!(out, "  Avatar:  {}", session.avatar_url())?;
    Ok(())
}

fn remaining(session: &Session) -> Option<Duration> {
    session
        .expires_at
        .and_then(|at| at.duration_since(SystemTime::now()).ok())
}

/// Human-readable duration, coarsest two units.
pub(crate) fn format_remaining(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins, secs) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
