//! Session manager: credential ownership and expiry-driven logout.
//!
//! The manager is the single source of truth for "is the user currently
//! authenticated". Every login arms exactly one expiry timer; when it fires it
//! runs the same logout path as an explicit [`SessionManager::logout`], so
//! observers cannot tell the two apart.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::claims::{Claims, decode_claims};
use super::types::{AuthState, BearerToken, Credential, LoginResponse, Session, SessionConfig};

/// Owns the authentication credential and publishes the authentication state.
///
/// Cloning is cheap; all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<AuthState>,
}

#[derive(Default)]
struct Slot {
    credential: Option<Credential>,
    /// Monotonic expiry deadline, derived from the wall-clock claim at login.
    deadline: Option<Instant>,
    generation: u64,
    expiry_timer: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(AuthState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                slot: Mutex::new(Slot::default()),
                state_tx,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// Store a freshly issued credential and arm its expiry timer.
    ///
    /// A credential whose claims cannot be decoded is kept and treated as
    /// valid for the configured default lifetime.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime (the expiry timer is a task).
    pub fn login(&self, response: LoginResponse) {
        let LoginResponse { token, subject, .. } = response;
        self.establish(BearerToken::new(token), Some(subject));
    }

    /// Re-establish a session from a previously persisted credential.
    ///
    /// An already-expired credential ends in the logged-out state.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn restore(&self, token: impl Into<String>) {
        self.establish(BearerToken::new(token), None);
    }

    /// Clear the credential, cancel the expiry timer and publish the
    /// logged-out state. Always publishes, even with no active session.
    pub fn logout(&self) {
        let mut slot = self.inner.lock();
        let had_session = slot.credential.is_some();
        self.inner.clear_locked(&mut slot);
        drop(slot);
        if had_session {
            info!("Logged out");
        } else {
            debug!("Logout without an active session");
        }
    }

    /// Credential present and its expiry strictly in the future.
    pub fn is_authenticated(&self) -> bool {
        let slot = self.inner.lock();
        slot.credential.is_some() && slot.deadline.is_some_and(|d| Instant::now() < d)
    }

    /// Snapshot of the derived session view.
    pub fn session(&self) -> Session {
        let mut session = self.inner.state_tx.borrow().session.clone();
        session.authenticated = self.is_authenticated();
        session
    }

    /// Current bearer token, if logged in.
    pub fn token(&self) -> Option<BearerToken> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .map(|c| c.token.clone())
    }

    /// Replay-latest stream of the authentication state.
    ///
    /// The receiver sees the current value immediately via `borrow()`.
    pub fn authentication_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    fn establish(&self, token: BearerToken, subject: Option<String>) {
        let now = SystemTime::now();
        let claims = match decode_claims(token.as_str()) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(
                    error = %e,
                    default_secs = self.inner.config.default_expiry.as_secs(),
                    "Cannot decode credential claims, assuming default lifetime"
                );
                None
            }
        };
        let expires_at = claims
            .as_ref()
            .map_or_else(|| now + self.inner.config.default_expiry, Claims::expires_at);
        let remaining = expires_at.duration_since(now).unwrap_or(Duration::ZERO);
        let subject = subject.or_else(|| claims.as_ref().and_then(|c| c.sub.clone()));
        let email = claims.as_ref().and_then(|c| c.email.clone());

        let mut slot = self.inner.lock();
        if let Some(timer) = slot.expiry_timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        slot.credential = Some(Credential {
            token: token.clone(),
            subject: subject.clone(),
        });

        if remaining.is_zero() {
            warn!(generation, "Credential already expired, logging out");
            self.inner.clear_locked(&mut slot);
            return;
        }

        let deadline = Instant::now() + remaining;
        slot.deadline = Some(deadline);
        slot.expiry_timer = Some(spawn_expiry_timer(
            Arc::downgrade(&self.inner),
            generation,
            deadline,
        ));
        self.inner.state_tx.send_replace(AuthState {
            session: Session {
                authenticated: true,
                subject: subject.clone(),
                email,
                expires_at: Some(expires_at),
            },
            generation,
            token: Some(token),
        });
        drop(slot);

        info!(
            subject = subject.as_deref().unwrap_or("-"),
            generation,
            expires_in_secs = remaining.as_secs(),
            "Logged in"
        );
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.inner.state_tx.borrow().session)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The one logout path, shared by explicit logout, expiry and
    /// already-expired logins.
    fn clear_locked(&self, slot: &mut Slot) {
        if let Some(timer) = slot.expiry_timer.take() {
            timer.abort();
        }
        slot.credential = None;
        slot.deadline = None;
        let generation = slot.generation;
        self.state_tx.send_replace(AuthState {
            session: Session::default(),
            generation,
            token: None,
        });
    }

    fn expire(&self, generation: u64) {
        let mut slot = self.lock();
        // A re-login after this timer was armed owns the session now.
        if slot.generation != generation || slot.credential.is_none() {
            return;
        }
        let subject = slot
            .credential
            .as_ref()
            .and_then(|c| c.subject.clone())
            .unwrap_or_default();
        self.clear_locked(&mut slot);
        drop(slot);
        info!(subject, generation, "Credential expired, logged out");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = slot.expiry_timer.take() {
            timer.abort();
        }
    }
}

fn spawn_expiry_timer(inner: Weak<Inner>, generation: u64, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire(generation);
        }
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "manager_tests.rs"]
mod tests;
