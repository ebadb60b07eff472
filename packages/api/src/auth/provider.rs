//! The identity-provider seam and the events the session tracker publishes.

use async_trait::async_trait;

use super::deep_link::RecoveryTokens;
use crate::error::Result;
use crate::models::{Identity, Session};

/// Remote authentication service.
///
/// Implementations own session persistence: a session returned from
/// `sign_in_with_password`, `sign_up`, `refresh_session` or
/// `session_from_recovery` is also what the next `get_session` returns, until
/// `sign_out` clears it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The persisted session, refreshed first if it has expired.
    async fn get_session(&self) -> Result<Option<Session>>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<SignUpOutcome>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Forget the local session and revoke it remotely.
    async fn sign_out(&self, session: &Session) -> Result<()>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session>;

    /// Send a reset email whose link opens `redirect_to`.
    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<()>;

    /// Adopt the session carried by a password-reset link.
    async fn session_from_recovery(&self, tokens: &RecoveryTokens) -> Result<Session>;

    async fn update_password(&self, session: &Session, new_password: &str) -> Result<Identity>;
}

/// Result of a sign-up. Providers that require email confirmation return the
/// new identity without a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub identity: Identity,
    pub session: Option<Session>,
}

/// An identity transition, as delivered to `SessionTracker::on_change` listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// Result of restoring the persisted session at startup.
    InitialSession(Option<Identity>),
    SignedIn(Identity),
    SignedOut,
    TokenRefreshed(Identity),
    /// A password-reset link was opened and its session adopted.
    PasswordRecovery(Identity),
    UserUpdated(Identity),
}

impl AuthEvent {
    /// The identity in effect after this event.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthEvent::InitialSession(identity) => identity.as_ref(),
            AuthEvent::SignedOut => None,
            AuthEvent::SignedIn(identity)
            | AuthEvent::TokenRefreshed(identity)
            | AuthEvent::PasswordRecovery(identity)
            | AuthEvent::UserUpdated(identity) => Some(identity),
        }
    }
}
