//! # Session tracker: single source of truth for "who is signed in"
//!
//! [`SessionTracker`] wraps an [`IdentityProvider`] and is the only writer of the
//! current [`Session`]. Every identity transition is published to the listeners
//! registered with [`on_change`](SessionTracker::on_change), synchronously and in
//! the order the transitions happen.
//!
//! | Operation | Publishes |
//! |-----------|-----------|
//! | [`initialize`](SessionTracker::initialize) | `InitialSession` |
//! | [`sign_up`](SessionTracker::sign_up) | `SignedIn`, only if the provider returned a session |
//! | [`sign_in`](SessionTracker::sign_in) | `SignedIn` on success, nothing on failure |
//! | [`sign_out`](SessionTracker::sign_out) | `SignedOut` (even if the remote revoke fails) |
//! | [`refresh`](SessionTracker::refresh) | `TokenRefreshed`, or `SignedOut` when the refresh token is rejected |
//! | [`recover_from_link`](SessionTracker::recover_from_link) | `PasswordRecovery` |
//! | [`update_password`](SessionTracker::update_password) | `UserUpdated` |
//!
//! Nothing is retried here; callers decide. Every provider call is bounded by the
//! configured timeout and reports [`AuthError::Timeout`] when it elapses.
//!
//! Refreshes are serialised: [`fresh_access_token`](SessionTracker::fresh_access_token)
//! and [`replace_rejected_token`](SessionTracker::replace_rejected_token) re-check
//! the session after taking the refresh lock, so concurrent callers never spend
//! the same refresh token twice.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;

use super::deep_link::DeepLink;
use super::provider::{AuthEvent, IdentityProvider, SignUpOutcome};
use crate::error::{AuthError, Result};
use crate::models::{Identity, Session};

type Listener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

/// Owns the authentication session and announces its changes.
pub struct SessionTracker {
    provider: Arc<dyn IdentityProvider>,
    current: RwLock<Option<Session>>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    timeout: Duration,
    reset_redirect: String,
    refreshing: tokio::sync::Mutex<()>,
}

/// Keeps an [`on_change`](SessionTracker::on_change) listener registered.
/// Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionTracker {
    pub fn new(provider: Arc<dyn IdentityProvider>, timeout: Duration, reset_redirect: &str) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            timeout,
            reset_redirect: reset_redirect.to_string(),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// Register `callback` for every identity transition.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.read_current().as_ref().map(|s| s.user.clone())
    }

    /// Bearer token for row-level-security requests.
    pub fn access_token(&self) -> Option<String> {
        self.read_current().as_ref().map(|s| s.access_token.clone())
    }

    pub fn reset_redirect(&self) -> &str {
        &self.reset_redirect
    }

    /// Restore the persisted session, if any.
    pub async fn initialize(&self) -> Result<Option<Identity>> {
        let session = self.bounded(self.provider.get_session()).await?;
        let identity = session.as_ref().map(|s| s.user.clone());
        self.set_current(session);
        match &identity {
            Some(identity) => tracing::info!("Restored session for {}", identity.display_name()),
            None => tracing::info!("No persisted session"),
        }
        self.publish(AuthEvent::InitialSession(identity.clone()));
        Ok(identity)
    }

    /// Create an account. A returned identity does not imply a session.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<SignUpOutcome> {
        let outcome = self
            .bounded(self.provider.sign_up(email, password, &metadata))
            .await?;
        match &outcome.session {
            Some(session) => {
                tracing::info!("Signed up and signed in {}", session.user.display_name());
                self.set_current(Some(session.clone()));
                self.publish(AuthEvent::SignedIn(session.user.clone()));
            }
            None => tracing::info!("Signed up {}, awaiting email confirmation", email.trim()),
        }
        Ok(outcome)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let session = self
            .bounded(self.provider.sign_in_with_password(email, password))
            .await
            .inspect_err(|e| tracing::warn!("Sign-in failed: {}", e))?;
        let identity = session.user.clone();
        tracing::info!("Signed in {}", identity.display_name());
        self.set_current(Some(session));
        self.publish(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    pub async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.take_current() else {
            return Ok(());
        };
        let result = self.bounded(self.provider.sign_out(&session)).await;
        tracing::info!("Signed out {}", session.user.display_name());
        self.publish(AuthEvent::SignedOut);
        match result {
            Err(AuthError::Storage(reason)) => {
                tracing::error!("Saved session could not be removed: {}", reason);
                Err(AuthError::Storage(reason))
            }
            Err(e) => {
                tracing::warn!("Remote sign-out failed, local session cleared anyway: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh(&self) -> Result<Identity> {
        let _guard = self.refreshing.lock().await;
        self.refresh_locked().await
    }

    /// Bearer token for a request, refreshing first if the session has expired.
    ///
    /// A transient refresh failure hands back the stale token; a rejected one
    /// signs out and returns `None`.
    pub async fn fresh_access_token(&self) -> Result<Option<String>> {
        let _guard = self.refreshing.lock().await;
        let expired = self
            .read_current()
            .as_ref()
            .map(|s| s.is_expired(Utc::now()));
        match expired {
            None => return Ok(None),
            Some(false) => {}
            Some(true) => match self.refresh_locked().await {
                Ok(_) => {}
                Err(AuthError::Rejected(_)) => return Ok(None),
                Err(e) if e.is_transient() => {
                    tracing::warn!("Session refresh failed, using the stale token: {}", e);
                }
                Err(e) => return Err(e),
            },
        }
        Ok(self.access_token())
    }

    /// The backend refused `token`. Refresh, unless another caller already
    /// replaced it, and return the token to retry with.
    pub async fn replace_rejected_token(&self, token: &str) -> Result<Option<String>> {
        let _guard = self.refreshing.lock().await;
        let current = self.access_token();
        if current.as_deref() != Some(token) {
            return Ok(current);
        }
        self.refresh_locked().await?;
        Ok(self.access_token())
    }

    async fn refresh_locked(&self) -> Result<Identity> {
        let refresh_token = self
            .read_current()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(AuthError::NotSignedIn)?;
        match self
            .bounded(self.provider.refresh_session(&refresh_token))
            .await
        {
            Ok(session) => {
                let identity = session.user.clone();
                self.set_current(Some(session));
                self.publish(AuthEvent::TokenRefreshed(identity.clone()));
                Ok(identity)
            }
            Err(AuthError::Rejected(reason)) => {
                tracing::info!("Session expired: {}", reason);
                self.take_current();
                self.publish(AuthEvent::SignedOut);
                Err(AuthError::Rejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Send a password-reset email that links back to the app.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        self.bounded(
            self.provider
                .reset_password_for_email(email, &self.reset_redirect),
        )
        .await
    }

    /// Adopt the recovery session carried by a reset link.
    ///
    /// Returns `Ok(None)` for a bare reset link, which only opens the sign-in screen.
    pub async fn recover_from_link(&self, link: &str) -> Result<Option<Identity>> {
        let DeepLink::ResetPassword { tokens } = DeepLink::parse(link, &self.reset_redirect)?;
        let Some(tokens) = tokens else {
            return Ok(None);
        };
        let session = self
            .bounded(self.provider.session_from_recovery(&tokens))
            .await?;
        let identity = session.user.clone();
        tracing::info!("Password recovery session for {}", identity.display_name());
        self.set_current(Some(session));
        self.publish(AuthEvent::PasswordRecovery(identity.clone()));
        Ok(Some(identity))
    }

    pub async fn update_password(&self, new_password: &str) -> Result<Identity> {
        let session = self.read_current().clone().ok_or(AuthError::NotSignedIn)?;
        let identity = self
            .bounded(self.provider.update_password(&session, new_password))
            .await?;
        self.publish(AuthEvent::UserUpdated(identity.clone()));
        Ok(identity)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))?
    }

    fn publish(&self, event: AuthEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn read_current(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, session: Option<Session>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn take_current(&self) -> Option<Session> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
