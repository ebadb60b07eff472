use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::deep_link::RecoveryTokens;
use super::provider::{IdentityProvider, SignUpOutcome};
use crate::error::{AuthError, Result};
use crate::models::{Identity, Session};

/// In-process identity provider for testing and offline demos.
///
/// Behaves like the hosted provider: accounts with passwords, optional email
/// confirmation, a persisted session, refresh tokens that can be revoked, and
/// reset links. Failures and latency can be injected.
#[derive(Clone, Default)]
pub struct MemoryIdentityProvider {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    refresh_tokens: HashMap<String, Identity>,
    access_tokens: HashMap<String, Identity>,
    persisted: Option<Session>,
    require_confirmation: bool,
    failures: VecDeque<AuthError>,
    latency: Option<Duration>,
    session_ttl: Option<i64>,
    reset_requests: Vec<(String, String)>,
}

struct Account {
    identity: Identity,
    password: String,
    confirmed: bool,
}

const SESSION_TTL_SECS: i64 = 3600;

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// New sign-ups get no session until [`confirm`](Self::confirm) is called.
    pub fn with_confirmation_required(self) -> Self {
        self.lock().require_confirmation = true;
        self
    }

    /// Register a confirmed account directly.
    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
        };
        self.lock().accounts.insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
                confirmed: true,
            },
        );
        identity
    }

    pub fn confirm(&self, email: &str) {
        if let Some(account) = self.lock().accounts.get_mut(email) {
            account.confirmed = true;
        }
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: AuthError) {
        self.lock().failures.push_back(error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Lifetime of sessions issued from now on. Zero or less issues sessions
    /// that are already expired.
    pub fn set_session_ttl(&self, secs: i64) {
        self.lock().session_ttl = Some(secs);
    }

    /// Invalidate every refresh token, as a server-side session expiry would.
    pub fn revoke_all_sessions(&self) {
        let mut state = self.lock();
        state.refresh_tokens.clear();
        state.access_tokens.clear();
    }

    /// The session a cold start would restore.
    pub fn persisted_session(&self) -> Option<Session> {
        self.lock().persisted.clone()
    }

    /// Reset emails sent so far, as `(email, redirect_to)`.
    pub fn reset_requests(&self) -> Vec<(String, String)> {
        self.lock().reset_requests.clone()
    }

    /// The tokens a reset email for `email` would carry.
    pub fn recovery_tokens(&self, email: &str) -> Option<RecoveryTokens> {
        let mut state = self.lock();
        let identity = state.accounts.get(email)?.identity.clone();
        let session = issue(&mut state, identity);
        Some(RecoveryTokens {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self) -> Result<()> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.lock().failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn issue(state: &mut State, identity: Identity) -> Session {
    let session = Session {
        access_token: uuid::Uuid::new_v4().to_string(),
        refresh_token: uuid::Uuid::new_v4().to_string(),
        expires_at: Some(
            Utc::now() + chrono::Duration::seconds(state.session_ttl.unwrap_or(SESSION_TTL_SECS)),
        ),
        user: identity.clone(),
    };
    state
        .access_tokens
        .insert(session.access_token.clone(), identity.clone());
    state
        .refresh_tokens
        .insert(session.refresh_token.clone(), identity);
    session
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.begin().await?;
        let persisted = self.lock().persisted.clone();
        let Some(session) = persisted else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }
        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(AuthError::Rejected(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: &serde_json::Value,
    ) -> Result<SignUpOutcome> {
        self.begin().await?;
        let email = email.trim().to_lowercase();
        if password.len() < 6 {
            return Err(AuthError::Rejected(
                "Password should be at least 6 characters".to_string(),
            ));
        }

        let mut state = self.lock();
        if state.accounts.contains_key(&email) {
            return Err(AuthError::Rejected("User already registered".to_string()));
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.clone()),
        };
        let confirmed = !state.require_confirmation;
        state.accounts.insert(
            email,
            Account {
                identity: identity.clone(),
                password: password.to_string(),
                confirmed,
            },
        );

        let session = confirmed.then(|| issue(&mut state, identity.clone()));
        if let Some(ref session) = session {
            state.persisted = Some(session.clone());
        }
        Ok(SignUpOutcome { identity, session })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.begin().await?;
        let email = email.trim().to_lowercase();
        let mut state = self.lock();
        let identity = match state.accounts.get(&email) {
            Some(account) if account.password == password => {
                if !account.confirmed {
                    return Err(AuthError::Rejected("Email not confirmed".to_string()));
                }
                account.identity.clone()
            }
            _ => return Err(AuthError::Rejected("Invalid login credentials".to_string())),
        };
        let session = issue(&mut state, identity);
        state.persisted = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let outcome = self.begin().await;
        if let Err(AuthError::Storage(reason)) = outcome {
            return Err(AuthError::Storage(reason));
        }
        self.lock().persisted = None;
        outcome?;
        let mut state = self.lock();
        state.access_tokens.remove(&session.access_token);
        state.refresh_tokens.remove(&session.refresh_token);
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        self.begin().await?;
        let mut state = self.lock();
        let Some(identity) = state.refresh_tokens.remove(refresh_token) else {
            state.persisted = None;
            return Err(AuthError::Rejected("Invalid Refresh Token".to_string()));
        };
        let session = issue(&mut state, identity);
        state.persisted = Some(session.clone());
        Ok(session)
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<()> {
        self.begin().await?;
        self.lock()
            .reset_requests
            .push((email.trim().to_lowercase(), redirect_to.to_string()));
        Ok(())
    }

    async fn session_from_recovery(&self, tokens: &RecoveryTokens) -> Result<Session> {
        self.begin().await?;
        let mut state = self.lock();
        let Some(identity) = state.access_tokens.get(&tokens.access_token).cloned() else {
            return Err(AuthError::Rejected("Invalid or expired recovery link".to_string()));
        };
        let session = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at,
            user: identity,
        };
        state.persisted = Some(session.clone());
        Ok(session)
    }

    async fn update_password(&self, session: &Session, new_password: &str) -> Result<Identity> {
        self.begin().await?;
        if new_password.len() < 6 {
            return Err(AuthError::Rejected(
                "Password should be at least 6 characters".to_string(),
            ));
        }
        let mut state = self.lock();
        if !state.access_tokens.contains_key(&session.access_token) {
            return Err(AuthError::Rejected("Invalid JWT".to_string()));
        }
        let account = state
            .accounts
            .values_mut()
            .find(|account| account.identity.id == session.user.id)
            .ok_or_else(|| AuthError::Rejected("User not found".to_string()))?;
        account.password = new_password.to_string();
        Ok(account.identity.clone())
    }
}
