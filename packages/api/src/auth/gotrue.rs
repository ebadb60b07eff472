//! # Hosted auth client
//!
//! [`GoTrueClient`] implements [`IdentityProvider`] against the backend's auth
//! REST API (`/auth/v1/*`). Every request carries the `apikey` header; calls made
//! on behalf of a session add `Authorization: Bearer <access_token>`.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | sign up | `POST /auth/v1/signup` `{email, password, data}` |
//! | sign in | `POST /auth/v1/token?grant_type=password` `{email, password}` |
//! | refresh | `POST /auth/v1/token?grant_type=refresh_token` `{refresh_token}` |
//! | sign out | `POST /auth/v1/logout` |
//! | reset email | `POST /auth/v1/recover?redirect_to=…` `{email}` |
//! | recovery session | `GET /auth/v1/user` with the link's access token |
//! | new password | `PUT /auth/v1/user` `{password}` |
//!
//! Error responses are mapped by status: 4xx is a rejection whose message is
//! shown to the user, 5xx / 408 / 429 are network-class failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::config::BackendConfig;
use super::deep_link::RecoveryTokens;
use super::provider::{IdentityProvider, SignUpOutcome};
use super::storage::SessionStorage;
use crate::error::{AuthError, Result};
use crate::models::{Identity, Session};

/// HTTP client for the hosted identity provider.
pub struct GoTrueClient {
    config: BackendConfig,
    client: Client,
    storage: Arc<dyn SessionStorage>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(UserResponse),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        Identity {
            id: user.id,
            email: user.email,
        }
    }
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

/// Map a non-success response to an [`AuthError`].
fn error_from_response(status: StatusCode, body: &str) -> AuthError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or_else(|| {
            parsed.error.map(|e| match e {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
        })
        .filter(|m| !m.is_empty())
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        AuthError::Network(message)
    } else {
        AuthError::Rejected(message)
    }
}

impl GoTrueClient {
    pub fn new(config: BackendConfig, storage: Arc<dyn SessionStorage>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            storage,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.config.auth_url(path))
            .header("apikey", &self.config.anon_key)
    }

    fn authorized(&self, method: Method, path: &str, access_token: &str) -> RequestBuilder {
        self.request(method, path)
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        Ok(response.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        Ok(())
    }

    fn persist(&self, session: &Session) -> Result<()> {
        self.storage.save(session)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.storage.load()? else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(AuthError::Rejected(reason)) => {
                tracing::info!("Persisted session no longer valid: {}", reason);
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                // Keep the user signed in offline; the session check renews it once back online.
                tracing::warn!("Could not refresh persisted session: {}", e);
                Ok(Some(session))
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<SignUpOutcome> {
        let body = serde_json::json!({
            "email": email.trim(),
            "password": password,
            "data": metadata,
        });
        let response: SignUpResponse = self
            .send_json(self.request(Method::POST, "signup").json(&body))
            .await?;

        match response {
            SignUpResponse::Session(tokens) => {
                let session = tokens.into_session(Utc::now());
                self.persist(&session)?;
                Ok(SignUpOutcome {
                    identity: session.user.clone(),
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => Ok(SignUpOutcome {
                identity: user.into(),
                session: None,
            }),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({ "email": email.trim(), "password": password });
        let tokens: TokenResponse = self
            .send_json(self.request(Method::POST, "token?grant_type=password").json(&body))
            .await?;
        let session = tokens.into_session(Utc::now());
        self.persist(&session)?;
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let cleared = self.storage.clear();
        let result = self
            .send_empty(self.authorized(Method::POST, "logout", &session.access_token))
            .await;
        // A session left on disk would sign the user back in on the next launch.
        cleared?;
        match result {
            // Already revoked or expired remotely.
            Err(AuthError::Rejected(_)) => Ok(()),
            other => other,
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let result: Result<TokenResponse> = self
            .send_json(
                self.request(Method::POST, "token?grant_type=refresh_token")
                    .json(&body),
            )
            .await;
        match result {
            Ok(tokens) => {
                let session = tokens.into_session(Utc::now());
                self.persist(&session)?;
                Ok(session)
            }
            Err(AuthError::Rejected(reason)) => {
                self.storage.clear()?;
                Err(AuthError::Rejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<()> {
        let path = format!("recover?redirect_to={}", urlencoding::encode(redirect_to));
        let body = serde_json::json!({ "email": email.trim() });
        self.send_empty(self.request(Method::POST, &path).json(&body))
            .await
    }

    async fn session_from_recovery(&self, tokens: &RecoveryTokens) -> Result<Session> {
        let user: UserResponse = self
            .send_json(self.authorized(Method::GET, "user", &tokens.access_token))
            .await?;
        let session = Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at,
            user: user.into(),
        };
        self.persist(&session)?;
        Ok(session)
    }

    async fn update_password(&self, session: &Session, new_password: &str) -> Result<Identity> {
        let body = serde_json::json!({ "password": new_password });
        let user: UserResponse = self
            .send_json(
                self.authorized(Method::PUT, "user", &session.access_token)
                    .json(&body),
            )
            .await?;
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_to_session() {
        let now = Utc::now();
        let tokens: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "at",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "rt",
                "user": {"id": "5b0c", "email": "founder@example.com", "aud": "authenticated"}
            }"#,
        )
        .unwrap();
        let session = tokens.into_session(now);
        assert_eq!(session.access_token, "at");
        assert_eq!(session.user.id, "5b0c");
        assert_eq!(session.user.email.as_deref(), Some("founder@example.com"));
        assert_eq!(session.expires_at, Some(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_absolute_expiry_wins() {
        let tokens: TokenResponse = serde_json::from_str(
            r#"{"access_token": "at", "refresh_token": "rt", "expires_in": 3600,
                "expires_at": 1700000000, "user": {"id": "u"}}"#,
        )
        .unwrap();
        let session = tokens.into_session(Utc::now());
        assert_eq!(session.expires_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_sign_up_without_confirmation_returns_user_only() {
        let response: SignUpResponse = serde_json::from_str(
            r#"{"id": "9f2e", "email": "new@example.com", "confirmation_sent_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(response, SignUpResponse::User(ref user) if user.id == "9f2e"));

        let response: SignUpResponse = serde_json::from_str(
            r#"{"access_token": "at", "refresh_token": "rt", "user": {"id": "9f2e"}}"#,
        )
        .unwrap();
        assert!(matches!(response, SignUpResponse::Session(_)));
    }

    #[test]
    fn test_error_mapping() {
        let err = error_from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error": "invalid_grant", "error_description": "Invalid login credentials"}"#,
        );
        assert_eq!(err, AuthError::Rejected("Invalid login credentials".into()));

        let err = error_from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"code": 422, "msg": "Password should be at least 6 characters"}"#,
        );
        assert_eq!(err, AuthError::Rejected("Password should be at least 6 characters".into()));

        let err = error_from_response(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert_eq!(err, AuthError::Network("upstream down".into()));
        assert!(err.is_transient());

        let err = error_from_response(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, AuthError::Network(ref m) if m.contains("429")));
    }
}
