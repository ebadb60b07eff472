//! REST client for the profile and business-detail tables.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use store::config::MarketplaceConfig;
use store::error::{Result, StoreError};
use store::{DetailStore, ProfileRow, ProfileStore, Role};

use crate::auth::{BackendConfig, SessionTracker};
use crate::error::AuthError;

/// Supplies the bearer token that row-level security checks.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Token for the next request, renewed first if it has expired.
    async fn bearer_token(&self) -> Option<String>;

    /// The backend answered 401 to `token`. Returns a token worth one retry.
    async fn token_rejected(&self, token: &str) -> Option<String>;
}

#[async_trait]
impl AccessTokenSource for SessionTracker {
    async fn bearer_token(&self) -> Option<String> {
        match self.fresh_access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not renew the session: {}", e);
                self.access_token()
            }
        }
    }

    async fn token_rejected(&self, token: &str) -> Option<String> {
        match self.replace_rejected_token(token).await {
            Ok(fresh) => fresh.filter(|fresh| fresh != token),
            Err(e) => {
                tracing::warn!("Access token refused and could not be renewed: {}", e);
                None
            }
        }
    }
}

/// [`ProfileStore`] and [`DetailStore`] over the backend's REST endpoint.
pub struct RestStore {
    backend: BackendConfig,
    client: Client,
    tokens: Arc<dyn AccessTokenSource>,
    profiles_table: String,
    owner_column: String,
    timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

const PROFILE_COLUMNS: &str = "user_id,role,display_id,created_at";

fn profile_select_query(user_id: &str) -> String {
    format!(
        "select={PROFILE_COLUMNS}&user_id=eq.{}&limit=1",
        urlencoding::encode(user_id)
    )
}

fn detail_exists_query(owner_column: &str, owner_id: &str) -> String {
    format!(
        "select={owner_column}&{owner_column}=eq.{}&limit=1",
        urlencoding::encode(owner_id)
    )
}

fn error_from_response(status: StatusCode, body: &str) -> StoreError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = match (parsed.message, parsed.hint) {
        (Some(message), Some(hint)) => format!("{message} ({hint})"),
        (Some(message), None) => message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status.to_string(),
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        StoreError::Unavailable(message)
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

impl RestStore {
    pub fn new(
        backend: BackendConfig,
        config: &MarketplaceConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> std::result::Result<Self, AuthError> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            backend,
            client,
            tokens,
            profiles_table: config.profiles.table.clone(),
            owner_column: config.details.owner_column.clone(),
            timeout,
        })
    }

    fn request(&self, method: Method, table: &str, query: &str, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.backend.anon_key);
        self.client
            .request(method, format!("{}?{}", self.backend.rest_url(table), query))
            .header("apikey", &self.backend.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
    }

    fn map_transport(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| self.map_transport(e))
    }

    /// Send a request built by `prepare`. A 401 renews the token and retries once.
    async fn fetch_rows<T, F>(&self, method: Method, table: &str, query: &str, prepare: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.bearer_token().await;
        let mut response = self
            .send(prepare(self.request(method.clone(), table, query, token.as_deref())))
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(rejected) = token.as_deref() {
                if let Some(fresh) = self.tokens.token_rejected(rejected).await {
                    tracing::debug!("Retrying {} {} with a renewed token", method, table);
                    response = self
                        .send(prepare(self.request(method, table, query, Some(&fresh))))
                        .await?;
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body));
        }
        response.json().await.map_err(|e| self.map_transport(e))
    }
}

#[async_trait]
impl ProfileStore for RestStore {
    async fn select_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let query = profile_select_query(user_id);
        let rows: Vec<ProfileRow> = self
            .fetch_rows(Method::GET, &self.profiles_table, &query, |r| r)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow> {
        let rows: Vec<ProfileRow> = self
            .fetch_rows(Method::POST, &self.profiles_table, "on_conflict=user_id", |r| {
                r.header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(&[row])
            })
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("upsert returned no row".to_string()))
    }

    async fn update_role(&self, user_id: &str, role: Option<Role>) -> Result<Option<ProfileRow>> {
        let query = format!("user_id=eq.{}", urlencoding::encode(user_id));
        let body = serde_json::json!({ "role": role });
        let rows: Vec<ProfileRow> = self
            .fetch_rows(Method::PATCH, &self.profiles_table, &query, |r| {
                r.header("Prefer", "return=representation").json(&body)
            })
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl DetailStore for RestStore {
    async fn has_detail(&self, table: &str, owner_id: &str) -> Result<bool> {
        let query = detail_exists_query(&self.owner_column, owner_id);
        let rows: Vec<serde_json::Value> = self.fetch_rows(Method::GET, table, &query, |r| r).await?;
        Ok(!rows.is_empty())
    }
}
