//! Backend configuration from environment variables.

use url::Url;

use crate::error::{AuthError, Result};

/// Location and public key of the hosted backend.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`. No trailing slash.
    pub url: String,
    /// Public (anon) API key sent as the `apikey` header on every request.
    pub anon_key: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl BackendConfig {
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| AuthError::Config(format!("invalid backend URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuthError::Config(format!("backend URL must be http(s): {url}")));
        }
        if anon_key.trim().is_empty() {
            return Err(AuthError::Config("anon key is empty".to_string()));
        }
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.trim().to_string(),
        })
    }

    /// Create backend config from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let url = std::env::var("MARKETPLACE_URL")
            .map_err(|_| AuthError::Config("MARKETPLACE_URL not set".to_string()))?;
        let anon_key = std::env::var("MARKETPLACE_ANON_KEY")
            .map_err(|_| AuthError::Config("MARKETPLACE_ANON_KEY not set".to_string()))?;

        Self::new(&url, &anon_key)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }
}
