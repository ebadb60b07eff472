//! # Client configuration: `marketplace.toml`
//!
//! Settings the app shell needs besides the backend credentials (those come from
//! the environment, see `api::auth::BackendConfig`).
//!
//! ## Structure
//!
//! ```toml
//! [auth]
//! request_timeout_secs = 30          # upper bound for every identity / store call
//! reset_redirect = "app://auth/reset"
//! session_check_secs = 30            # how often the running app looks for an expired session
//!
//! [profiles]
//! table = "profiles"
//!
//! [details]
//! startup = "startups"
//! investor = "investors"
//! owner_column = "owner_id"
//! ```
//!
//! All sections derive `Default`, so a missing or empty file is equivalent to the
//! default configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Top-level configuration stored in `marketplace.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub details: DetailsConfig,
}

/// Identity-provider settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Hard upper bound for sign-in, sign-up and store reads, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Where password-reset emails send the user back to.
    #[serde(default = "default_reset_redirect")]
    pub reset_redirect: String,
    /// Period of the background session-expiry check, in seconds.
    #[serde(default = "default_session_check")]
    pub session_check_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_reset_redirect() -> String {
    "app://auth/reset".to_string()
}

fn default_session_check() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            reset_redirect: default_reset_redirect(),
            session_check_secs: default_session_check(),
        }
    }
}

/// Profile table settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfilesConfig {
    #[serde(default = "default_profiles_table")]
    pub table: String,
}

fn default_profiles_table() -> String {
    "profiles".to_string()
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            table: default_profiles_table(),
        }
    }
}

/// Business-detail tables, one per non-elevated role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailsConfig {
    #[serde(default = "default_startup_table")]
    pub startup: String,
    #[serde(default = "default_investor_table")]
    pub investor: String,
    #[serde(default = "default_owner_column")]
    pub owner_column: String,
}

fn default_startup_table() -> String {
    "startups".to_string()
}

fn default_investor_table() -> String {
    "investors".to_string()
}

fn default_owner_column() -> String {
    "owner_id".to_string()
}

impl Default for DetailsConfig {
    fn default() -> Self {
        Self {
            startup: default_startup_table(),
            investor: default_investor_table(),
            owner_column: default_owner_column(),
        }
    }
}

impl DetailsConfig {
    /// The detail table a role must fill in, if any.
    pub fn table_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Startup => Some(&self.startup),
            Role::Investor => Some(&self.investor),
            Role::Admin | Role::SuperAdmin => None,
        }
    }
}

impl MarketplaceConfig {
    /// The well-known filename for the config file.
    pub fn filename() -> &'static str {
        "marketplace.toml"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.request_timeout_secs)
    }

    pub fn session_check_interval(&self) -> Duration {
        Duration::from_secs(self.auth.session_check_secs.max(1))
    }

    /// Builder method to set the request timeout.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.auth.request_timeout_secs = secs;
        self
    }

    /// Parse from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
