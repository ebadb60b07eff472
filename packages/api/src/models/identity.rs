//! # Identity and session models
//!
//! ## [`Identity`]
//!
//! The authenticated principal as the identity provider knows it: an opaque,
//! stable user id and an optional email. It is the only user data that flows
//! into the navigation layer, and it exists only while a [`Session`] does.
//!
//! ## [`Session`]
//!
//! The tokens that prove an [`Identity`]. It is persisted between launches (see
//! `auth::SessionStorage`) and never leaves the device except as a bearer token.
//! [`Session::is_expired`] treats a session as expired a little before the
//! provider does so that a refresh happens before a request is rejected.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    /// Get display name, falling back to the id if no email is known.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// Tokens for a signed-in identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Identity,
}

const EXPIRY_MARGIN_SECS: i64 = 60;

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at,
            None => false,
        }
    }
}
