//! # Domain models for profiles and roles
//!
//! Defines the rows exchanged with the profile table and the resolved view the
//! rest of the app works with.
//!
//! ## Types
//!
//! | Type | Represents |
//! |------|-----------|
//! | [`Role`] | The account category chosen by a user. Serialised snake_case (`"startup"`, `"investor"`, `"admin"`, `"super_admin"`). |
//! | [`ProfileRow`] | The raw row in the `profiles` table. `role` is `None` until the user picks one. |
//! | [`Profile`] | A row whose role is set. Only this type reaches the navigation layer as "resolved". |
//!
//! ## Display identifiers
//!
//! [`generate_display_id`] produces short, human-readable handles such as
//! `ST-7KQ2MX`. They are random, not reserved, so two concurrent assignments may
//! in principle collide; the table does not treat them as a key.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Account category governing which screens a user sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Startup,
    Investor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Startup, Role::Investor, Role::Admin, Role::SuperAdmin];

    /// Admin roles have no business-detail record to complete.
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Startup => "startup",
            Role::Investor => "investor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    fn display_prefix(self) -> &'static str {
        match self {
            Role::Startup => "ST",
            Role::Investor => "IN",
            Role::Admin => "AD",
            Role::SuperAdmin => "SA",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// A row of the profile table as stored remotely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub display_id: Option<String>,
    /// Filled in by the store on insert; omitted from writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProfileRow {
    /// Build the row written when `user_id` picks `role`.
    pub fn assign(user_id: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Some(role),
            display_id: Some(generate_display_id(role)),
            created_at: None,
        }
    }

    /// Project to a resolved [`Profile`]. `None` means "no role chosen yet".
    pub fn into_profile(self) -> Option<Profile> {
        let role = self.role?;
        Some(Profile {
            display_id: self.display_id.unwrap_or_default(),
            user_id: self.user_id,
            role,
            created_at: self.created_at,
        })
    }
}

/// A profile with a role assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    pub user_id: String,
    pub role: Role,
    pub display_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

const DISPLAY_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const DISPLAY_ID_LEN: usize = 6;

/// Generate a fresh display identifier for `role`, e.g. `IN-4XK9TB`.
pub fn generate_display_id(role: Role) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..DISPLAY_ID_LEN)
        .map(|_| DISPLAY_ID_ALPHABET[rng.gen_range(0..DISPLAY_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", role.display_prefix(), suffix)
}
