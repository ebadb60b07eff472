//! # Store traits: the remote tables the bootstrap flow reads and writes
//!
//! All reads and writes of application data go through the two traits below, so
//! the same resolver logic works against the hosted REST tables (`api::RestStore`),
//! the in-memory backend ([`crate::MemoryStore`]) or any future backend.
//!
//! ## [`ProfileStore`]
//!
//! | Method | Semantics |
//! |--------|-----------|
//! | [`select_profile`](ProfileStore::select_profile) | At most one row for the user. `Ok(None)` means the row is absent, which is *not* an error. |
//! | [`upsert_profile`](ProfileStore::upsert_profile) | Insert-or-update keyed by `user_id`. Repeating it converges to one row (last write wins). |
//! | [`update_role`](ProfileStore::update_role) | Update the role column in place. Touches no other table. |
//!
//! ## [`DetailStore`]
//!
//! Existence checks against the per-role business tables (`startups`,
//! `investors`, ...). The caller picks the table; the backend knows which column
//! holds the owner id.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ProfileRow, Role};

/// The profile table, keyed by user id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn select_profile(&self, user_id: &str) -> Result<Option<ProfileRow>>;

    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow>;

    async fn update_role(&self, user_id: &str, role: Option<Role>) -> Result<Option<ProfileRow>>;
}

/// The business-detail tables, one row per owner.
#[async_trait]
pub trait DetailStore: Send + Sync {
    async fn has_detail(&self, table: &str, owner_id: &str) -> Result<bool>;
}
