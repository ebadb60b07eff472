//! Profile resolver: reads and writes the signed-in user's profile row.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use store::error::Result;
use store::{Profile, ProfileRow, ProfileStore, StoreError};

/// Successful outcome of [`ProfileResolver::load_profile`].
#[derive(Clone, Debug, PartialEq)]
pub enum ProfileLookup {
    Resolved(Profile),
    /// No row, or a row without a role.
    PendingRole,
}

pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    timeout: Duration,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn ProfileStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Look up the profile for `user_id`, retrying once on a transient failure.
    ///
    /// An `Err` means the store could not answer; it says nothing about the role.
    pub async fn load_profile(&self, user_id: &str) -> Result<ProfileLookup> {
        let row = match self.bounded(self.store.select_profile(user_id)).await {
            Err(e) if e.is_transient() => {
                tracing::warn!("Profile lookup failed, retrying once: {}", e);
                self.bounded(self.store.select_profile(user_id)).await
            }
            other => other,
        }?;

        Ok(match row.and_then(ProfileRow::into_profile) {
            Some(profile) => ProfileLookup::Resolved(profile),
            None => ProfileLookup::PendingRole,
        })
    }

    /// Store a prepared assignment, or clear the role with `None`.
    ///
    /// Repeating an assignment converges to one row. Clearing leaves the
    /// business-detail tables untouched.
    pub async fn write_role(&self, user_id: &str, assignment: Option<&ProfileRow>) -> Result<Option<Profile>> {
        match assignment {
            Some(row) => {
                let stored = self.bounded(self.store.upsert_profile(row)).await?;
                stored
                    .into_profile()
                    .map(Some)
                    .ok_or_else(|| StoreError::Decode("stored profile has no role".to_string()))
            }
            None => {
                self.bounded(self.store.update_role(user_id, None)).await?;
                Ok(None)
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}
