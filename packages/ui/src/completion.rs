//! Role completion: does the user's business-detail record exist yet?

use std::sync::Arc;
use std::time::Duration;

use store::config::DetailsConfig;
use store::{DetailStore, Profile, StoreError};

use crate::route::CompletionState;

pub struct CompletionChecker {
    store: Arc<dyn DetailStore>,
    details: DetailsConfig,
    timeout: Duration,
}

impl CompletionChecker {
    pub fn new(store: Arc<dyn DetailStore>, details: DetailsConfig, timeout: Duration) -> Self {
        Self {
            store,
            details,
            timeout,
        }
    }

    /// Query the detail table for `profile.role`.
    ///
    /// Never cached. A failed query reads as [`CompletionState::Incomplete`]:
    /// the user lands on the completion form, not on role selection.
    pub async fn check(&self, profile: &Profile) -> CompletionState {
        let Some(table) = self.details.table_for(profile.role) else {
            return CompletionState::Complete;
        };

        let result = match self.query(table, &profile.user_id).await {
            Err(e) if e.is_transient() => {
                tracing::warn!("Completion check on {} failed, retrying once: {}", table, e);
                self.query(table, &profile.user_id).await
            }
            other => other,
        };

        match result {
            Ok(true) => CompletionState::Complete,
            Ok(false) => CompletionState::Incomplete,
            Err(e) => {
                tracing::warn!("Completion check on {} failed, assuming incomplete: {}", table, e);
                CompletionState::Incomplete
            }
        }
    }

    async fn query(&self, table: &str, owner_id: &str) -> Result<bool, StoreError> {
        tokio::time::timeout(self.timeout, self.store.has_detail(table, owner_id))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{MemoryStore, Role};

    fn profile(role: Role) -> Profile {
        Profile {
            user_id: "u1".into(),
            role,
            display_id: "XX-ABCDEF".into(),
            created_at: None,
        }
    }

    fn checker(store: &MemoryStore) -> CompletionChecker {
        CompletionChecker::new(
            Arc::new(store.clone()),
            DetailsConfig::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_detail_row_decides() {
        let store = MemoryStore::new();
        let checker = checker(&store);

        assert_eq!(checker.check(&profile(Role::Investor)).await, CompletionState::Incomplete);
        store.insert_detail("investors", "u1");
        assert_eq!(checker.check(&profile(Role::Investor)).await, CompletionState::Complete);
        assert_eq!(checker.check(&profile(Role::Startup)).await, CompletionState::Incomplete);
    }

    #[tokio::test]
    async fn test_elevated_roles_need_no_detail() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let checker = checker(&store);
        assert_eq!(checker.check(&profile(Role::Admin)).await, CompletionState::Complete);
        assert_eq!(checker.check(&profile(Role::SuperAdmin)).await, CompletionState::Complete);
    }

    #[tokio::test]
    async fn test_failure_defaults_to_incomplete() {
        let store = MemoryStore::new();
        store.insert_detail("startups", "u1");
        let checker = checker(&store);

        store.fail_next(StoreError::Timeout(Duration::from_secs(30)));
        assert_eq!(checker.check(&profile(Role::Startup)).await, CompletionState::Complete);

        store.set_offline(true);
        assert_eq!(checker.check(&profile(Role::Startup)).await, CompletionState::Incomplete);
    }
}
