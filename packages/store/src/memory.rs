use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::models::{ProfileRow, Role};
use crate::repo::{DetailStore, ProfileStore};

/// In-memory profile and detail tables for testing and offline demos.
///
/// Besides the data it can be told to behave like a flaky backend: queued
/// failures are returned by the next calls, and an offline store fails every
/// call with [`StoreError::Unavailable`].
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    profiles: Arc<Mutex<HashMap<String, ProfileRow>>>,
    details: Arc<Mutex<HashSet<(String, String)>>>,
    failures: Arc<Mutex<VecDeque<StoreError>>>,
    offline: Arc<Mutex<bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile row directly, bypassing the upsert path.
    pub fn insert_profile(&self, row: ProfileRow) {
        lock(&self.profiles).insert(row.user_id.clone(), row);
    }

    /// Record that `owner_id` has filled in the detail table `table`.
    pub fn insert_detail(&self, table: &str, owner_id: &str) {
        lock(&self.details).insert((table.to_string(), owner_id.to_string()));
    }

    /// Current row for a user, read without going through the trait.
    pub fn profile(&self, user_id: &str) -> Option<ProfileRow> {
        lock(&self.profiles).get(user_id).cloned()
    }

    pub fn profile_count(&self) -> usize {
        lock(&self.profiles).len()
    }

    /// Make the next call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        lock(&self.failures).push_back(error);
    }

    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    fn check(&self) -> Result<()> {
        if *lock(&self.offline) {
            tracing::debug!("Memory store is offline");
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        match lock(&self.failures).pop_front() {
            Some(error) => {
                tracing::debug!("Memory store failing on request: {}", error);
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn select_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.check()?;
        Ok(self.profile(user_id))
    }

    async fn upsert_profile(&self, row: &ProfileRow) -> Result<ProfileRow> {
        self.check()?;
        let mut profiles = lock(&self.profiles);
        let stored = profiles
            .entry(row.user_id.clone())
            .and_modify(|existing| {
                existing.role = row.role;
                existing.display_id = row.display_id.clone();
            })
            .or_insert_with(|| ProfileRow {
                created_at: Some(Utc::now()),
                ..row.clone()
            });
        Ok(stored.clone())
    }

    async fn update_role(&self, user_id: &str, role: Option<Role>) -> Result<Option<ProfileRow>> {
        self.check()?;
        let mut profiles = lock(&self.profiles);
        Ok(profiles.get_mut(user_id).map(|existing| {
            existing.role = role;
            existing.clone()
        }))
    }
}

#[async_trait]
impl DetailStore for MemoryStore {
    async fn has_detail(&self, table: &str, owner_id: &str) -> Result<bool> {
        self.check()?;
        Ok(lock(&self.details).contains(&(table.to_string(), owner_id.to_string())))
    }
}
