// ============================
// crates/backend-lib/src/storage/memory.rs
// ============================
//! In-process document store with optional JSON snapshots.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs as tokio_fs;
use uuid::Uuid;

use super::{NewUser, RateLimitStore, StoreError, StoreResult, User, UserRepository, UserUpdate};
use crate::auth::rate_limit::{RateLimitDecision, RateLimitEntry};

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    users: Vec<User>,
}

/// Document store backed by `DashMap`.
///
/// Each user document is mutated only while its shard lock is held, so a
/// [`UserUpdate`] always sees the latest state and lands all-or-nothing.
/// No lock is held across an `.await`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    by_username: DashMap<String, String>,
    by_email: DashMap<String, String>,
    by_verifier: DashMap<String, String>,
    rate_limits: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`MemoryStore::save_snapshot`].
    /// A missing file yields an empty store.
    pub async fn load_snapshot<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let store = Self::new();
        if !tokio_fs::try_exists(path).await? {
            return Ok(store);
        }

        let content = tokio_fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        for user in snapshot.users {
            store.index(&user)?;
            store.users.insert(user.key.clone(), user);
        }
        tracing::info!(path = %path.display(), users = store.users.len(), "store snapshot loaded");
        Ok(store)
    }

    /// Write every user document to `path`, replacing it atomically.
    pub async fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let path = path.as_ref();
        let snapshot = Snapshot {
            users: self.users.iter().map(|entry| entry.value().clone()).collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio_fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("tmp");
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn index(&self, user: &User) -> StoreResult<()> {
        claim(&self.by_username, &user.username, &user.key, "username")?;
        claim(&self.by_email, &user.email, &user.key, "email")?;
        if let Some(verifier) = &user.verifier {
            claim(&self.by_verifier, verifier, &user.key, "verifier")?;
        }
        Ok(())
    }

    fn lookup(&self, index: &DashMap<String, String>, value: &str) -> Option<User> {
        let key = index.get(value).map(|entry| entry.value().clone())?;
        self.users.get(&key).map(|entry| entry.value().clone())
    }
}

/// Point a unique index entry at `key`; taken by another key is a conflict.
fn claim(index: &DashMap<String, String>, value: &str, key: &str, what: &str) -> StoreResult<()> {
    match index.entry(value.to_string()) {
        Entry::Occupied(occupied) if occupied.get() != key => {
            Err(StoreError::Conflict(format!("{what} already taken")))
        },
        Entry::Occupied(_) => Ok(()),
        Entry::Vacant(vacant) => {
            vacant.insert(key.to_string());
            Ok(())
        },
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_key(&self, key: &str) -> StoreResult<Option<User>> {
        Ok(self.users.get(key).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lookup(&self.by_email, email))
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.lookup(&self.by_username, username))
    }

    async fn create(&self, new: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let user = User {
            key: Uuid::new_v4().to_string(),
            email: new.email,
            username: new.username,
            roles: new.roles,
            verifier: None,
            sessions: Vec::new(),
            logins: Vec::new(),
            subscriber: false,
            created: now,
        };

        // The email slot stays locked until the document is visible, so a
        // racing create that loses on email can always find the winner.
        let email_slot = match self.by_email.entry(user.email.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict("email already taken".to_string()));
            },
            Entry::Vacant(vacant) => vacant,
        };
        claim(&self.by_username, &user.username, &user.key, "username")?;

        self.users.insert(user.key.clone(), user.clone());
        email_slot.insert(user.key.clone());
        Ok(user)
    }

    async fn update(&self, key: &str, update: UserUpdate) -> StoreResult<User> {
        let mut entry = self.users.get_mut(key).ok_or(StoreError::NotFound)?;

        let mut draft = entry.value().clone();
        update.apply(&mut draft)?;

        if draft.verifier != entry.verifier {
            if let Some(verifier) = &draft.verifier {
                claim(&self.by_verifier, verifier, key, "verifier")?;
            }
            if let Some(previous) = &entry.verifier {
                self.by_verifier.remove_if(previous, |_, owner| owner == key);
            }
        }

        *entry.value_mut() = draft;
        Ok(entry.value().clone())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment_or_reset(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision> {
        let mut entry = self
            .rate_limits
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::opened_at(now));
        Ok(entry.value_mut().record(now, window, max))
    }

    async fn purge_expired(&self, window: Duration, now: DateTime<Utc>) -> StoreResult<usize> {
        let before = self.rate_limits.len();
        self.rate_limits
            .retain(|_, entry| !entry.window_elapsed(now, window));
        Ok(before.saturating_sub(self.rate_limits.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::RoleSet;
    use grimstack_common::Role;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn verifier_owner(store: &MemoryStore, verifier: &str) -> Option<String> {
        store.by_verifier.get(verifier).map(|entry| entry.value().clone())
    }

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            roles: RoleSet::of(&[Role::Unverified]),
        }
    }

    #[tokio::test]
    async fn test_create_enforces_unique_username_and_email() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let alice = store.create(new_user("a@x.com", "alice"), now).await.unwrap();

        let same_name = store.create(new_user("b@x.com", "alice"), now).await;
        assert!(matches!(same_name, Err(StoreError::Conflict(_))));

        let same_email = store.create(new_user("a@x.com", "bob"), now).await;
        assert!(matches!(same_email, Err(StoreError::Conflict(_))));
        // the failed create must not leave its username claimed
        assert!(store.find_by_username("bob").await.unwrap().is_none());
        store.create(new_user("b@x.com", "bob"), now).await.unwrap();

        let found = store.find_by_details("a@x.com", "alice").await.unwrap();
        assert_eq!(found.map(|u| u.key), Some(alice.key));
        assert!(store
            .find_by_details("a@x.com", "bob")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_verifier_index_follows_updates() {
        let store = MemoryStore::new();
        let user = store
            .create(new_user("a@x.com", "alice"), Utc::now())
            .await
            .unwrap();

        store
            .update(&user.key, UserUpdate::SetVerifier("v1".to_string()))
            .await
            .unwrap();
        store
            .update(&user.key, UserUpdate::SetVerifier("v2".to_string()))
            .await
            .unwrap();
        assert!(verifier_owner(&store, "v1").is_none());
        assert_eq!(verifier_owner(&store, "v2"), Some(user.key.clone()));

        let stale = store
            .update(
                &user.key,
                UserUpdate::ConsumeVerifier {
                    expected: "v1".to_string(),
                },
            )
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
        // a failed update leaves the document untouched
        let current = store.find_by_key(&user.key).await.unwrap().unwrap();
        assert_eq!(current.verifier.as_deref(), Some("v2"));

        store
            .update(
                &user.key,
                UserUpdate::ConsumeVerifier {
                    expected: "v2".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(verifier_owner(&store, "v2").is_none());
    }

    #[tokio::test]
    async fn test_taken_username_leaves_email_free() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.create(new_user("a@x.com", "alice"), now).await.unwrap();

        let taken = store.create(new_user("b@x.com", "alice"), now).await;
        assert!(matches!(taken, Err(StoreError::Conflict(_))));
        assert!(store.find_by_email("b@x.com").await.unwrap().is_none());
        store.create(new_user("b@x.com", "bob"), now).await.unwrap();
        assert_eq!(store.user_count(), 2);
    }

    #[tokio::test]
    async fn test_verifier_is_unique_across_users() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let alice = store.create(new_user("a@x.com", "alice"), now).await.unwrap();
        let bob = store.create(new_user("b@x.com", "bob"), now).await.unwrap();

        store
            .update(&alice.key, UserUpdate::SetVerifier("v1".to_string()))
            .await
            .unwrap();
        let clash = store
            .update(&bob.key, UserUpdate::SetVerifier("v1".to_string()))
            .await;
        assert!(matches!(clash, Err(StoreError::Conflict(_))));
        let bob = store.find_by_key(&bob.key).await.unwrap().unwrap();
        assert!(bob.verifier.is_none());
        assert_eq!(verifier_owner(&store, "v1"), Some(alice.key));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_creates_leave_one_user() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                match store.create(new_user("a@x.com", "alice"), now).await {
                    Ok(user) => Some(user.key),
                    Err(StoreError::Conflict(_)) => {
                        // the winner is always visible to a loser
                        let winner = store.find_by_details("a@x.com", "alice").await.unwrap();
                        assert!(winner.is_some());
                        None
                    },
                    Err(e) => panic!("unexpected {e}"),
                }
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_user() {
        let store = MemoryStore::new();
        let result = store.update("missing", UserUpdate::ToggleSubscriber).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_concurrent_session_appends_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create(new_user("a@x.com", "alice"), Utc::now())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            let key = user.key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        &key,
                        UserUpdate::AppendSession {
                            at: 1_000 + i,
                            cutoff: 0,
                            login: true,
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let user = store.find_by_key(&user.key).await.unwrap().unwrap();
        assert_eq!(user.sessions.len(), 50);
        assert_eq!(user.logins.len(), 50);
    }

    #[tokio::test]
    async fn test_concurrent_rate_limit_increments_are_counted() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let window = Duration::from_secs(300);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment_or_reset("a@x.com", window, 3, now)
                    .await
                    .unwrap()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() == RateLimitDecision::Allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn test_purge_expired_rate_limits() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(300);
        let start = Utc::now();
        store
            .increment_or_reset("old@x.com", window, 3, start)
            .await
            .unwrap();
        let later = start + chrono::Duration::seconds(200);
        store
            .increment_or_reset("new@x.com", window, 3, later)
            .await
            .unwrap();

        let purged = store
            .purge_expired(window, start + chrono::Duration::seconds(301))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store").join("users.json");

        let store = MemoryStore::new();
        let user = store
            .create(new_user("a@x.com", "alice"), Utc::now())
            .await
            .unwrap();
        store
            .update(&user.key, UserUpdate::SetVerifier("v1".to_string()))
            .await
            .unwrap();
        store.save_snapshot(&path).await.unwrap();

        let loaded = MemoryStore::load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.user_count(), 1);
        assert_eq!(verifier_owner(&loaded, "v1"), Some(user.key.clone()));
        let found = loaded.find_by_key(&user.key).await.unwrap().unwrap();
        assert_eq!(found, store.find_by_key(&user.key).await.unwrap().unwrap());

        let empty = MemoryStore::load_snapshot(temp_dir.path().join("missing.json"))
            .await
            .unwrap();
        assert_eq!(empty.user_count(), 0);
    }
}
