// ============================
// crates/backend-lib/src/storage/mod.rs
// ============================
//! Storage abstraction over the document store.
//!
//! Every mutation is a typed [`UserUpdate`] applied by the store as one atomic
//! step against its latest copy of the document. Callers never read a user,
//! modify it locally and write the whole document back.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grimstack_common::Role;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::auth::rate_limit::RateLimitDecision;
use crate::auth::roles::RoleSet;

mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    /// A unique constraint or an update precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Number of fresh logins kept in a user's audit list
pub const LOGIN_HISTORY_LIMIT: usize = 100;

/// A user account document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub key: String,
    pub email: String,
    pub username: String,
    pub roles: RoleSet,
    /// The single outstanding magic-link verifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    /// Session markers: issuance times (unix millis) of live sessions
    #[serde(default)]
    pub sessions: Vec<i64>,
    /// Most recent fresh logins (unix millis); renewals are not recorded here
    #[serde(default)]
    pub logins: Vec<i64>,
    #[serde(default)]
    pub subscriber: bool,
    pub created: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_roles(&self, required: RoleSet) -> bool {
        self.roles.is_superset(required)
    }

    pub fn is_verified(&self) -> bool {
        self.has_role(Role::Verified)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn has_session(&self, marker: i64) -> bool {
        self.sessions.contains(&marker)
    }

    /// True when some marker is at or before `cutoff`
    pub fn has_stale_sessions(&self, cutoff: i64) -> bool {
        self.sessions.iter().any(|at| *at <= cutoff)
    }
}

/// Fields for a user that does not exist yet
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub roles: RoleSet,
}

/// Atomic partial updates to a user document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpdate {
    /// Replace the outstanding verifier
    SetVerifier(String),
    /// Clear the verifier only if it equals `expected`, promoting an
    /// unverified user to verified. Fails with a conflict otherwise.
    ConsumeVerifier { expected: String },
    /// Drop markers at or before `cutoff`, then append `at`
    AppendSession { at: i64, cutoff: i64, login: bool },
    /// Remove the first marker equal to `at`, if present
    RemoveSession { at: i64 },
    /// Drop markers at or before `cutoff`
    PruneSessions { cutoff: i64 },
    ToggleSubscriber,
    GrantRole(Role),
}

impl UserUpdate {
    /// Apply the update to a document.
    ///
    /// On error the document must be discarded; stores apply updates to a
    /// draft and only commit it on success.
    pub fn apply(&self, user: &mut User) -> StoreResult<()> {
        match self {
            UserUpdate::SetVerifier(verifier) => {
                user.verifier = Some(verifier.clone());
            },
            UserUpdate::ConsumeVerifier { expected } => {
                if user.verifier.as_deref() != Some(expected.as_str()) {
                    return Err(StoreError::Conflict("verifier mismatch".to_string()));
                }
                user.verifier = None;
                if user.roles.contains(Role::Unverified) {
                    user.roles.remove(Role::Unverified);
                    user.roles.insert(Role::Verified);
                }
            },
            UserUpdate::AppendSession { at, cutoff, login } => {
                user.sessions.retain(|marker| marker > cutoff);
                user.sessions.push(*at);
                if *login {
                    user.logins.push(*at);
                    let excess = user.logins.len().saturating_sub(LOGIN_HISTORY_LIMIT);
                    user.logins.drain(..excess);
                }
            },
            UserUpdate::RemoveSession { at } => {
                if let Some(pos) = user.sessions.iter().position(|marker| marker == at) {
                    user.sessions.remove(pos);
                }
            },
            UserUpdate::PruneSessions { cutoff } => {
                user.sessions.retain(|marker| marker > cutoff);
            },
            UserUpdate::ToggleSubscriber => {
                user.subscriber = !user.subscriber;
            },
            UserUpdate::GrantRole(role) => {
                user.roles.insert(*role);
            },
        }
        Ok(())
    }
}

/// User document collection.
///
/// Username, email and outstanding verifier are unique.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_key(&self, key: &str) -> StoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Insert a new user; a taken username or email is a conflict
    async fn create(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User>;

    /// Apply one atomic partial update and return the new document
    async fn update(&self, key: &str, update: UserUpdate) -> StoreResult<User>;

    /// Find the user holding both this email and this username
    async fn find_by_details(&self, email: &str, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .find_by_email(email)
            .await?
            .filter(|user| user.username == username))
    }
}

/// Fixed-window counters keyed by identity
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key` as a single atomic step: start a new
    /// window when none is open or the open one has elapsed, otherwise
    /// increment, and report whether the count is still within `max`.
    async fn increment_or_reset(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision>;

    /// Drop every entry whose window has elapsed
    async fn purge_expired(&self, window: Duration, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Bound a store call; running out of time means the store is unavailable.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "store call exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
