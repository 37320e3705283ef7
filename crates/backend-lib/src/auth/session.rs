// ============================
// crates/backend-lib/src/auth/session.rs
// ============================
//! Session issuance, validation, renewal and logout.
//!
//! A session is a session-class token whose issuance time (unix millis) is
//! also recorded as a marker on the owning user. The token is only honoured
//! while its marker is present, so removing a marker revokes exactly one
//! session.
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::token::{Token, TokenCodec, TokenError};
use crate::error::{AppError, AppResult};
use crate::metrics::{SESSION_ISSUED, SESSION_LOGOUT, SESSION_RENEWED};
use crate::storage::{with_timeout, User, UserRepository, UserUpdate};

/// A decoded session token and its owner
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: Token,
    /// The token's marker is still on the user
    pub current: bool,
}

/// Result of authenticating a request
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    /// Replacement token when the presented one was close to expiry
    pub renewed: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    users: Arc<dyn UserRepository>,
    codec: TokenCodec,
    renew_threshold: chrono::Duration,
    timeout: Duration,
}

impl SessionStore {
    /** Create a session store
    # Arguments
    * `users` - user repository holding the markers
    * `codec` - session-class token codec
    * `renew_threshold` - renew tokens with less lifetime left than this
    * `timeout` - bound on each store call */
    pub fn new(
        users: Arc<dyn UserRepository>,
        codec: TokenCodec,
        renew_threshold: Duration,
        timeout: Duration,
    ) -> Result<Self, TokenError> {
        let renew_threshold =
            chrono::Duration::from_std(renew_threshold).map_err(|_| TokenError::InvalidTtl)?;
        Ok(Self {
            users,
            codec,
            renew_threshold,
            timeout,
        })
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.codec.ttl()
    }

    /// Oldest marker value that can still belong to a valid token is
    /// strictly greater than this
    fn cutoff(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.codec.ttl().num_milliseconds()
    }

    /// Issue a session token for `user`, recording its marker and dropping
    /// expired ones in the same update. Renewals are not logged as logins.
    pub async fn issue_session(
        &self,
        user: &User,
        renew: bool,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        let token = self.codec.encode(&user.key, now)?;
        let update = UserUpdate::AppendSession {
            at: now.timestamp_millis(),
            cutoff: self.cutoff(now),
            login: !renew,
        };
        with_timeout(self.timeout, self.users.update(&user.key, update)).await?;

        if renew {
            counter!(SESSION_RENEWED).increment(1);
        } else {
            counter!(SESSION_ISSUED).increment(1);
        }
        tracing::info!(user = %user.username, renew, "session issued");
        Ok(token)
    }

    /// Decode `token`, load its owner, prune stale markers and report
    /// whether the token's marker survives
    pub async fn validate(&self, token: &str, now: DateTime<Utc>) -> AppResult<Session> {
        let token = self.codec.decode(token, now).map_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
            AppError::from(e)
        })?;

        let user = with_timeout(self.timeout, self.users.find_by_key(&token.payload))
            .await?
            .ok_or_else(|| {
                tracing::debug!(key = %token.payload, "session token for unknown user");
                AppError::Unauthorized
            })?;

        let cutoff = self.cutoff(now);
        let user = if user.has_stale_sessions(cutoff) {
            let prune = UserUpdate::PruneSessions { cutoff };
            with_timeout(self.timeout, self.users.update(&user.key, prune)).await?
        } else {
            user
        };

        let current = user.has_session(token.issued_at_millis());
        Ok(Session {
            user,
            token,
            current,
        })
    }

    /// Validate `token`, requiring it to be current, and renew it when its
    /// remaining lifetime is below the threshold. The presented token stays
    /// valid after a renewal.
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> AppResult<Authenticated> {
        let session = self.validate(token, now).await?;
        if !session.current {
            tracing::debug!(user = %session.user.username, "session marker gone");
            return Err(AppError::Unauthorized);
        }

        let renewed = if session.token.expires_before(now + self.renew_threshold) {
            match self.renew(&session, now).await {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(user = %session.user.username, error = %e, "session renewal failed");
                    None
                },
            }
        } else {
            None
        };

        Ok(Authenticated {
            user: session.user,
            renewed,
        })
    }

    /// Replacement for a near-expiry session. A renewal marker newer than
    /// the presented token that is itself clear of the threshold is reused,
    /// so a client repeating the old token does not mint a marker per
    /// request. Markers of other logins are never shared.
    async fn renew(&self, session: &Session, now: DateTime<Utc>) -> AppResult<String> {
        let user = &session.user;
        let issued = session.token.issued_at_millis();
        let fresh_from = (now + self.renew_threshold - self.codec.ttl()).timestamp_millis();
        let reusable = user
            .sessions
            .iter()
            .copied()
            .filter(|at| *at > issued && *at >= fresh_from && !user.logins.contains(at))
            .max();

        match reusable {
            Some(at) => {
                let issued_at = DateTime::<Utc>::from_timestamp_millis(at)
                    .ok_or_else(|| AppError::Internal(format!("marker {at} out of range")))?;
                let token = self.codec.encode(&session.user.key, issued_at)?;
                tracing::debug!(user = %session.user.username, marker = at, "session renewal reused marker");
                Ok(token)
            },
            None => self.issue_session(&session.user, true, now).await,
        }
    }

    /// Remove the marker of `token`
    pub async fn logout(&self, token: &str, now: DateTime<Utc>) -> AppResult<()> {
        let token = self.codec.decode(token, now)?;
        let update = UserUpdate::RemoveSession {
            at: token.issued_at_millis(),
        };
        with_timeout(self.timeout, self.users.update(&token.payload, update)).await?;
        counter!(SESSION_LOGOUT).increment(1);
        Ok(())
    }
}
