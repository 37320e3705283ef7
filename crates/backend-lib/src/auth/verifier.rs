// ============================
// crates/backend-lib/src/auth/verifier.rs
// ============================
//! Magic-link signup and login.
//!
//! `request` finds or creates the user, passes the per-email rate limit,
//! stores a fresh verifier (replacing any outstanding one) and queues the
//! email. `consume` trades a verifier for a session exactly once.
use chrono::{DateTime, Utc};
use grimstack_common::Role;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::rate_limit::RateLimiter;
use crate::auth::roles::RoleSet;
use crate::auth::session::SessionStore;
use crate::auth::token::TokenCodec;
use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::mail::templates::{TemplateError, TemplateRenderer, AUTH_EMAIL_HTML, AUTH_EMAIL_TXT};
use crate::mail::{generate_message_id, Email, MailQueue};
use crate::metrics::{VERIFIER_CONSUMED, VERIFIER_ISSUED, VERIFIER_REJECTED};
use crate::storage::{with_timeout, NewUser, StoreError, User, UserRepository, UserUpdate};
use crate::validation::{is_valid_username, validate_email, validate_username};

#[derive(Clone)]
pub struct VerifierFlow {
    users: Arc<dyn UserRepository>,
    limiter: RateLimiter,
    codec: TokenCodec,
    sessions: Arc<SessionStore>,
    renderer: Arc<dyn TemplateRenderer>,
    mail: MailQueue,
    settings: Arc<Settings>,
}

impl VerifierFlow {
    /** Create the flow
    # Arguments
    * `users` - user repository
    * `limiter` - per-email issuance limiter
    * `codec` - verifier-class token codec
    * `sessions` - issues the session on consumption
    * `renderer` - auth email templates
    * `mail` - outgoing mail queue
    * `settings` - app name, domain and link settings */
    pub fn new(
        users: Arc<dyn UserRepository>,
        limiter: RateLimiter,
        codec: TokenCodec,
        sessions: Arc<SessionStore>,
        renderer: Arc<dyn TemplateRenderer>,
        mail: MailQueue,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            users,
            limiter,
            codec,
            sessions,
            renderer,
            mail,
            settings,
        }
    }

    fn timeout(&self) -> Duration {
        self.settings.store_timeout()
    }

    /// Issue a verifier for (`email`, `username`) and queue the magic link.
    ///
    /// Returns the user as stored after the verifier was set. Mail problems
    /// are logged and never change the result.
    pub async fn request(&self, email: &str, username: &str, now: DateTime<Utc>) -> AppResult<User> {
        let email = validate_email(email)?;
        let username = validate_username(username)?;

        let user = self.find_or_create(&email, username, now).await?;

        if !self.limiter.check(&email, now).await? {
            return Err(AppError::RateLimited);
        }

        let verifier = self.codec.encode(&user.key, now)?;
        let user = with_timeout(
            self.timeout(),
            self.users
                .update(&user.key, UserUpdate::SetVerifier(verifier.clone())),
        )
        .await?;
        counter!(VERIFIER_ISSUED).increment(1);
        tracing::info!(user = %user.username, "verifier issued");

        match self.compose(&user, &verifier) {
            Ok(message) => {
                if let Err(e) = self.mail.enqueue(message) {
                    tracing::warn!(user = %user.username, error = %e, "could not queue auth email");
                }
            },
            Err(e) => {
                tracing::error!(user = %user.username, error = %e, "could not render auth email");
            },
        }

        Ok(user)
    }

    /// Exchange `verifier` for a fresh session token.
    ///
    /// The stored verifier is cleared only when it matches exactly, and an
    /// unverified user is promoted in the same update. Anything else is
    /// `Unauthorized` and changes nothing.
    pub async fn consume(&self, verifier: &str, now: DateTime<Utc>) -> AppResult<(User, String)> {
        let token = self.codec.decode(verifier, now).map_err(|e| {
            tracing::debug!(error = %e, "verifier rejected");
            counter!(VERIFIER_REJECTED).increment(1);
            AppError::from(e)
        })?;

        let consume = UserUpdate::ConsumeVerifier {
            expected: verifier.to_string(),
        };
        let user = match with_timeout(self.timeout(), self.users.update(&token.payload, consume)).await
        {
            Ok(user) => user,
            Err(e @ (StoreError::Conflict(_) | StoreError::NotFound)) => {
                tracing::debug!(error = %e, "verifier does not match");
                counter!(VERIFIER_REJECTED).increment(1);
                return Err(AppError::Unauthorized);
            },
            Err(e) => return Err(e.into()),
        };
        counter!(VERIFIER_CONSUMED).increment(1);

        let session = self.sessions.issue_session(&user, false, now).await?;
        Ok((user, session))
    }

    /// True when `username` is well formed and nobody holds it
    pub async fn is_username_available(&self, username: &str) -> AppResult<bool> {
        if !is_valid_username(username) {
            return Ok(false);
        }
        let holder = with_timeout(self.timeout(), self.users.find_by_username(username)).await?;
        Ok(holder.is_none())
    }

    async fn find_or_create(&self, email: &str, username: &str, now: DateTime<Utc>) -> AppResult<User> {
        if let Some(user) = self.find_by_details(email, username).await? {
            return Ok(user);
        }

        let new = NewUser {
            email: email.to_string(),
            username: username.to_string(),
            roles: RoleSet::of(&[Role::Unverified]),
        };
        match with_timeout(self.timeout(), self.users.create(new, now)).await {
            Ok(user) => {
                tracing::info!(user = %user.username, "user created");
                Ok(user)
            },
            Err(StoreError::Conflict(reason)) => {
                // a concurrent request may have created this exact user
                match self.find_by_details(email, username).await? {
                    Some(user) => Ok(user),
                    None => {
                        tracing::debug!(%reason, "email or username held by another user");
                        Err(AppError::Unauthorized)
                    },
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_details(&self, email: &str, username: &str) -> AppResult<Option<User>> {
        Ok(with_timeout(self.timeout(), self.users.find_by_details(email, username)).await?)
    }

    fn compose(&self, user: &User, verifier: &str) -> Result<Email, TemplateError> {
        let settings = &self.settings;
        let link = format!("{}/auth/{verifier}", settings.public_base_url());
        let vars = HashMap::from([
            ("AppName", settings.app_name.clone()),
            ("Username", user.username.clone()),
            ("Link", link),
            ("Verifier", verifier.to_string()),
            ("Domain", settings.domain.clone()),
        ]);

        let subject = if user.is_verified() {
            format!("Login to {}", settings.app_name)
        } else {
            format!("Welcome to {}", settings.app_name)
        };

        Ok(Email {
            from: format!("{} <{}>", settings.mail.from_name, settings.mail.from_address),
            to: user.email.clone(),
            subject,
            text: self.renderer.render(AUTH_EMAIL_TXT, &vars)?,
            html: self.renderer.render(AUTH_EMAIL_HTML, &vars)?,
            message_id: generate_message_id(&settings.domain),
        })
    }
}
