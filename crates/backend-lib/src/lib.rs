// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Passwordless authentication and session core for the grimstack server.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod storage;
pub mod validation;

use std::sync::Arc;

use crate::auth::{RateLimiter, SessionStore, TokenCodec, VerifierFlow};
use crate::config::{ConfigError, Settings};
use crate::mail::templates::{TemplateRenderer, Templates};
use crate::mail::MailQueue;
use crate::storage::{RateLimitStore, UserRepository};

pub use crate::router::create_router;

/// Application state shared across all handlers.
///
/// Built once at startup; nothing in it changes afterwards.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<SessionStore>,
    pub limiter: RateLimiter,
    pub verifier: VerifierFlow,
}

impl AppState {
    /** Wire every component over one store
    # Arguments
    * `settings` - validated here; invalid settings are a startup error
    * `store` - user documents and rate-limit counters
    * `mail` - queue feeding the mail worker */
    pub fn new<S>(settings: Settings, store: Arc<S>, mail: MailQueue) -> Result<Self, ConfigError>
    where
        S: UserRepository + RateLimitStore + 'static,
    {
        let renderer: Arc<dyn TemplateRenderer> = match &settings.templates_dir {
            Some(dir) => Arc::new(
                Templates::from_dir(dir).map_err(|e| ConfigError::Invalid(e.to_string()))?,
            ),
            None => Arc::new(Templates::builtin()),
        };
        Self::with_renderer(settings, store, mail, renderer)
    }

    /// Like [`AppState::new`] with custom email templates
    pub fn with_renderer<S>(
        settings: Settings,
        store: Arc<S>,
        mail: MailQueue,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self, ConfigError>
    where
        S: UserRepository + RateLimitStore + 'static,
    {
        settings.validate()?;
        let settings = Arc::new(settings);
        let timeout = settings.store_timeout();
        let users: Arc<dyn UserRepository> = store.clone();
        let limits: Arc<dyn RateLimitStore> = store;

        let invalid = |e: auth::TokenError| ConfigError::Invalid(e.to_string());
        let session_codec = TokenCodec::new(settings.token_secret.as_bytes(), settings.session_ttl())
            .map_err(invalid)?;
        let verifier_codec =
            TokenCodec::new(settings.verifier_secret.as_bytes(), settings.verifier_ttl())
                .map_err(invalid)?;

        let sessions = Arc::new(
            SessionStore::new(
                users.clone(),
                session_codec,
                settings.renew_threshold(),
                timeout,
            )
            .map_err(invalid)?,
        );
        let limiter = RateLimiter::new(
            limits,
            settings.rate_limit.max_requests,
            settings.rate_limit_window(),
            timeout,
        );
        let verifier = VerifierFlow::new(
            users.clone(),
            limiter.clone(),
            verifier_codec,
            sessions.clone(),
            renderer,
            mail,
            settings.clone(),
        );

        Ok(Self {
            settings,
            users,
            sessions,
            limiter,
            verifier,
        })
    }
}
