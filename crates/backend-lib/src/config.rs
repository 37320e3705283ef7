// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Sources are merged in order: built-in defaults, `grimstack.toml`,
//! `grimstack.json`, then `GRIMSTACK_` environment variables with nested keys
//! split on `__` (`GRIMSTACK_RATE_LIMIT__MAX_REQUESTS=5`).
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::auth::token::KEY_LEN;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A secret string, wiped on drop and never printed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::new)
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Product name used in emails
    pub app_name: String,
    /// Public domain; cookie domain and link host in production
    pub domain: String,
    pub dev_mode: bool,
    /// Port used for magic links in dev mode
    pub dev_port: u16,
    pub log_level: String,
    /// Session token key, exactly 32 bytes
    pub token_secret: Secret,
    /// Verifier token key, exactly 32 bytes
    pub verifier_secret: Secret,
    pub session_ttl_secs: u64,
    pub verifier_ttl_secs: u64,
    /// Renew sessions whose remaining lifetime is below this
    pub renew_threshold_secs: u64,
    pub rate_limit: RateLimitSettings,
    pub store: StoreSettings,
    pub mail: MailSettings,
    /// Directory holding `authemail.txt` and `authemail.html`
    pub templates_dir: Option<PathBuf>,
}

/// Verifier issuance limits, per email address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Bound on every store call
    pub timeout_ms: u64,
    /// Where the store snapshot lives; no persistence when unset
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub from_name: String,
    pub from_address: String,
    /// Bounded mail queue length; mail beyond it is dropped
    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            app_name: "Grimstack".to_string(),
            domain: "localhost".to_string(),
            dev_mode: true,
            dev_port: 3000,
            log_level: "info".to_string(),
            token_secret: Secret::default(),
            verifier_secret: Secret::default(),
            session_ttl_secs: 60 * 60 * 24 * 7, // 7 days
            verifier_ttl_secs: 15 * 60,
            renew_threshold_secs: 60 * 60 * 48,
            rate_limit: RateLimitSettings::default(),
            store: StoreSettings::default(),
            mail: MailSettings::default(),
            templates_dir: None,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window_secs: 5 * 60,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            snapshot_path: None,
            snapshot_interval_secs: 60,
        }
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from_name: "Grimstack".to_string(),
            from_address: "noreply@localhost".to_string(),
            queue_capacity: 256,
        }
    }
}

impl Settings {
    /// Load from `grimstack.toml`, `grimstack.json` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("grimstack.toml"))
            .merge(Json::file("grimstack.json"));
        Self::finish(figment)
    }

    /// Load from one file (JSON when it ends in `.json`, TOML otherwise)
    /// and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let figment = Figment::from(Serialized::defaults(Settings::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment
            .merge(Env::prefixed("GRIMSTACK_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secret) in [
            ("token_secret", &self.token_secret),
            ("verifier_secret", &self.verifier_secret),
        ] {
            if secret.as_bytes().len() != KEY_LEN {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be exactly {KEY_LEN} bytes, got {}",
                    secret.as_bytes().len()
                )));
            }
        }
        if self.token_secret == self.verifier_secret {
            return Err(ConfigError::Invalid(
                "token_secret and verifier_secret must differ".to_string(),
            ));
        }

        if self.session_ttl_secs == 0 || self.verifier_ttl_secs == 0 {
            return Err(ConfigError::Invalid("token TTLs must be non-zero".to_string()));
        }
        if self.renew_threshold_secs >= self.session_ttl_secs {
            return Err(ConfigError::Invalid(
                "renew_threshold_secs must be shorter than session_ttl_secs".to_string(),
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be non-zero".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }

        if self.store.timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.timeout_ms must be non-zero".to_string()));
        }
        if self.store.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "store.snapshot_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.mail.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mail.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn verifier_ttl(&self) -> Duration {
        Duration::from_secs(self.verifier_ttl_secs)
    }

    pub fn renew_threshold(&self) -> Duration {
        Duration::from_secs(self.renew_threshold_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// Scheme and host that magic links point at
    pub fn public_base_url(&self) -> String {
        if self.dev_mode {
            format!("https://localhost:{}", self.dev_port)
        } else {
            format!("https://{}", self.domain)
        }
    }
}
