// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
/** Signed, expiring, URL-safe tokens.
A token binds a payload (a user key) to its issuance time with AES-256-GCM.
Layout before encoding:
`version (1) | issued_at millis, big endian (8) | nonce (12) | ciphertext + tag`
The version, timestamp and nonce are authenticated as associated data, so any
change to any byte fails decryption. The whole buffer is base64 URL-safe
encoded without padding. */
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Version marker, the first byte of every token
pub const TOKEN_VERSION: u8 = 0xBA;

/// Required signing key size in bytes
pub const KEY_LEN: usize = 32;

const TIMESTAMP_LEN: usize = 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + NONCE_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Every decode failure: malformed, tampered, wrong key or expired.
    #[error("unauthorized token")]
    Unauthorized,

    #[error("signing key must be {KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),

    #[error("token ttl is out of range")]
    InvalidTtl,

    #[error("token encryption failed")]
    Encrypt,
}

/// A successfully decoded token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub payload: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Issuance time in unix milliseconds, the session marker value
    pub fn issued_at_millis(&self) -> i64 {
        self.issued_at.timestamp_millis()
    }

    /// True when the token expires before `instant`
    pub fn expires_before(&self, instant: DateTime<Utc>) -> bool {
        self.expires_at < instant
    }
}

/// Encodes and decodes tokens of one TTL class
#[derive(Clone)]
pub struct TokenCodec {
    cipher: Aes256Gcm,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /** Create a codec
    # Arguments
    * `key` - 32 bytes of key material
    * `ttl` - validity window of every token this codec issues */
    pub fn new(key: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        if key.len() != KEY_LEN {
            return Err(TokenError::InvalidKey(key.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| TokenError::InvalidKey(key.len()))?;
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| TokenError::InvalidTtl)?;
        if ttl <= chrono::Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }
        Ok(Self { cipher, ttl })
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Encode `payload` as issued at `issued_at` (millisecond precision)
    pub fn encode(&self, payload: &str, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.push(TOKEN_VERSION);
        header.extend_from_slice(&issued_at.timestamp_millis().to_be_bytes());
        header.extend_from_slice(&nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: payload.as_bytes(),
                    aad: &header,
                },
            )
            .map_err(|_| TokenError::Encrypt)?;

        let mut raw = header;
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decode a token, authenticating it before looking at its contents and
    /// rejecting it unless `now < issued_at + ttl`.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<Token, TokenError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Unauthorized)?;
        if raw.len() < HEADER_LEN + TAG_LEN || raw[0] != TOKEN_VERSION {
            return Err(TokenError::Unauthorized);
        }

        let (header, ciphertext) = raw.split_at(HEADER_LEN);
        let nonce = Nonce::from_slice(&header[1 + TIMESTAMP_LEN..]);
        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| TokenError::Unauthorized)?;

        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&header[1..1 + TIMESTAMP_LEN]);
        let issued_at = DateTime::<Utc>::from_timestamp_millis(i64::from_be_bytes(ts))
            .ok_or(TokenError::Unauthorized)?;
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::Unauthorized)?;
        if now >= expires_at {
            return Err(TokenError::Unauthorized);
        }

        let payload = String::from_utf8(plaintext).map_err(|_| TokenError::Unauthorized)?;
        Ok(Token {
            payload,
            issued_at,
            expires_at,
        })
    }
}
