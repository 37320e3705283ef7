// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod cookie;
pub mod rate_limit;
pub mod roles;
pub mod session;
pub mod token;
pub mod verifier;

pub use cookie::{clear_session_cookie, extract_credential, session_cookie, SESSION_COOKIE_NAME};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use roles::RoleSet;
pub use session::{Authenticated, Session, SessionStore};
pub use token::{Token, TokenCodec, TokenError};
pub use verifier::VerifierFlow;
