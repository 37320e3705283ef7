// ============================
// crates/backend-lib/src/metrics.rs
// ============================
//! Central place for metric keys
pub const VERIFIER_ISSUED: &str = "auth.verifier.issued";
pub const VERIFIER_CONSUMED: &str = "auth.verifier.consumed";
pub const VERIFIER_REJECTED: &str = "auth.verifier.rejected";
pub const AUTH_RATE_LIMITED: &str = "auth.rate_limited";
pub const SESSION_ISSUED: &str = "session.issued";
pub const SESSION_RENEWED: &str = "session.renewed";
pub const SESSION_LOGOUT: &str = "session.logout";
pub const GATE_REJECTED: &str = "gate.rejected";
pub const MAIL_SENT: &str = "mail.sent";
pub const MAIL_FAILED: &str = "mail.failed";
pub const MAIL_DROPPED: &str = "mail.dropped";
