// ============================
// crates/backend-lib/src/middleware/mod.rs
// ============================
//! Middleware for the grimstack server.

pub mod auth_gate;

pub use auth_gate::{gate, AuthUser, Gate};
