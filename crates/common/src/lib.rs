// ============================
// crates/common/src/lib.rs
// ============================
//! Common types and structures
//! shared between the grimstack auth server and its clients.
//! This module defines the JSON bodies of the auth endpoints and the role model.

use serde::{Deserialize, Serialize};

/// Body of `POST /auth`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub email: String,
    pub username: String,
}

/// Acknowledgement body used by `POST /auth` and the gated toggles
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub msg: String,
    pub ok: bool,
}

impl AuthResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ok: true,
        }
    }
}

/// Body of `GET /check-username/{username}`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameAvailability {
    pub ok: bool,
}

/// Error body returned for every failed request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub msg: String,
    pub ok: bool,
    pub code: String,
}

/// Body of `GET /admin`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminProfile {
    pub ok: bool,
    pub username: String,
    pub roles: Vec<Role>,
}

/// Authorization roles a user can hold.
///
/// A user starts out as `Unverified` and is promoted to `Verified` the first
/// time they consume a magic link. `Admin` is only ever granted out of band.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unverified,
    Verified,
    Admin,
}

impl Role {
    /// Every role, in declaration order
    pub const ALL: [Role; 3] = [Role::Unverified, Role::Verified, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unverified => "unverified",
            Role::Verified => "verified",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unverified" => Ok(Role::Unverified),
            "verified" => Ok(Role::Verified),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
