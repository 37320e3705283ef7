// ============================
// crates/backend-lib/src/auth/roles.rs
// ============================
//! Role sets with O(1) membership.

use grimstack_common::Role;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn bit(role: Role) -> u8 {
    match role {
        Role::Unverified => 1 << 0,
        Role::Verified => 1 << 1,
        Role::Admin => 1 << 2,
    }
}

/// A set of roles stored as a bitmask.
///
/// Serialized as a list of role names so stored documents stay readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const fn empty() -> Self {
        RoleSet(0)
    }

    pub fn of(roles: &[Role]) -> Self {
        roles.iter().fold(RoleSet::empty(), |set, role| set.with(*role))
    }

    pub fn contains(self, role: Role) -> bool {
        self.0 & bit(role) != 0
    }

    /// True when every role in `required` is also in `self`
    pub fn is_superset(self, required: RoleSet) -> bool {
        self.0 & required.0 == required.0
    }

    #[must_use]
    pub fn with(self, role: Role) -> Self {
        RoleSet(self.0 | bit(role))
    }

    #[must_use]
    pub fn without(self, role: Role) -> Self {
        RoleSet(self.0 & !bit(role))
    }

    pub fn insert(&mut self, role: Role) {
        *self = self.with(role);
    }

    pub fn remove(&mut self, role: Role) {
        *self = self.without(role);
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |role| self.contains(*role))
    }

    pub fn to_vec(self) -> Vec<Role> {
        self.iter().collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        iter.into_iter().fold(RoleSet::empty(), |set, role| set.with(role))
    }
}

impl Serialize for RoleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for RoleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let roles = Vec::<Role>::deserialize(deserializer)?;
        Ok(roles.into_iter().collect())
    }
}
