//! Identity claims forwarded by the upstream gateway.

use serde::{Deserialize, Serialize};
use std::{collections::{BTreeSet, HashMap}, fmt, str::FromStr};

/// Claim carrying the caller's group list, e.g. `[Publisher, Subscriber]`.
pub const GROUPS_CLAIM: &str = "cognito:groups";
/// Claim carrying the caller's stable user id.
pub const SUBJECT_CLAIM: &str = "sub";
/// Claim carrying the caller's user name.
pub const USERNAME_CLAIM: &str = "username";

/// Decoded claim bag: claim name to string value.
pub type Claims = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Publisher => "Publisher",
            Role::Subscriber => "Subscriber",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Exact, case-sensitive match on the group name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Publisher" => Ok(Role::Publisher),
            "Subscriber" => Ok(Role::Subscriber),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

/// Raw group names parsed out of the groups claim.
///
/// Unknown names are kept so the set mirrors the claim exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn has(&self, role: Role) -> bool {
        self.contains(role.as_str())
    }

    /// Whether this set grants `required`. Publishers implicitly hold
    /// subscriber privileges.
    pub fn grants(&self, required: Role) -> bool {
        match required {
            Role::Publisher => self.has(Role::Publisher),
            Role::Subscriber => self.has(Role::Subscriber) || self.has(Role::Publisher),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
