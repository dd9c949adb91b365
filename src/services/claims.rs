//! Role checks against the claim bag forwarded by the gateway.
//!
//! The groups claim arrives as a bracketed string rather than a JSON array,
//! in one of three shapes: `[A, B]`, `[A B]` or `[]`. All parsing of that
//! value goes through [`parse_role_claim`].

use crate::models::claims::{Claims, GROUPS_CLAIM, Role, RoleSet, SUBJECT_CLAIM, USERNAME_CLAIM};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no group information")]
    MissingGroups,
    #[error("invalid format")]
    InvalidFormat,
    #[error("role required")]
    RoleRequired(Role),
    #[error("User ID not found in token")]
    MissingUserId,
}

/// Parse the raw groups claim into a set of group names.
pub fn parse_role_claim(raw: &str) -> Result<RoleSet, AuthError> {
    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(AuthError::InvalidFormat)?;

    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return Ok(RoleSet::default());
    }
    if trimmed.contains(", ") {
        Ok(trimmed.split(", ").collect())
    } else {
        Ok(trimmed.split_whitespace().collect())
    }
}

/// Check that `claims` grant `required`, returning the parsed set.
pub fn authorize(claims: &Claims, required: Role) -> Result<RoleSet, AuthError> {
    let raw = claims.get(GROUPS_CLAIM).ok_or(AuthError::MissingGroups)?;
    let roles = parse_role_claim(raw)?;
    debug!(raw = %raw, parsed = ?roles, required = %required, "checking role claim");
    if roles.grants(required) {
        Ok(roles)
    } else {
        Err(AuthError::RoleRequired(required))
    }
}

/// Stable id of the caller (`sub`).
pub fn subject(claims: &Claims) -> Result<&str, AuthError> {
    claims
        .get(SUBJECT_CLAIM)
        .map(String::as_str)
        .filter(|sub| !sub.is_empty())
        .ok_or(AuthError::MissingUserId)
}

/// Caller's user name, falling back to `sub`.
pub fn username(claims: &Claims) -> Result<&str, AuthError> {
    claims
        .get(USERNAME_CLAIM)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .map_or_else(|| subject(claims), Ok)
}
