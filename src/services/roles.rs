//! Group membership per user.

use crate::models::claims::Role;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{collections::BTreeSet, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RoleError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Parse a comma separated list of preferred roles given at sign-up.
///
/// Only exact `Subscriber` / `Publisher` entries are kept; anything else, or
/// nothing at all, yields `[Subscriber]`.
pub fn parse_preferred_roles(raw: &str) -> Vec<Role> {
    let roles: BTreeSet<Role> = raw
        .split(',')
        .map(str::trim)
        .filter_map(|name| Role::from_str(name).ok())
        .collect();
    if roles.is_empty() {
        debug!(raw, "no valid preferred roles, defaulting to Subscriber");
        return vec![Role::Subscriber];
    }
    roles.into_iter().collect()
}

/// Case-insensitive role name, e.g. `publisher` or `SUBSCRIBER`.
fn normalize_role(raw: &str) -> Option<Role> {
    let lower = raw.trim().to_lowercase();
    let mut chars = lower.chars();
    let first = chars.next()?;
    let capitalized: String = first.to_uppercase().chain(chars).collect();
    Role::from_str(&capitalized).ok()
}

#[derive(Clone)]
pub struct RoleDirectory {
    db: Arc<SqlitePool>,
}

impl RoleDirectory {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Add the user's preferred roles to whatever they already hold.
    pub async fn enroll(
        &self,
        user_id: &str,
        preferred: Option<&str>,
    ) -> Result<Vec<Role>, RoleError> {
        let requested = parse_preferred_roles(preferred.unwrap_or_default());
        let mut tx = self.db.begin().await?;
        for role in &requested {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role, assigned_at) VALUES (?, ?, ?)
                 ON CONFLICT(user_id, role) DO NOTHING",
            )
            .bind(user_id)
            .bind(role.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(user_id, roles = ?requested, "enrolled user");
        self.roles(user_id).await
    }

    /// Replace the user's roles with `requested`. Names are matched
    /// case-insensitively; unknown names are ignored.
    pub async fn set_roles<S: AsRef<str>>(
        &self,
        user_id: &str,
        requested: &[S],
    ) -> Result<Vec<Role>, RoleError> {
        let roles: BTreeSet<Role> = requested
            .iter()
            .filter_map(|name| normalize_role(name.as_ref()))
            .collect();

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role, assigned_at) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(role.as_str())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(user_id, roles = ?roles, "updated user roles");
        Ok(roles.into_iter().collect())
    }

    pub async fn roles(&self, user_id: &str) -> Result<Vec<Role>, RoleError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT role FROM user_roles WHERE user_id = ? ORDER BY role ASC",
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(names
            .iter()
            .filter_map(|name| Role::from_str(name).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    async fn directory() -> RoleDirectory {
        RoleDirectory::new(Arc::new(memory_pool().await))
    }

    #[test]
    fn preferred_roles_default_to_subscriber() {
        assert_eq!(parse_preferred_roles(""), vec![Role::Subscriber]);
        assert_eq!(parse_preferred_roles("admin, root"), vec![Role::Subscriber]);
        assert_eq!(parse_preferred_roles("publisher"), vec![Role::Subscriber]);
    }

    #[test]
    fn preferred_roles_keep_exact_names() {
        assert_eq!(parse_preferred_roles(" Publisher "), vec![Role::Publisher]);
        assert_eq!(
            parse_preferred_roles("Subscriber,Publisher, admin"),
            vec![Role::Publisher, Role::Subscriber]
        );
    }

    #[test]
    fn role_names_are_normalized() {
        assert_eq!(normalize_role("publisher"), Some(Role::Publisher));
        assert_eq!(normalize_role("SUBSCRIBER"), Some(Role::Subscriber));
        assert_eq!(normalize_role("sUbScRiBeR"), Some(Role::Subscriber));
        assert_eq!(normalize_role("admin"), None);
        assert_eq!(normalize_role(""), None);
    }

    #[tokio::test]
    async fn set_roles_replaces_previous_groups() {
        let dir = directory().await;
        let first = dir.set_roles("user-1", &["publisher", "subscriber"]).await.unwrap();
        assert_eq!(first, vec![Role::Publisher, Role::Subscriber]);

        let second = dir.set_roles("user-1", &["SUBSCRIBER", "admin"]).await.unwrap();
        assert_eq!(second, vec![Role::Subscriber]);
        assert_eq!(dir.roles("user-1").await.unwrap(), vec![Role::Subscriber]);

        let cleared = dir.set_roles::<&str>("user-1", &[]).await.unwrap();
        assert!(cleared.is_empty());
        assert!(dir.roles("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enroll_adds_preferred_roles() {
        let dir = directory().await;
        assert_eq!(dir.enroll("user-1", None).await.unwrap(), vec![Role::Subscriber]);
        assert_eq!(
            dir.enroll("user-1", Some("Publisher")).await.unwrap(),
            vec![Role::Publisher, Role::Subscriber]
        );
        assert!(dir.roles("user-2").await.unwrap().is_empty());
    }
}
