//! Repository contract for users, roles, permissions and their links.
//!
//! The access evaluator only ever talks to an [`EntityStore`], so the same
//! decision code runs against the relational backend in production and the
//! [`MemoryStore`](crate::MemoryStore) in tests.

use std::{collections::BTreeSet, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Store-assigned row identifier.
pub type EntityId = i32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: EntityId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub id: EntityId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful `link_role_to_user`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleAssignment {
    pub user: User,
    pub role: Role,
}

/// Result of a successful `link_permission_to_role`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionGrant {
    pub role: Role,
    pub permission: Permission,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Role,
    Permission,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Role => "role",
            EntityKind::Permission => "permission",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} name must not be empty")]
    EmptyName { kind: EntityKind },
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: EntityKind, name: String },
    #[error("{owner} {owner_name:?} already has {target} {target_name:?}")]
    AlreadyLinked {
        owner: EntityKind,
        owner_name: String,
        target: EntityKind,
        target_name: String,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rejects empty and whitespace-only names. Names are otherwise stored verbatim.
pub fn validate_name(kind: EntityKind, name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::EmptyName { kind });
    }
    Ok(())
}

/// Persistence seam for the RBAC entity graph.
///
/// Creations and links are atomic: they either record the row or fail with
/// [`StoreError`] and leave no partial state behind.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_user(&self, username: &str) -> StoreResult<User>;
    async fn create_role(&self, name: &str) -> StoreResult<Role>;
    async fn create_permission(&self, name: &str) -> StoreResult<Permission>;

    async fn find_user(&self, id: EntityId) -> StoreResult<Option<User>>;
    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_role(&self, id: EntityId) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;
    async fn find_permission(&self, id: EntityId) -> StoreResult<Option<Permission>>;
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;

    /// Roles linked to the user, ordered by name.
    async fn roles_of(&self, user_id: EntityId) -> StoreResult<Vec<Role>>;
    /// Permissions linked to the role, ordered by name.
    async fn permissions_of(&self, role_id: EntityId) -> StoreResult<Vec<Permission>>;

    async fn link_role_to_user(
        &self,
        user_id: EntityId,
        role_id: EntityId,
    ) -> StoreResult<RoleAssignment>;
    async fn link_permission_to_role(
        &self,
        role_id: EntityId,
        permission_id: EntityId,
    ) -> StoreResult<PermissionGrant>;

    /// Effective permission set: union of permission names over every role
    /// currently assigned to the user.
    async fn permission_names_of(&self, user_id: EntityId) -> StoreResult<BTreeSet<String>> {
        let mut held = BTreeSet::new();
        for role in self.roles_of(user_id).await? {
            for permission in self.permissions_of(role.id).await? {
                held.insert(permission.name);
            }
        }
        Ok(held)
    }

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
