//! In-memory [`EntityStore`].
//!
//! State lives behind one `tokio::sync::RwLock`; every mutation runs under the
//! write lock, so a creation or link is applied whole or not at all. Nothing is
//! durable. Links are kept as sets of id pairs, mirroring the join tables of
//! the relational backend.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{
    EntityId, EntityKind, EntityStore, Permission, PermissionGrant, Role, RoleAssignment,
    StoreError, StoreResult, User, validate_name,
};

#[derive(Debug, Default)]
struct MemoryState {
    last_user_id: EntityId,
    last_role_id: EntityId,
    last_permission_id: EntityId,
    users: BTreeMap<EntityId, User>,
    roles: BTreeMap<EntityId, Role>,
    permissions: BTreeMap<EntityId, Permission>,
    user_roles: BTreeSet<(EntityId, EntityId)>,
    role_permissions: BTreeSet<(EntityId, EntityId)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create_user(&self, username: &str) -> StoreResult<User> {
        validate_name(EntityKind::User, username)?;
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::User,
                name: username.to_string(),
            });
        }
        state.last_user_id += 1;
        let user = User {
            id: state.last_user_id,
            username: username.to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        validate_name(EntityKind::Role, name)?;
        let mut state = self.state.write().await;
        if state.roles.values().any(|r| r.name == name) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Role,
                name: name.to_string(),
            });
        }
        state.last_role_id += 1;
        let role = Role {
            id: state.last_role_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn create_permission(&self, name: &str) -> StoreResult<Permission> {
        validate_name(EntityKind::Permission, name)?;
        let mut state = self.state.write().await;
        if state.permissions.values().any(|p| p.name == name) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Permission,
                name: name.to_string(),
            });
        }
        state.last_permission_id += 1;
        let permission = Permission {
            id: state.last_permission_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_user(&self, id: EntityId) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_role(&self, id: EntityId) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }

    async fn find_permission(&self, id: EntityId) -> StoreResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn roles_of(&self, user_id: EntityId) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .user_roles
            .range((user_id, EntityId::MIN)..=(user_id, EntityId::MAX))
            .filter_map(|(_, role_id)| state.roles.get(role_id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn permissions_of(&self, role_id: EntityId) -> StoreResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .role_permissions
            .range((role_id, EntityId::MIN)..=(role_id, EntityId::MAX))
            .filter_map(|(_, permission_id)| state.permissions.get(permission_id).cloned())
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn link_role_to_user(
        &self,
        user_id: EntityId,
        role_id: EntityId,
    ) -> StoreResult<RoleAssignment> {
        let mut state = self.state.write().await;
        let user = state.users.get(&user_id).cloned().ok_or(StoreError::NotFound {
            kind: EntityKind::User,
            id: user_id,
        })?;
        let role = state.roles.get(&role_id).cloned().ok_or(StoreError::NotFound {
            kind: EntityKind::Role,
            id: role_id,
        })?;
        if !state.user_roles.insert((user_id, role_id)) {
            return Err(StoreError::AlreadyLinked {
                owner: EntityKind::User,
                owner_name: user.username,
                target: EntityKind::Role,
                target_name: role.name,
            });
        }
        Ok(RoleAssignment { user, role })
    }

    async fn link_permission_to_role(
        &self,
        role_id: EntityId,
        permission_id: EntityId,
    ) -> StoreResult<PermissionGrant> {
        let mut state = self.state.write().await;
        let role = state.roles.get(&role_id).cloned().ok_or(StoreError::NotFound {
            kind: EntityKind::Role,
            id: role_id,
        })?;
        let permission = state
            .permissions
            .get(&permission_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Permission,
                id: permission_id,
            })?;
        if !state.role_permissions.insert((role_id, permission_id)) {
            return Err(StoreError::AlreadyLinked {
                owner: EntityKind::Role,
                owner_name: role.name,
                target: EntityKind::Permission,
                target_name: permission.name,
            });
        }
        Ok(PermissionGrant { role, permission })
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
