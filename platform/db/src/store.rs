use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use entity::{permissions, role_permissions, roles, user_roles, users};
use platform_authz::{
    EntityId, EntityKind, EntityStore, Permission, PermissionGrant, Role, RoleAssignment,
    StoreError, StoreResult, User, validate_name,
};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, SqlErr, Statement,
    TransactionTrait,
};
use tracing::{instrument, warn};

use crate::DbPool;

/// [`EntityStore`] over a SeaORM connection (SQLite or Postgres).
///
/// Names are unique and links use composite primary keys, so the schema
/// itself rejects duplicates. Writes also pre-check inside a transaction to
/// report the friendlier error without relying on driver error codes.
#[derive(Clone, Debug)]
pub struct SeaStore {
    db: DbPool,
}

impl SeaStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DbPool {
        &self.db
    }
}

fn user_record(model: users::Model) -> User {
    User {
        id: model.id,
        username: model.username,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn role_record(model: roles::Model) -> Role {
    Role {
        id: model.id,
        name: model.name,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn permission_record(model: permissions::Model) -> Permission {
    Permission {
        id: model.id,
        name: model.name,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.into())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().into()
}

#[async_trait]
impl EntityStore for SeaStore {
    #[instrument(name = "store.create_user", skip(self))]
    async fn create_user(&self, username: &str) -> StoreResult<User> {
        validate_name(EntityKind::User, username)?;
        let already_exists = || StoreError::AlreadyExists {
            kind: EntityKind::User,
            name: username.to_string(),
        };
        let txn = self.db.begin().await.map_err(backend)?;
        let existing = users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&txn)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            return Err(already_exists());
        }
        let model = users::ActiveModel {
            username: Set(username.to_string()),
            created_at: Set(now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                already_exists()
            } else {
                backend(err)
            }
        })?;
        txn.commit().await.map_err(backend)?;
        Ok(user_record(model))
    }

    #[instrument(name = "store.create_role", skip(self))]
    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        validate_name(EntityKind::Role, name)?;
        let already_exists = || StoreError::AlreadyExists {
            kind: EntityKind::Role,
            name: name.to_string(),
        };
        let txn = self.db.begin().await.map_err(backend)?;
        let existing = roles::Entity::find()
            .filter(roles::Column::Name.eq(name))
            .one(&txn)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            return Err(already_exists());
        }
        let model = roles::ActiveModel {
            name: Set(name.to_string()),
            created_at: Set(now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                already_exists()
            } else {
                backend(err)
            }
        })?;
        txn.commit().await.map_err(backend)?;
        Ok(role_record(model))
    }

    #[instrument(name = "store.create_permission", skip(self))]
    async fn create_permission(&self, name: &str) -> StoreResult<Permission> {
        validate_name(EntityKind::Permission, name)?;
        let already_exists = || StoreError::AlreadyExists {
            kind: EntityKind::Permission,
            name: name.to_string(),
        };
        let txn = self.db.begin().await.map_err(backend)?;
        let existing = permissions::Entity::find()
            .filter(permissions::Column::Name.eq(name))
            .one(&txn)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            return Err(already_exists());
        }
        let model = permissions::ActiveModel {
            name: Set(name.to_string()),
            created_at: Set(now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                already_exists()
            } else {
                backend(err)
            }
        })?;
        txn.commit().await.map_err(backend)?;
        Ok(permission_record(model))
    }

    async fn find_user(&self, id: EntityId) -> StoreResult<Option<User>> {
        let model = users::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(user_record))
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        let model = users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(user_record))
    }

    async fn find_role(&self, id: EntityId) -> StoreResult<Option<Role>> {
        let model = roles::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(role_record))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let model = roles::Entity::find()
            .filter(roles::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(role_record))
    }

    async fn find_permission(&self, id: EntityId) -> StoreResult<Option<Permission>> {
        let model = permissions::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(permission_record))
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let model = permissions::Entity::find()
            .filter(permissions::Column::Name.eq(name))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(model.map(permission_record))
    }

    async fn roles_of(&self, user_id: EntityId) -> StoreResult<Vec<Role>> {
        let models = roles::Entity::find()
            .inner_join(user_roles::Entity)
            .filter(user_roles::Column::UserId.eq(user_id))
            .order_by_asc(roles::Column::Name)
            .all(&self.db)
            .await
            .map_err(backend)?;
        Ok(models.into_iter().map(role_record).collect())
    }

    async fn permissions_of(&self, role_id: EntityId) -> StoreResult<Vec<Permission>> {
        let models = permissions::Entity::find()
            .inner_join(role_permissions::Entity)
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .order_by_asc(permissions::Column::Name)
            .all(&self.db)
            .await
            .map_err(backend)?;
        Ok(models.into_iter().map(permission_record).collect())
    }

    #[instrument(name = "store.link_role_to_user", skip(self))]
    async fn link_role_to_user(
        &self,
        user_id: EntityId,
        role_id: EntityId,
    ) -> StoreResult<RoleAssignment> {
        let txn = self.db.begin().await.map_err(backend)?;
        let user = users::Entity::find_by_id(user_id)
            .one(&txn)
            .await
            .map_err(backend)?
            .map(user_record)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::User,
                id: user_id,
            })?;
        let role = roles::Entity::find_by_id(role_id)
            .one(&txn)
            .await
            .map_err(backend)?
            .map(role_record)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Role,
                id: role_id,
            })?;
        let already_linked = |user: &User, role: &Role| StoreError::AlreadyLinked {
            owner: EntityKind::User,
            owner_name: user.username.clone(),
            target: EntityKind::Role,
            target_name: role.name.clone(),
        };
        let existing = user_roles::Entity::find_by_id((user_id, role_id))
            .one(&txn)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            return Err(already_linked(&user, &role));
        }
        let link = user_roles::ActiveModel {
            user_id: Set(user_id),
            role_id: Set(role_id),
            assigned_at: Set(now()),
        };
        if let Err(err) = user_roles::Entity::insert(link)
            .exec_without_returning(&txn)
            .await
        {
            return Err(if is_unique_violation(&err) {
                already_linked(&user, &role)
            } else {
                backend(err)
            });
        }
        txn.commit().await.map_err(backend)?;
        Ok(RoleAssignment { user, role })
    }

    #[instrument(name = "store.link_permission_to_role", skip(self))]
    async fn link_permission_to_role(
        &self,
        role_id: EntityId,
        permission_id: EntityId,
    ) -> StoreResult<PermissionGrant> {
        let txn = self.db.begin().await.map_err(backend)?;
        let role = roles::Entity::find_by_id(role_id)
            .one(&txn)
            .await
            .map_err(backend)?
            .map(role_record)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Role,
                id: role_id,
            })?;
        let permission = permissions::Entity::find_by_id(permission_id)
            .one(&txn)
            .await
            .map_err(backend)?
            .map(permission_record)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Permission,
                id: permission_id,
            })?;
        let already_linked = |role: &Role, permission: &Permission| StoreError::AlreadyLinked {
            owner: EntityKind::Role,
            owner_name: role.name.clone(),
            target: EntityKind::Permission,
            target_name: permission.name.clone(),
        };
        let existing = role_permissions::Entity::find_by_id((role_id, permission_id))
            .one(&txn)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            return Err(already_linked(&role, &permission));
        }
        let link = role_permissions::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(permission_id),
            assigned_at: Set(now()),
        };
        if let Err(err) = role_permissions::Entity::insert(link)
            .exec_without_returning(&txn)
            .await
        {
            return Err(if is_unique_violation(&err) {
                already_linked(&role, &permission)
            } else {
                backend(err)
            });
        }
        txn.commit().await.map_err(backend)?;
        Ok(PermissionGrant { role, permission })
    }

    /// One query: permissions ⋈ role_permissions ⋈ roles ⋈ user_roles.
    async fn permission_names_of(&self, user_id: EntityId) -> StoreResult<BTreeSet<String>> {
        let models = permissions::Entity::find()
            .join(
                JoinType::InnerJoin,
                permissions::Relation::RolePermissions.def(),
            )
            .join(JoinType::InnerJoin, role_permissions::Relation::Role.def())
            .join(JoinType::InnerJoin, roles::Relation::UserRoles.def())
            .filter(user_roles::Column::UserId.eq(user_id))
            .all(&self.db)
            .await
            .map_err(backend)?;
        Ok(models.into_iter().map(|model| model.name).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        let backend_kind = self.db.get_database_backend();
        self.db
            .execute(Statement::from_string(backend_kind, "SELECT 1".to_string()))
            .await
            .map(|_| ())
            .map_err(|err| {
                warn!(error = %err, "database health check failed");
                backend(err)
            })
    }

    fn backend_name(&self) -> &'static str {
        match self.db.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => "postgres",
            sea_orm::DatabaseBackend::Sqlite => "sqlite",
            sea_orm::DatabaseBackend::MySql => "mysql",
        }
    }
}
