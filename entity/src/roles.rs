use crate::{permissions, role_permissions, user_roles, users};
use sea_orm::prelude::{DateTimeWithTimeZone, *};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "roles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "user_roles::Entity")]
    UserRoles,
    #[sea_orm(has_many = "role_permissions::Entity")]
    RolePermissions,
}

impl Related<user_roles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserRoles.def()
    }
}

impl Related<role_permissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RolePermissions.def()
    }
}

impl Related<users::Entity> for Entity {
    fn to() -> RelationDef {
        user_roles::Relation::User.def()
    }

    fn via() -> Option<RelationDef> {
        Some(user_roles::Relation::Role.def().rev())
    }
}

impl Related<permissions::Entity> for Entity {
    fn to() -> RelationDef {
        role_permissions::Relation::Permission.def()
    }

    fn via() -> Option<RelationDef> {
        Some(role_permissions::Relation::Role.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
