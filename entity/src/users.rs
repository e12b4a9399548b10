use crate::{roles, user_roles};
use sea_orm::prelude::{DateTimeWithTimeZone, *};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "user_roles::Entity")]
    UserRoles,
}

impl Related<user_roles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserRoles.def()
    }
}

impl Related<roles::Entity> for Entity {
    fn to() -> RelationDef {
        user_roles::Relation::Role.def()
    }

    fn via() -> Option<RelationDef> {
        Some(user_roles::Relation::User.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
