//! Database models backing the RBAC entity store.
//!
//! Users, roles and permissions are plain rows; the two many-to-many
//! relationships live in explicit join tables keyed by id pairs.

pub mod permissions;
pub mod role_permissions;
pub mod roles;
pub mod user_roles;
pub mod users;
