//! Demo fixtures: document permissions and three roles bundling them.

use anyhow::{Context, Result};
use platform_authz::{EntityStore, Permission, Role, StoreError};
use tracing::info;

const PERMISSIONS: &[&str] = &["edit_document", "view_document", "delete_document"];

const ROLES: &[(&str, &[&str])] = &[
    ("Editor", &["edit_document", "view_document"]),
    ("Viewer", &["view_document"]),
    ("Admin", &["edit_document", "view_document", "delete_document"]),
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_created: usize,
}

/// Creates missing fixtures. Rows and links that already exist are left alone,
/// so running it twice is harmless.
pub async fn seed(store: &dyn EntityStore) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for name in PERMISSIONS {
        let (_, created) = ensure_permission(store, name).await?;
        report.permissions_created += usize::from(created);
    }

    for (role_name, permission_names) in ROLES {
        let (role, created) = ensure_role(store, role_name).await?;
        report.roles_created += usize::from(created);
        for permission_name in *permission_names {
            let (permission, _) = ensure_permission(store, permission_name).await?;
            match store.link_permission_to_role(role.id, permission.id).await {
                Ok(_) => report.grants_created += 1,
                Err(StoreError::AlreadyLinked { .. }) => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("granting {permission_name} to {role_name}")
                    });
                }
            }
        }
    }

    info!(
        permissions = report.permissions_created,
        roles = report.roles_created,
        grants = report.grants_created,
        "seed complete"
    );
    Ok(report)
}

async fn ensure_permission(store: &dyn EntityStore, name: &str) -> Result<(Permission, bool)> {
    if let Some(existing) = store.find_permission_by_name(name).await? {
        return Ok((existing, false));
    }
    let created = store
        .create_permission(name)
        .await
        .with_context(|| format!("creating permission {name}"))?;
    Ok((created, true))
}

async fn ensure_role(store: &dyn EntityStore, name: &str) -> Result<(Role, bool)> {
    if let Some(existing) = store.find_role_by_name(name).await? {
        return Ok((existing, false));
    }
    let created = store
        .create_role(name)
        .await
        .with_context(|| format!("creating role {name}"))?;
    Ok((created, true))
}
