use migration::{Migrator, MigratorTrait};
use platform_authz::{
    AuthzError, EntityKind, EntityStore, Intent, StoreError, check_access, detect_intent,
};
use platform_db::{DatabaseSettings, SeaStore, connect};

async fn setup_store() -> SeaStore {
    let pool = connect(&DatabaseSettings::new("sqlite::memory:"))
        .await
        .expect("connect sqlite");
    Migrator::up(&pool, None).await.expect("run migrations");
    SeaStore::new(pool)
}

#[tokio::test]
async fn first_rows_get_id_one() {
    let store = setup_store().await;
    let alice = store.create_user("Alice").await.unwrap();
    let editor = store.create_role("Editor").await.unwrap();
    let edit = store.create_permission("edit_document").await.unwrap();
    assert_eq!((alice.id, editor.id, edit.id), (1, 1, 1));
    assert_eq!(store.create_user("Bob").await.unwrap().id, 2);

    let found = store.find_user(alice.id).await.unwrap().expect("alice");
    assert_eq!(found.username, "Alice");
    assert_eq!(
        store.find_user_by_name("Alice").await.unwrap().map(|u| u.id),
        Some(1)
    );
    assert!(store.find_role(99).await.unwrap().is_none());
    assert_eq!(
        store.find_permission_by_name("edit_document").await.unwrap().map(|p| p.id),
        Some(edit.id)
    );
}

#[tokio::test]
async fn duplicate_creation_reports_already_exists() {
    let store = setup_store().await;
    store.create_user("Alice").await.unwrap();
    store.create_role("Editor").await.unwrap();
    store.create_permission("edit_document").await.unwrap();

    assert!(matches!(
        store.create_user("Alice").await,
        Err(StoreError::AlreadyExists { kind: EntityKind::User, .. })
    ));
    assert!(matches!(
        store.create_role("Editor").await,
        Err(StoreError::AlreadyExists { kind: EntityKind::Role, .. })
    ));
    assert!(matches!(
        store.create_permission("edit_document").await,
        Err(StoreError::AlreadyExists { kind: EntityKind::Permission, .. })
    ));
    assert!(matches!(
        store.create_user("").await,
        Err(StoreError::EmptyName { kind: EntityKind::User })
    ));
}

#[tokio::test]
async fn duplicate_links_report_already_linked() {
    let store = setup_store().await;
    let alice = store.create_user("Alice").await.unwrap();
    let editor = store.create_role("Editor").await.unwrap();
    let edit = store.create_permission("edit_document").await.unwrap();

    let assignment = store.link_role_to_user(alice.id, editor.id).await.unwrap();
    assert_eq!(assignment.user.username, "Alice");
    assert_eq!(assignment.role.name, "Editor");
    let err = store
        .link_role_to_user(alice.id, editor.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyLinked { ref target_name, .. } if target_name == "Editor"));

    let grant = store
        .link_permission_to_role(editor.id, edit.id)
        .await
        .unwrap();
    assert_eq!(grant.permission.name, "edit_document");
    assert!(matches!(
        store.link_permission_to_role(editor.id, edit.id).await,
        Err(StoreError::AlreadyLinked { .. })
    ));

    assert_eq!(store.roles_of(alice.id).await.unwrap().len(), 1);
    assert_eq!(store.permissions_of(editor.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn links_require_existing_rows() {
    let store = setup_store().await;
    let alice = store.create_user("Alice").await.unwrap();
    let editor = store.create_role("Editor").await.unwrap();

    assert!(matches!(
        store.link_role_to_user(alice.id, 5).await,
        Err(StoreError::NotFound { kind: EntityKind::Role, id: 5 })
    ));
    assert!(matches!(
        store.link_role_to_user(9, editor.id).await,
        Err(StoreError::NotFound { kind: EntityKind::User, id: 9 })
    ));
    assert!(matches!(
        store.link_permission_to_role(editor.id, 3).await,
        Err(StoreError::NotFound { kind: EntityKind::Permission, id: 3 })
    ));
    assert!(store.roles_of(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn joined_permission_set_matches_role_walk() {
    let store = setup_store().await;
    let alice = store.create_user("Alice").await.unwrap();
    let editor = store.create_role("Editor").await.unwrap();
    let viewer = store.create_role("Viewer").await.unwrap();
    let edit = store.create_permission("edit_document").await.unwrap();
    let view = store.create_permission("view_document").await.unwrap();
    store.create_permission("delete_document").await.unwrap();

    store.link_permission_to_role(editor.id, edit.id).await.unwrap();
    store.link_permission_to_role(editor.id, view.id).await.unwrap();
    store.link_permission_to_role(viewer.id, view.id).await.unwrap();
    store.link_role_to_user(alice.id, editor.id).await.unwrap();
    store.link_role_to_user(alice.id, viewer.id).await.unwrap();

    let joined = store.permission_names_of(alice.id).await.unwrap();
    let mut walked = std::collections::BTreeSet::new();
    for role in store.roles_of(alice.id).await.unwrap() {
        for permission in store.permissions_of(role.id).await.unwrap() {
            walked.insert(permission.name);
        }
    }
    assert_eq!(joined, walked);
    assert_eq!(
        joined.into_iter().collect::<Vec<_>>(),
        vec!["edit_document", "view_document"]
    );
}

#[tokio::test]
async fn check_access_scenarios() {
    let store = setup_store().await;
    let alice = store.create_user("Alice").await.unwrap();
    let editor = store.create_role("Editor").await.unwrap();
    let edit = store.create_permission("edit_document").await.unwrap();
    store.link_role_to_user(alice.id, editor.id).await.unwrap();

    let text = "Can I edit this document?";
    assert_eq!(detect_intent(text), Some(Intent::EditDocument));
    let denied = check_access(&store, "Alice", text).await.unwrap();
    assert!(!denied.granted);

    store.link_permission_to_role(editor.id, edit.id).await.unwrap();
    let granted = check_access(&store, "Alice", text).await.unwrap();
    assert_eq!(granted.intent, Intent::EditDocument);
    assert!(granted.granted);

    assert!(matches!(
        check_access(&store, "Bob", text).await,
        Err(AuthzError::UserNotFound(_))
    ));
    assert!(matches!(
        check_access(&store, "Alice", "What's the weather?").await,
        Err(AuthzError::IntentNotRecognized)
    ));
}

#[tokio::test]
async fn health_check_and_backend_name() {
    let store = setup_store().await;
    store.health_check().await.unwrap();
    assert_eq!(store.backend_name(), "sqlite");
}
