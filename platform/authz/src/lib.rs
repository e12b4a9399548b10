//! Access decisions for free-text requests.
//!
//! A request is reduced to an [`Intent`] by keyword rules, the intent is mapped
//! to the permissions it needs, and the decision compares those against the
//! union of permissions granted by the user's roles. Storage is reached only
//! through [`EntityStore`].

mod error;
mod evaluator;
mod intent;
mod memory;
mod store;

pub use error::{AuthzError, AuthzResult};
pub use evaluator::{AccessDecision, INTENT_PERMISSIONS, decide, evaluate, required_permissions};
pub use intent::{INTENT_RULES, Intent, IntentRule, detect_intent, detect_with};
pub use memory::MemoryStore;
pub use store::{
    EntityId, EntityKind, EntityStore, Permission, PermissionGrant, Role, RoleAssignment,
    StoreError, StoreResult, User, validate_name,
};

use tracing::{debug, info, instrument};

/// Resolves `username`, detects the intent behind `input_text` and decides
/// whether the user's roles cover the permissions that intent requires.
///
/// Checks run in a fixed order: input validation, user lookup, intent
/// detection. An unknown user is reported even when the text is unrecognizable.
#[instrument(name = "authz.check_access", skip(store, input_text), fields(backend = store.backend_name()))]
pub async fn check_access<S>(
    store: &S,
    username: &str,
    input_text: &str,
) -> AuthzResult<AccessDecision>
where
    S: EntityStore + ?Sized,
{
    if username.trim().is_empty() || input_text.trim().is_empty() {
        return Err(AuthzError::Validation(
            "username and input_text are required".into(),
        ));
    }

    let user = store
        .find_user_by_name(username)
        .await?
        .ok_or_else(|| AuthzError::UserNotFound(username.to_string()))?;

    let Some(intent) = detect_intent(input_text) else {
        debug!("no intent rule matched");
        return Err(AuthzError::IntentNotRecognized);
    };

    let decision = evaluate(store, &user, intent).await?;
    info!(
        user_id = user.id,
        %intent,
        granted = decision.granted,
        held = decision.held.len(),
        "access evaluated"
    );
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn alice_with_editor_role() -> (MemoryStore, Role, Permission) {
        let store = MemoryStore::new();
        let alice = store.create_user("Alice").await.unwrap();
        let editor = store.create_role("Editor").await.unwrap();
        let edit = store.create_permission("edit_document").await.unwrap();
        store.link_role_to_user(alice.id, editor.id).await.unwrap();
        (store, editor, edit)
    }

    #[tokio::test]
    async fn grants_when_role_carries_permission() {
        let (store, editor, edit) = alice_with_editor_role().await;
        store.link_permission_to_role(editor.id, edit.id).await.unwrap();

        let decision = check_access(&store, "Alice", "Can I edit this document?")
            .await
            .unwrap();
        assert_eq!(decision.intent, Intent::EditDocument);
        assert!(decision.granted);
        assert!(decision.held.contains("edit_document"));
    }

    #[tokio::test]
    async fn denies_when_role_lacks_permission() {
        let (store, _, _) = alice_with_editor_role().await;

        let decision = check_access(&store, "Alice", "Can I edit this document?")
            .await
            .unwrap();
        assert_eq!(decision.intent, Intent::EditDocument);
        assert!(!decision.granted);
        assert!(decision.held.is_empty());
        assert_eq!(decision.missing().collect::<Vec<_>>(), vec!["edit_document"]);
    }

    #[tokio::test]
    async fn granting_a_permission_later_flips_the_decision() {
        let (store, editor, edit) = alice_with_editor_role().await;
        let text = "Can I edit this document?";
        assert!(!check_access(&store, "Alice", text).await.unwrap().granted);

        store.link_permission_to_role(editor.id, edit.id).await.unwrap();
        assert!(check_access(&store, "Alice", text).await.unwrap().granted);
    }

    #[tokio::test]
    async fn unknown_user_is_reported_before_intent() {
        let store = MemoryStore::new();
        let err = check_access(&store, "Bob", "What's the weather?")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::UserNotFound(name) if name == "Bob"));
    }

    #[tokio::test]
    async fn unrecognized_text_is_an_error() {
        let (store, _, _) = alice_with_editor_role().await;
        let err = check_access(&store, "Alice", "What's the weather?")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::IntentNotRecognized));
    }

    #[tokio::test]
    async fn blank_inputs_fail_validation() {
        let store = MemoryStore::new();
        assert!(matches!(
            check_access(&store, "", "edit the document").await,
            Err(AuthzError::Validation(_))
        ));
        assert!(matches!(
            check_access(&store, "Alice", "   ").await,
            Err(AuthzError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn permissions_from_several_roles_combine() {
        let store = MemoryStore::new();
        let alice = store.create_user("Alice").await.unwrap();
        let viewer = store.create_role("Viewer").await.unwrap();
        let janitor = store.create_role("Janitor").await.unwrap();
        let view = store.create_permission("view_document").await.unwrap();
        let delete = store.create_permission("delete_document").await.unwrap();
        store.link_permission_to_role(viewer.id, view.id).await.unwrap();
        store.link_permission_to_role(janitor.id, delete.id).await.unwrap();
        store.link_role_to_user(alice.id, viewer.id).await.unwrap();
        store.link_role_to_user(alice.id, janitor.id).await.unwrap();

        let view_decision = check_access(&store, "Alice", "view the document")
            .await
            .unwrap();
        let delete_decision = check_access(&store, "Alice", "delete the document")
            .await
            .unwrap();
        let edit_decision = check_access(&store, "Alice", "edit the document")
            .await
            .unwrap();
        assert!(view_decision.granted);
        assert!(delete_decision.granted);
        assert!(!edit_decision.granted);
        assert_eq!(edit_decision.held.len(), 2);
    }

    #[tokio::test]
    async fn works_through_a_trait_object() {
        let (store, editor, edit) = alice_with_editor_role().await;
        store.link_permission_to_role(editor.id, edit.id).await.unwrap();
        let store: Box<dyn EntityStore> = Box::new(store);
        let decision = check_access(store.as_ref(), "Alice", "edit document")
            .await
            .unwrap();
        assert!(decision.granted);
    }
}
