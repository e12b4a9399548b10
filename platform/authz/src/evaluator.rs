//! Permission resolution and the grant decision.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    intent::Intent,
    store::{EntityStore, StoreResult, User},
};

/// Permissions each intent requires. Intents missing here require nothing.
pub const INTENT_PERMISSIONS: &[(Intent, &[&str])] = &[
    (Intent::EditDocument, &["edit_document"]),
    (Intent::ViewDocument, &["view_document"]),
    (Intent::DeleteDocument, &["delete_document"]),
];

pub fn required_permissions(intent: Intent) -> BTreeSet<String> {
    INTENT_PERMISSIONS
        .iter()
        .find(|(candidate, _)| *candidate == intent)
        .map(|(_, names)| names.iter().map(|name| name.to_string()).collect())
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub intent: Intent,
    pub required: BTreeSet<String>,
    pub held: BTreeSet<String>,
    pub granted: bool,
}

impl AccessDecision {
    /// Required permissions the user does not hold.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.required.difference(&self.held).map(String::as_str)
    }
}

/// Grants iff every required permission is held; an empty requirement always grants.
pub fn decide(intent: Intent, held: BTreeSet<String>) -> AccessDecision {
    let required = required_permissions(intent);
    let granted = required.is_subset(&held);
    AccessDecision {
        intent,
        required,
        held,
        granted,
    }
}

/// Resolves the user's effective permission set from the store and decides.
pub async fn evaluate<S>(store: &S, user: &User, intent: Intent) -> StoreResult<AccessDecision>
where
    S: EntityStore + ?Sized,
{
    let held = store.permission_names_of(user.id).await?;
    Ok(decide(intent, held))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn every_intent_has_a_requirement() {
        for intent in [
            Intent::EditDocument,
            Intent::ViewDocument,
            Intent::DeleteDocument,
        ] {
            assert_eq!(required_permissions(intent), set(&[intent.as_str()]));
        }
    }

    #[test]
    fn grants_when_required_is_subset_of_held() {
        let decision = decide(
            Intent::EditDocument,
            set(&["edit_document", "view_document"]),
        );
        assert!(decision.granted);
        assert_eq!(decision.required, set(&["edit_document"]));
        assert_eq!(decision.missing().count(), 0);
    }

    #[test]
    fn denies_and_reports_missing_permissions() {
        let decision = decide(Intent::DeleteDocument, set(&["view_document"]));
        assert!(!decision.granted);
        assert_eq!(decision.missing().collect::<Vec<_>>(), vec!["delete_document"]);
        assert_eq!(decision.held, set(&["view_document"]));
    }

    #[test]
    fn empty_held_set_denies() {
        assert!(!decide(Intent::ViewDocument, BTreeSet::new()).granted);
    }

    #[test]
    fn adding_permissions_never_revokes_a_grant() {
        let universe = [
            "edit_document",
            "view_document",
            "delete_document",
            "unrelated",
        ];
        for intent in [
            Intent::EditDocument,
            Intent::ViewDocument,
            Intent::DeleteDocument,
        ] {
            for mask in 0u32..(1 << universe.len()) {
                let held: BTreeSet<String> = universe
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, name)| name.to_string())
                    .collect();
                let before = decide(intent, held.clone()).granted;
                for extra in universe {
                    let mut grown = held.clone();
                    grown.insert(extra.to_string());
                    let after = decide(intent, grown).granted;
                    assert!(!before || after, "{intent} lost grant after adding {extra}");
                }
            }
        }
    }
}
