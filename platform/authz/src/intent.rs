//! Keyword-based intent detection.
//!
//! Input is lower-cased and split into `\w+` runs, so a rule word only
//! matches as a whole word: "edited" never satisfies "edit".

use std::{collections::HashSet, fmt};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    EditDocument,
    ViewDocument,
    DeleteDocument,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::EditDocument => "edit_document",
            Intent::ViewDocument => "view_document",
            Intent::DeleteDocument => "delete_document",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detection rule: every word must appear in the text.
#[derive(Clone, Copy, Debug)]
pub struct IntentRule {
    pub words: &'static [&'static str],
    pub intent: Intent,
}

/// Evaluated top to bottom; the first rule whose words are all present wins.
pub const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        words: &["edit", "document"],
        intent: Intent::EditDocument,
    },
    IntentRule {
        words: &["view", "document"],
        intent: Intent::ViewDocument,
    },
    IntentRule {
        words: &["delete", "document"],
        intent: Intent::DeleteDocument,
    },
];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern compiles"));

pub fn detect_intent(text: &str) -> Option<Intent> {
    detect_with(INTENT_RULES, text)
}

/// Runs an arbitrary ordered rule table against `text`.
pub fn detect_with(rules: &[IntentRule], text: &str) -> Option<Intent> {
    let lowered = text.to_lowercase();
    let words: HashSet<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();
    rules
        .iter()
        .find(|rule| rule.words.iter().all(|word| words.contains(word)))
        .map(|rule| rule.intent)
}
