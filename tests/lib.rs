//! Cross-crate integration tests that need external infrastructure.
