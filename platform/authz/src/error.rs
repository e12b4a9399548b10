use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("user {0:?} not found")]
    UserNotFound(String),
    #[error("intent not recognized")]
    IntentNotRecognized,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
