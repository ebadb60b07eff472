use api::AuthError;
use store::StoreError;
use thiserror::Error;

/// Failure of an app-shell action that touches both auth and tables.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
