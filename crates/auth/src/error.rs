use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("failed to hash credential: {0}")]
    Hash(String),
    #[error("mud `{0}` is already registered")]
    AlreadyRegistered(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
