use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("value for key `{0}` is not valid json")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
