/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors (spec §4.5).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("channel `{0}` does not exist")]
    NotFound(String),

    #[error("`{0}` is banned from this channel")]
    Banned(String),

    #[error("channel is restricted to {allowed_muds:?}, `{mud}` is not a member")]
    Restricted { mud: String, allowed_muds: Vec<String> },

    #[error("`{0}` is not a member of this channel")]
    NotMember(String),

    #[error("`{0}` is not a moderator of this channel")]
    NotModerator(String),

    #[error("channel `{0}` already exists")]
    AlreadyExists(String),

    #[error("registry error: {0}")]
    Registry(String),
}
