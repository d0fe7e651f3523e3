use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A conversation identity is missing a field the router keys on.
    #[error("invalid conversation identity: {field} must not be empty")]
    InvalidIdentity { field: &'static str },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_identity(field: &'static str) -> Self {
        Self::InvalidIdentity { field }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
