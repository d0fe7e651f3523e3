use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] handoff_store::Error),

    #[error(transparent)]
    Channel(#[from] handoff_channels::Error),

    /// The reply sink for the current sender failed.
    #[error("reply to sender failed: {0}")]
    Reply(#[source] handoff_channels::Error),

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The downstream bot pipeline failed. Its error is passed back untouched.
    #[error(transparent)]
    Next(anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the sender should be told that their message was dropped.
    ///
    /// Not when the reply sink is what failed, nor for downstream errors.
    pub fn notifies_sender(&self) -> bool {
        !matches!(self, Self::Next(_) | Self::Reply(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
