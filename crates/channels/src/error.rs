use std::{error::Error as StdError, time::Duration};

/// Crate-wide result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transport errors shared across channel adapters.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// The target conversation cannot be reopened (unknown, expired, removed).
    #[error("conversation unavailable: {conversation_id}")]
    ConversationUnavailable { conversation_id: String },

    /// Delivery did not complete within the allowed time.
    #[error("send to {conversation_id} timed out after {elapsed:?}")]
    Timeout {
        conversation_id: String,
        elapsed: Duration,
    },

    /// Wrapped source error from the underlying transport.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn conversation_unavailable(conversation_id: impl std::fmt::Display) -> Self {
        Self::ConversationUnavailable {
            conversation_id: conversation_id.to_string(),
        }
    }

    #[must_use]
    pub fn timeout(conversation_id: impl std::fmt::Display, elapsed: Duration) -> Self {
        Self::Timeout {
            conversation_id: conversation_id.to_string(),
            elapsed,
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
