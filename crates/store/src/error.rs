use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] handoff_common::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// `unpair_agent` on an agent that holds no pairing.
    #[error("agent {agent_id} is not paired with a user")]
    NotPaired { agent_id: String },

    /// A second pairing for an agent that is already paired.
    #[error("agent {agent_id} is already paired with a user")]
    AgentAlreadyPaired { agent_id: String },

    #[error("corrupt handoff record {user_id}: {message}")]
    Corrupt { user_id: String, message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_paired(agent_id: impl Into<String>) -> Self {
        Self::NotPaired {
            agent_id: agent_id.into(),
        }
    }

    #[must_use]
    pub fn agent_already_paired(agent_id: impl Into<String>) -> Self {
        Self::AgentAlreadyPaired {
            agent_id: agent_id.into(),
        }
    }

    #[must_use]
    pub fn corrupt(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            user_id: user_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
