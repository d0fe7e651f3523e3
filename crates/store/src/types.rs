//! Core data types for handoff records.

use std::collections::VecDeque;

use {
    chrono::{DateTime, Utc},
    handoff_common::ConversationIdentity,
    serde::{Deserialize, Serialize},
};

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Display name of whoever wrote it (the user or the agent).
    pub sender: String,
    pub text: String,
}

impl TranscriptMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Who currently handles a user's conversation.
///
/// The queue timestamp and the paired agent live inside the variants, so a
/// record can never carry an agent while queued or a timestamp while paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HandoffState {
    /// Messages go to the bot pipeline.
    #[default]
    Bot,
    /// Waiting for an agent; FIFO position is `queued_at`.
    Queued { queued_at: DateTime<Utc> },
    /// Bridged to a human agent.
    WithAgent { agent: ConversationIdentity },
}

/// Field-less view of [`HandoffState`], used for storage and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Bot,
    Queued,
    WithAgent,
}

impl StateKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Queued => "queued",
            Self::WithAgent => "with_agent",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "bot" => Some(Self::Bot),
            "queued" => Some(Self::Queued),
            "with_agent" => Some(Self::WithAgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl HandoffState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Bot => StateKind::Bot,
            Self::Queued { .. } => StateKind::Queued,
            Self::WithAgent { .. } => StateKind::WithAgent,
        }
    }
}

/// Everything the router knows about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub identity: ConversationIdentity,
    pub state: HandoffState,
    /// Newest first.
    pub messages: VecDeque<TranscriptMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HandoffRecord {
    /// A fresh record in `Bot` state with an empty transcript.
    pub fn new(identity: ConversationIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            state: HandoffState::Bot,
            messages: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user_id(&self) -> &str {
        self.identity.key()
    }

    pub fn display_name(&self) -> &str {
        self.identity.display_name()
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// The paired agent; `Some` exactly when the state is `WithAgent`.
    pub fn agent_identity(&self) -> Option<&ConversationIdentity> {
        match &self.state {
            HandoffState::WithAgent { agent } => Some(agent),
            _ => None,
        }
    }

    /// The queue timestamp; `Some` exactly when the state is `Queued`.
    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            HandoffState::Queued { queued_at } => Some(queued_at),
            _ => None,
        }
    }

    pub fn is_paired_with(&self, agent: &ConversationIdentity) -> bool {
        self.agent_identity() == Some(agent)
    }

    /// Prepend to the transcript.
    pub fn push_message(&mut self, sender: impl Into<String>, text: impl Into<String>) {
        self.messages.push_front(TranscriptMessage::new(sender, text));
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_state(&mut self, state: HandoffState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
