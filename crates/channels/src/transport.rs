use std::time::Duration;

use {
    async_trait::async_trait,
    handoff_common::ConversationIdentity,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{Error, Result};

// ── Inbound ─────────────────────────────────────────────────────────────────

/// Kind of an inbound activity as reported by the channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Message,
    Typing,
    ConversationUpdate,
    /// Any adapter-specific kind the router does not interpret.
    Other(String),
}

/// One inbound activity, stripped down to what routing needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundActivity {
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl InboundActivity {
    /// A plain text message.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Message,
            text: Some(text.into()),
        }
    }

    pub fn typing() -> Self {
        Self {
            kind: ActivityKind::Typing,
            text: None,
        }
    }

    /// The message text, if this is a message with non-empty text.
    pub fn text_content(&self) -> Option<&str> {
        match (&self.kind, self.text.as_deref()) {
            (ActivityKind::Message, Some(text)) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// Reply into the conversation the current inbound activity came from.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, text: &str) -> Result<()>;
}

/// Re-open (or reuse) the conversation of an arbitrary captured identity and
/// deliver text into it.
#[async_trait]
pub trait ConversationOpener: Send + Sync {
    async fn send_to(&self, to: &ConversationIdentity, text: &str) -> Result<()>;
}

/// Deliver through `opener`, giving up after `timeout`.
///
/// The counterpart conversation may no longer exist on the transport side, so
/// every forward is bounded.
pub async fn send_with_timeout(
    opener: &dyn ConversationOpener,
    to: &ConversationIdentity,
    text: &str,
    timeout: Duration,
) -> Result<()> {
    to.validate().map_err(Error::invalid_input)?;
    match tokio::time::timeout(timeout, opener.send_to(to, text)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(conversation_id = %to.conversation.id, ?timeout, "forward timed out");
            Err(Error::timeout(&to.conversation.id, timeout))
        },
    }
}
