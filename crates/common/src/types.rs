//! Conversation identity types shared between the transport, store and router.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An account on a channel (a user, an agent, or the bot itself).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    pub name: String,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The conversation (chat, thread, group) a message belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

/// Everything needed to address one counterpart again later.
///
/// Two identities are equal when their `user.id` matches; the remaining
/// fields are transport metadata used to re-open the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationIdentity {
    pub user: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<ChannelAccount>,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub service_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl ConversationIdentity {
    /// Identity with only the user account filled in. The conversation id
    /// defaults to the user id (a direct-message conversation).
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        let user = ChannelAccount::new(user_id, user_name);
        Self {
            conversation: ConversationAccount {
                id: user.id.clone(),
                ..Default::default()
            },
            user,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_channel(
        mut self,
        channel_id: impl Into<String>,
        service_url: impl Into<String>,
    ) -> Self {
        self.channel_id = channel_id.into();
        self.service_url = service_url.into();
        self
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation: ConversationAccount) -> Self {
        self.conversation = conversation;
        self
    }

    #[must_use]
    pub fn with_bot(mut self, bot: ChannelAccount) -> Self {
        self.bot = Some(bot);
        self
    }

    /// Stable key used for equality, storage and locking.
    pub fn key(&self) -> &str {
        &self.user.id
    }

    pub fn display_name(&self) -> &str {
        &self.user.name
    }

    /// Reject identities the store cannot key on.
    pub fn validate(&self) -> Result<()> {
        if self.user.id.trim().is_empty() {
            return Err(Error::invalid_identity("user.id"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl PartialEq for ConversationIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.user.id == other.user.id
    }
}

impl Eq for ConversationIdentity {}

impl Hash for ConversationIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user.id.hash(state);
    }
}
