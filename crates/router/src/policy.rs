//! Deciding whether a sender is a human agent.

use {handoff_common::ConversationIdentity, handoff_config::RouterConfig};

/// Classifies a sender as agent or end user.
pub trait AgentPolicy: Send + Sync {
    fn is_agent(&self, identity: &ConversationIdentity) -> bool;
}

impl<F> AgentPolicy for F
where
    F: Fn(&ConversationIdentity) -> bool + Send + Sync,
{
    fn is_agent(&self, identity: &ConversationIdentity) -> bool {
        self(identity)
    }
}

/// Agents are senders whose display name starts with a prefix, ignoring case.
#[derive(Debug, Clone)]
pub struct NamePrefixPolicy {
    prefix: String,
}

impl NamePrefixPolicy {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().to_lowercase(),
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(&config.agent_name_prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for NamePrefixPolicy {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default())
    }
}

impl AgentPolicy for NamePrefixPolicy {
    fn is_agent(&self, identity: &ConversationIdentity) -> bool {
        identity
            .display_name()
            .to_lowercase()
            .starts_with(&self.prefix)
    }
}
