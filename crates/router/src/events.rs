//! Handoff lifecycle events for dashboards and consoles.

use {async_trait::async_trait, handoff_store::HandoffRecord, serde::Serialize};

/// Queue and pairing transitions, emitted for dashboards and consoles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandoffEvent {
    /// A user asked for an agent and joined the queue.
    Queued { user_id: String, user_name: String },
    /// A user left the queue before an agent picked them up.
    Dequeued { user_id: String, user_name: String },
    Connected {
        user_id: String,
        user_name: String,
        agent_id: String,
        agent_name: String,
    },
    Disconnected {
        user_id: String,
        user_name: String,
        agent_id: String,
        agent_name: String,
    },
}

impl HandoffEvent {
    pub(crate) fn queued(record: &HandoffRecord) -> Self {
        Self::Queued {
            user_id: record.user_id().to_string(),
            user_name: record.display_name().to_string(),
        }
    }

    pub(crate) fn dequeued(record: &HandoffRecord) -> Self {
        Self::Dequeued {
            user_id: record.user_id().to_string(),
            user_name: record.display_name().to_string(),
        }
    }

    pub(crate) fn connected(record: &HandoffRecord, agent_id: &str, agent_name: &str) -> Self {
        Self::Connected {
            user_id: record.user_id().to_string(),
            user_name: record.display_name().to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
        }
    }

    pub(crate) fn disconnected(record: &HandoffRecord, agent_id: &str, agent_name: &str) -> Self {
        Self::Disconnected {
            user_id: record.user_id().to_string(),
            user_name: record.display_name().to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
        }
    }
}

/// Sink for handoff events. The host application provides the concrete
/// implementation (websocket broadcast, console feed, audit log).
#[async_trait]
pub trait HandoffEventSink: Send + Sync {
    async fn emit(&self, event: HandoffEvent);
}
