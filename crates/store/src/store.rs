//! Persistence trait for handoff records and the agent queue.

use {async_trait::async_trait, handoff_common::ConversationIdentity};

use crate::{Result, types::HandoffRecord};

/// Persistence backend for handoff records.
///
/// Every method is atomic with respect to the record it touches: concurrent
/// callers never observe a half-applied transition, and at most one of
/// several racing `find_or_create`/`enqueue`/`pair_with_agent` calls for the
/// same key wins.
#[async_trait]
pub trait HandoffStore: Send + Sync {
    /// Existing record for this user, or a new `Bot` record.
    async fn find_or_create(&self, identity: &ConversationIdentity) -> Result<HandoffRecord>;

    /// Overwrite the stored record with `record` in full.
    ///
    /// Fails with `AgentAlreadyPaired` if `record` pairs an agent that another
    /// record already holds; nothing is written in that case.
    async fn save(&self, record: &HandoffRecord) -> Result<()>;

    /// Prepend a transcript line and return the stored record.
    async fn append_message(
        &self,
        record: &HandoffRecord,
        sender: &str,
        text: &str,
    ) -> Result<HandoffRecord>;

    /// The record currently paired with `agent`, if any.
    async fn find_by_agent(&self, agent: &ConversationIdentity) -> Result<Option<HandoffRecord>>;

    /// Move a `Bot` user into the queue, stamping the current time.
    ///
    /// Already-queued users keep their place; paired users are returned
    /// unchanged.
    async fn enqueue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord>;

    /// Take a queued user back to `Bot`. Paired users are returned unchanged.
    async fn dequeue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord>;

    /// Pair `agent` with the longest-waiting user. `None` when nobody is
    /// queued; `AgentAlreadyPaired` if the agent already holds a pairing.
    async fn pair_with_agent(&self, agent: &ConversationIdentity)
    -> Result<Option<HandoffRecord>>;

    /// End the pairing held by `agent`, returning the user to `Bot`.
    /// `NotPaired` if there is none.
    async fn unpair_agent(&self, agent: &ConversationIdentity) -> Result<HandoffRecord>;

    /// Queued users, longest-waiting first.
    async fn list_queue(&self) -> Result<Vec<HandoffRecord>>;

    /// Look up a user without creating it.
    async fn get(&self, user_id: &str) -> Result<Option<HandoffRecord>>;
}
