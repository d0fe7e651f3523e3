//! In-memory store. No persistence; state lives as long as the process.

use std::{collections::HashMap, sync::Mutex};

use {async_trait::async_trait, chrono::Utc, handoff_common::ConversationIdentity, tracing::debug};

#[cfg(feature = "metrics")]
use handoff_metrics::{counter, histogram, labels, queue as queue_metrics, store as store_metrics};

use crate::{
    Error, Result,
    store::HandoffStore,
    types::{HandoffRecord, HandoffState},
};

struct Slot {
    record: HandoffRecord,
    /// Enqueue order, breaks ties between equal `queued_at` stamps.
    queue_seq: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn slot_or_create(&mut self, identity: &ConversationIdentity) -> &mut Slot {
        self.slots
            .entry(identity.key().to_string())
            .or_insert_with(|| {
                debug!(user_id = identity.key(), "creating handoff record");
                #[cfg(feature = "metrics")]
                counter!(store_metrics::RECORDS_CREATED_TOTAL, labels::BACKEND => "memory")
                    .increment(1);
                Slot {
                    record: HandoffRecord::new(identity.clone()),
                    queue_seq: 0,
                }
            })
    }

    fn paired_with(&self, agent: &ConversationIdentity) -> Option<&Slot> {
        self.slots
            .values()
            .find(|slot| slot.record.is_paired_with(agent))
    }

    fn queue(&self) -> Vec<&Slot> {
        let mut queued: Vec<&Slot> = self
            .slots
            .values()
            .filter(|slot| slot.record.queued_at().is_some())
            .collect();
        queued.sort_by_key(|slot| (slot.record.queued_at(), slot.queue_seq));
        queued
    }
}

/// In-memory store backed by a `HashMap` behind one mutex.
///
/// The mutex is the single writer: every operation runs to completion under
/// it and it is never held across an `.await`.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct users ever seen.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HandoffStore for InMemoryStore {
    async fn find_or_create(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        let mut inner = self.lock();
        Ok(inner.slot_or_create(identity).record.clone())
    }

    async fn save(&self, record: &HandoffRecord) -> Result<()> {
        record.identity.validate()?;
        let mut inner = self.lock();

        if let Some(agent) = record.agent_identity()
            && let Some(other) = inner.paired_with(agent)
            && other.record.user_id() != record.user_id()
        {
            return Err(Error::agent_already_paired(agent.key()));
        }

        let was_queued = inner
            .slots
            .get(record.user_id())
            .is_some_and(|slot| slot.record.queued_at().is_some());
        let queue_seq = match (record.queued_at(), was_queued) {
            (Some(_), false) => inner.next_seq(),
            _ => inner
                .slots
                .get(record.user_id())
                .map_or(0, |slot| slot.queue_seq),
        };

        inner.slots.insert(record.user_id().to_string(), Slot {
            record: record.clone(),
            queue_seq,
        });
        Ok(())
    }

    async fn append_message(
        &self,
        record: &HandoffRecord,
        sender: &str,
        text: &str,
    ) -> Result<HandoffRecord> {
        record.identity.validate()?;
        let mut inner = self.lock();
        let slot = inner.slot_or_create(&record.identity);
        slot.record.push_message(sender, text);
        Ok(slot.record.clone())
    }

    async fn find_by_agent(&self, agent: &ConversationIdentity) -> Result<Option<HandoffRecord>> {
        let inner = self.lock();
        Ok(inner.paired_with(agent).map(|slot| slot.record.clone()))
    }

    async fn enqueue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        let mut inner = self.lock();
        let seq = inner.next_seq();
        let slot = inner.slot_or_create(identity);
        if slot.record.state == HandoffState::Bot {
            slot.record.set_state(HandoffState::Queued {
                queued_at: Utc::now(),
            });
            slot.queue_seq = seq;
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::ENQUEUED_TOTAL).increment(1);
        }
        Ok(slot.record.clone())
    }

    async fn dequeue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        let mut inner = self.lock();
        let slot = inner.slot_or_create(identity);
        if slot.record.queued_at().is_some() {
            slot.record.set_state(HandoffState::Bot);
            slot.queue_seq = 0;
            #[cfg(feature = "metrics")]
            counter!(queue_metrics::CANCELLED_TOTAL).increment(1);
        }
        Ok(slot.record.clone())
    }

    async fn pair_with_agent(
        &self,
        agent: &ConversationIdentity,
    ) -> Result<Option<HandoffRecord>> {
        agent.validate()?;
        let mut inner = self.lock();
        if inner.paired_with(agent).is_some() {
            return Err(Error::agent_already_paired(agent.key()));
        }

        let Some(user_id) = inner
            .queue()
            .first()
            .map(|slot| slot.record.user_id().to_string())
        else {
            return Ok(None);
        };
        let Some(slot) = inner.slots.get_mut(&user_id) else {
            return Ok(None);
        };

        #[cfg(feature = "metrics")]
        if let Some(queued_at) = slot.record.queued_at() {
            let waited = (Utc::now() - queued_at).num_milliseconds().max(0) as f64 / 1000.0;
            histogram!(queue_metrics::WAIT_SECONDS).record(waited);
        }

        slot.record.set_state(HandoffState::WithAgent {
            agent: agent.clone(),
        });
        slot.queue_seq = 0;
        Ok(Some(slot.record.clone()))
    }

    async fn unpair_agent(&self, agent: &ConversationIdentity) -> Result<HandoffRecord> {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .values_mut()
            .find(|slot| slot.record.is_paired_with(agent))
            .ok_or_else(|| Error::not_paired(agent.key()))?;
        slot.record.set_state(HandoffState::Bot);
        Ok(slot.record.clone())
    }

    async fn list_queue(&self) -> Result<Vec<HandoffRecord>> {
        let inner = self.lock();
        Ok(inner
            .queue()
            .into_iter()
            .map(|slot| slot.record.clone())
            .collect())
    }

    async fn get(&self, user_id: &str) -> Result<Option<HandoffRecord>> {
        let inner = self.lock();
        Ok(inner.slots.get(user_id).map(|slot| slot.record.clone()))
    }
}
