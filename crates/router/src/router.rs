use std::{future::Future, sync::Arc, time::Duration};

use {
    futures::{FutureExt, future::BoxFuture},
    handoff_channels::{ConversationOpener, InboundActivity, ReplySink, send_with_timeout},
    handoff_common::ConversationIdentity,
    handoff_config::{HandoffConfig, RouterConfig, Severity},
    handoff_store::{HandoffRecord, HandoffStore, StateKind},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use handoff_metrics::{counter, histogram, labels, queue as queue_metrics, router as router_metrics};

use crate::{
    Error, Result,
    command::{AgentCommand, UserCommand},
    events::{HandoffEvent, HandoffEventSink},
    lock::KeyedLocks,
    policy::{AgentPolicy, NamePrefixPolicy},
};

pub const WAITING_FOR_AGENT: &str = "Waiting for agent";
pub const CONNECTED_TO_BOT: &str = "Connected to bot";
pub const RECONNECTED_TO_BOT: &str = "Reconnected to bot";
pub const COMMAND_NOT_VALID: &str = "Command not valid when connected to user.";
pub const NOBODY_IN_QUEUE: &str = "Nobody in the queue.";
pub const FAILURE_NOTICE: &str = "Something went wrong. Please try again.";

/// The downstream bot pipeline, invoked at most once per message.
pub type Next = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Wrap an async closure as a [`Next`] continuation.
pub fn next_fn<F, Fut>(f: F) -> Next
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// What the router did with one inbound activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handed to the downstream pipeline.
    PassedThrough,
    /// Answered with a canned reply to the sender.
    Replied,
    /// Relayed to the paired counterpart's conversation.
    Forwarded,
    /// Recognized but deliberately dropped (unknown agent command).
    Ignored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassedThrough => "passed_through",
            Self::Replied => "replied",
            Self::Forwarded => "forwarded",
            Self::Ignored => "ignored",
        }
    }
}

/// Per-message handoff state machine.
///
/// Sits in front of the bot pipeline. Users are routed to the bot, the agent
/// queue, or a paired agent; agents drive the queue with `#` commands.
pub struct HandoffRouter {
    store: Arc<dyn HandoffStore>,
    opener: Arc<dyn ConversationOpener>,
    policy: Arc<dyn AgentPolicy>,
    forward_timeout: Duration,
    events: Option<Arc<dyn HandoffEventSink>>,
    locks: KeyedLocks,
}

impl HandoffRouter {
    pub fn new(
        store: Arc<dyn HandoffStore>,
        opener: Arc<dyn ConversationOpener>,
        config: &RouterConfig,
    ) -> Self {
        Self {
            store,
            opener,
            policy: Arc::new(NamePrefixPolicy::from_config(config)),
            forward_timeout: config.forward_timeout(),
            events: None,
            locks: KeyedLocks::default(),
        }
    }

    /// Validate `config`, open the configured store backend and build a
    /// router on top of it. Error diagnostics reject the config; warnings
    /// are logged.
    pub async fn from_config(
        config: &HandoffConfig,
        opener: Arc<dyn ConversationOpener>,
    ) -> Result<Self> {
        let validation = handoff_config::validate(config);
        for d in &validation.diagnostics {
            if d.severity == Severity::Warning {
                warn!(path = %d.path, "{}", d.message);
            }
        }
        if validation.has_errors() {
            let message = validation
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .map(|d| format!("{}: {}", d.path, d.message))
                .collect::<Vec<_>>()
                .join("; ");
            error!(%message, "rejecting handoff config");
            return Err(Error::invalid_config(message));
        }

        let store = handoff_store::open_store(&config.store).await?;
        Ok(Self::new(store, opener, &config.router))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl AgentPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn HandoffEventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<dyn HandoffStore> {
        &self.store
    }

    /// Route one inbound activity from `sender`.
    ///
    /// `reply` answers the sender; `next` is the bot pipeline and runs at most
    /// once. When a store or transport step fails the sender gets
    /// [`FAILURE_NOTICE`] and the error is returned.
    pub async fn handle(
        &self,
        sender: &ConversationIdentity,
        activity: &InboundActivity,
        reply: &dyn ReplySink,
        next: Next,
    ) -> Result<Outcome> {
        let Some(text) = activity.text_content() else {
            return pass_through(next).await;
        };
        if sender.validate().is_err() {
            debug!(kind = ?activity.kind, "sender has no user id, passing through");
            return pass_through(next).await;
        }

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let is_agent = self.policy.is_agent(sender);
        let role = if is_agent { "agent" } else { "user" };

        let result = {
            let _guard = self.locks.lock(sender.key()).await;
            if is_agent {
                self.handle_agent(sender, text, reply, next).await
            } else {
                self.handle_user(sender, text, reply, next).await
            }
        };

        #[cfg(feature = "metrics")]
        {
            let route = result.as_ref().map_or("failed", Outcome::as_str);
            counter!(router_metrics::MESSAGES_TOTAL, labels::ROLE => role, labels::ROUTE => route)
                .increment(1);
            histogram!(router_metrics::HANDLE_DURATION_SECONDS, labels::ROLE => role)
                .record(started.elapsed().as_secs_f64());
        }

        match result {
            Ok(outcome) => {
                debug!(
                    user_id = sender.key(),
                    role,
                    outcome = outcome.as_str(),
                    "handled message"
                );
                Ok(outcome)
            },
            Err(e) if e.notifies_sender() => {
                error!(user_id = sender.key(), role, error = %e, "handoff routing failed");
                #[cfg(feature = "metrics")]
                if matches!(e, Error::Store(_)) {
                    counter!(router_metrics::STORE_FAILURES_TOTAL).increment(1);
                }
                if let Err(reply_err) = send_reply(reply, FAILURE_NOTICE).await {
                    warn!(
                        user_id = sender.key(),
                        error = %reply_err,
                        "failed to send failure notice"
                    );
                }
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    async fn handle_user(
        &self,
        user: &ConversationIdentity,
        text: &str,
        reply: &dyn ReplySink,
        next: Next,
    ) -> Result<Outcome> {
        let record = self.store.find_or_create(user).await?;
        let record = self
            .store
            .append_message(&record, user.display_name(), text)
            .await?;

        if let Some(agent) = record.agent_identity() {
            self.forward(agent, text, "to_agent").await?;
            return Ok(Outcome::Forwarded);
        }

        match UserCommand::parse(text) {
            Some(UserCommand::RequestAgent) => {
                let queued = self.store.enqueue(user).await?;
                // An agent may have connected since the record was read.
                if let Some(agent) = queued.agent_identity() {
                    self.forward(agent, text, "to_agent").await?;
                    return Ok(Outcome::Forwarded);
                }
                if record.kind() == StateKind::Bot && queued.kind() == StateKind::Queued {
                    info!(user_id = user.key(), "user queued for an agent");
                    self.emit(HandoffEvent::queued(&queued)).await;
                }
                send_reply(reply, WAITING_FOR_AGENT).await?;
                Ok(Outcome::Replied)
            },
            Some(UserCommand::Cancel) => {
                let record_after = self.store.dequeue(user).await?;
                if let Some(agent) = record_after.agent_identity() {
                    self.forward(agent, text, "to_agent").await?;
                    return Ok(Outcome::Forwarded);
                }
                if record.kind() == StateKind::Queued && record_after.kind() == StateKind::Bot {
                    info!(user_id = user.key(), "user left the agent queue");
                    self.emit(HandoffEvent::dequeued(&record_after)).await;
                }
                send_reply(reply, CONNECTED_TO_BOT).await?;
                Ok(Outcome::Replied)
            },
            None => pass_through(next).await,
        }
    }

    async fn handle_agent(
        &self,
        agent: &ConversationIdentity,
        text: &str,
        reply: &dyn ReplySink,
        next: Next,
    ) -> Result<Outcome> {
        let command = AgentCommand::parse(text);
        let paired = self.store.find_by_agent(agent).await?;

        match (paired, command) {
            (Some(_), Some(AgentCommand::Disconnect)) => self.disconnect(agent, reply).await,
            (Some(user), Some(command)) => {
                debug!(
                    agent_id = agent.key(),
                    user_id = user.user_id(),
                    ?command,
                    "command while paired"
                );
                send_reply(reply, COMMAND_NOT_VALID).await?;
                Ok(Outcome::Replied)
            },
            (Some(user), None) => {
                let user = self
                    .store
                    .append_message(&user, agent.display_name(), text)
                    .await?;
                self.forward(&user.identity, text, "to_user").await?;
                Ok(Outcome::Forwarded)
            },
            (None, None) => pass_through(next).await,
            (None, Some(AgentCommand::List)) => {
                let queue = self.store.list_queue().await?;
                send_reply(reply, &format_queue(&queue)).await?;
                Ok(Outcome::Replied)
            },
            (None, Some(AgentCommand::Connect)) => self.connect(agent, reply).await,
            (None, Some(command)) => {
                debug!(agent_id = agent.key(), ?command, "ignoring agent command");
                Ok(Outcome::Ignored)
            },
        }
    }

    async fn connect(
        &self,
        agent: &ConversationIdentity,
        reply: &dyn ReplySink,
    ) -> Result<Outcome> {
        match self.store.pair_with_agent(agent).await {
            Ok(Some(user)) => {
                info!(
                    agent_id = agent.key(),
                    user_id = user.user_id(),
                    "agent connected to user"
                );
                #[cfg(feature = "metrics")]
                counter!(queue_metrics::CONNECTS_TOTAL).increment(1);
                self.emit(HandoffEvent::connected(&user, agent.key(), agent.display_name()))
                    .await;
                send_reply(reply, &format!("Connected to {}", user.display_name())).await?;
            },
            Ok(None) => {
                #[cfg(feature = "metrics")]
                counter!(queue_metrics::EMPTY_CONNECTS_TOTAL).increment(1);
                send_reply(reply, NOBODY_IN_QUEUE).await?;
            },
            // Lost a race with another "#connect" from the same agent.
            Err(handoff_store::Error::AgentAlreadyPaired { .. }) => {
                send_reply(reply, COMMAND_NOT_VALID).await?;
            },
            Err(e) => return Err(e.into()),
        }
        Ok(Outcome::Replied)
    }

    async fn disconnect(
        &self,
        agent: &ConversationIdentity,
        reply: &dyn ReplySink,
    ) -> Result<Outcome> {
        match self.store.unpair_agent(agent).await {
            Ok(user) => {
                info!(
                    agent_id = agent.key(),
                    user_id = user.user_id(),
                    "agent disconnected from user"
                );
                #[cfg(feature = "metrics")]
                counter!(queue_metrics::DISCONNECTS_TOTAL).increment(1);
                self.emit(HandoffEvent::disconnected(&user, agent.key(), agent.display_name()))
                    .await;
                send_reply(reply, RECONNECTED_TO_BOT).await?;
                Ok(Outcome::Replied)
            },
            Err(handoff_store::Error::NotPaired { .. }) => {
                debug!(agent_id = agent.key(), "disconnect without a pairing");
                Ok(Outcome::Ignored)
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn forward(
        &self,
        to: &ConversationIdentity,
        text: &str,
        direction: &'static str,
    ) -> Result<()> {
        let sent = send_with_timeout(self.opener.as_ref(), to, text, self.forward_timeout).await;
        #[cfg(feature = "metrics")]
        {
            let name = if sent.is_ok() {
                router_metrics::FORWARDS_TOTAL
            } else {
                router_metrics::FORWARD_ERRORS_TOTAL
            };
            counter!(name, labels::DIRECTION => direction).increment(1);
        }
        if let Err(e) = &sent {
            warn!(to = to.key(), direction, error = %e, "forward failed");
        }
        sent.map_err(Error::from)
    }

    async fn emit(&self, event: HandoffEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event).await;
        }
    }
}

async fn send_reply(reply: &dyn ReplySink, text: &str) -> Result<()> {
    reply.reply(text).await.map_err(Error::Reply)
}

async fn pass_through(next: Next) -> Result<Outcome> {
    next().await.map_err(Error::Next)?;
    Ok(Outcome::PassedThrough)
}

/// One `- name` line per queued user; a fixed notice when nobody waits.
fn format_queue(queue: &[HandoffRecord]) -> String {
    if queue.is_empty() {
        return NOBODY_IN_QUEUE.to_string();
    }
    queue
        .iter()
        .map(|record| format!("- {}", record.display_name()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        handoff_channels::ActivityKind,
        handoff_store::{HandoffState, InMemoryStore},
        rstest::rstest,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        tokio::sync::Notify,
    };

    // ── Mocks ───────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingReply {
        sent: Mutex<Vec<String>>,
    }

    impl RecordingReply {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingReply {
        async fn reply(&self, text: &str) -> handoff_channels::Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingOpener {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingOpener {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversationOpener for RecordingOpener {
        async fn send_to(
            &self,
            to: &ConversationIdentity,
            text: &str,
        ) -> handoff_channels::Result<()> {
            if self.fail {
                return Err(handoff_channels::Error::conversation_unavailable(
                    &to.conversation.id,
                ));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.key().to_string(), text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<HandoffEvent>>,
    }

    #[async_trait]
    impl HandoffEventSink for RecordingSink {
        async fn emit(&self, event: HandoffEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Replies always fail; counts the attempts.
    #[derive(Default)]
    struct BrokenReply {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ReplySink for BrokenReply {
        async fn reply(&self, _text: &str) -> handoff_channels::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(handoff_channels::Error::conversation_unavailable("c-alice"))
        }
    }

    /// Holds a store call until the test releases it.
    #[derive(Clone, Default)]
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Gate {
        async fn pass(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    /// Delegates to an in-memory store, optionally holding `enqueue` or
    /// `dequeue` at a gate, or failing a mutation outright.
    struct WrappedStore {
        inner: Arc<InMemoryStore>,
        gated: Option<(&'static str, Gate)>,
        fail: Option<&'static str>,
    }

    impl WrappedStore {
        fn over(inner: Arc<InMemoryStore>) -> Self {
            Self {
                inner,
                gated: None,
                fail: None,
            }
        }

        async fn enter(&self, method: &'static str) -> handoff_store::Result<()> {
            if self.fail == Some(method) {
                return Err(handoff_store::Error::message("store offline"));
            }
            if let Some((gated, gate)) = &self.gated
                && *gated == method
            {
                gate.pass().await;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl HandoffStore for WrappedStore {
        async fn find_or_create(
            &self,
            identity: &ConversationIdentity,
        ) -> handoff_store::Result<HandoffRecord> {
            self.inner.find_or_create(identity).await
        }

        async fn save(&self, record: &HandoffRecord) -> handoff_store::Result<()> {
            self.inner.save(record).await
        }

        async fn append_message(
            &self,
            record: &HandoffRecord,
            sender: &str,
            text: &str,
        ) -> handoff_store::Result<HandoffRecord> {
            self.inner.append_message(record, sender, text).await
        }

        async fn find_by_agent(
            &self,
            agent: &ConversationIdentity,
        ) -> handoff_store::Result<Option<HandoffRecord>> {
            self.inner.find_by_agent(agent).await
        }

        async fn enqueue(
            &self,
            identity: &ConversationIdentity,
        ) -> handoff_store::Result<HandoffRecord> {
            self.enter("enqueue").await?;
            self.inner.enqueue(identity).await
        }

        async fn dequeue(
            &self,
            identity: &ConversationIdentity,
        ) -> handoff_store::Result<HandoffRecord> {
            self.enter("dequeue").await?;
            self.inner.dequeue(identity).await
        }

        async fn pair_with_agent(
            &self,
            agent: &ConversationIdentity,
        ) -> handoff_store::Result<Option<HandoffRecord>> {
            self.enter("pair_with_agent").await?;
            self.inner.pair_with_agent(agent).await
        }

        async fn unpair_agent(
            &self,
            agent: &ConversationIdentity,
        ) -> handoff_store::Result<HandoffRecord> {
            self.inner.unpair_agent(agent).await
        }

        async fn list_queue(&self) -> handoff_store::Result<Vec<HandoffRecord>> {
            self.inner.list_queue().await
        }

        async fn get(&self, user_id: &str) -> handoff_store::Result<Option<HandoffRecord>> {
            self.inner.get(user_id).await
        }
    }

    struct Harness {
        router: HandoffRouter,
        store: Arc<InMemoryStore>,
        opener: Arc<RecordingOpener>,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_opener(RecordingOpener::default())
        }

        fn with_opener(opener: RecordingOpener) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let opener = Arc::new(opener);
            let router =
                HandoffRouter::new(store.clone(), opener.clone(), &RouterConfig::default());
            Self {
                router,
                store,
                opener,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn next(&self) -> Next {
            let calls = Arc::clone(&self.calls);
            next_fn(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        async fn send(
            &self,
            from: &ConversationIdentity,
            text: &str,
        ) -> (Result<Outcome>, Vec<String>) {
            let reply = RecordingReply::default();
            let outcome = self
                .router
                .handle(from, &InboundActivity::message(text), &reply, self.next())
                .await;
            (outcome, reply.sent())
        }

        /// A second router sharing this harness's opener, over `store`.
        fn router_over(&self, store: WrappedStore) -> HandoffRouter {
            HandoffRouter::new(
                Arc::new(store),
                self.opener.clone(),
                &RouterConfig::default(),
            )
        }

        fn next_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn alice() -> ConversationIdentity {
        ConversationIdentity::new("u-alice", "Alice")
    }

    fn bob() -> ConversationIdentity {
        ConversationIdentity::new("a-bob", "Agent Bob")
    }

    // ── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn non_text_activities_pass_through_without_state() {
        let h = Harness::new();
        let reply = RecordingReply::default();
        for activity in [
            InboundActivity::typing(),
            InboundActivity::message(""),
            InboundActivity {
                kind: ActivityKind::ConversationUpdate,
                text: Some("agent".into()),
            },
        ] {
            let outcome = h.router.handle(&alice(), &activity, &reply, h.next()).await;
            assert_eq!(outcome.unwrap(), Outcome::PassedThrough);
        }
        assert_eq!(h.next_calls(), 3);
        assert!(reply.sent().is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn plain_user_text_passes_through_and_is_logged() {
        let h = Harness::new();
        let (outcome, replies) = h.send(&alice(), "what are your hours?").await;
        assert_eq!(outcome.unwrap(), Outcome::PassedThrough);
        assert!(replies.is_empty());
        assert_eq!(h.next_calls(), 1);

        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.messages[0].sender, "Alice");
        assert_eq!(rec.messages[0].text, "what are your hours?");
    }

    #[tokio::test]
    async fn agent_and_cancel_round_trip() {
        let h = Harness::new();
        let (_, replies) = h.send(&alice(), " Agent ").await;
        assert_eq!(replies, [WAITING_FOR_AGENT]);
        assert_eq!(h.store.list_queue().await.unwrap().len(), 1);

        let (_, replies) = h.send(&alice(), "CANCEL").await;
        assert_eq!(replies, [CONNECTED_TO_BOT]);
        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.state, HandoffState::Bot);
        assert_eq!(rec.messages.len(), 2);
        assert_eq!(h.next_calls(), 0);
    }

    #[tokio::test]
    async fn bridging_forwards_both_ways() {
        let h = Harness::new();
        h.send(&alice(), "agent").await;

        let (_, replies) = h.send(&bob(), "#connect").await;
        assert_eq!(replies, ["Connected to Alice"]);

        let (outcome, _) = h.send(&bob(), "hi").await;
        assert_eq!(outcome.unwrap(), Outcome::Forwarded);
        let (outcome, _) = h.send(&alice(), "hello").await;
        assert_eq!(outcome.unwrap(), Outcome::Forwarded);

        assert_eq!(h.opener.sent(), [
            ("u-alice".to_string(), "hi".to_string()),
            ("a-bob".to_string(), "hello".to_string()),
        ]);
        assert_eq!(h.next_calls(), 0);

        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.messages[0].sender, "Alice");
        assert_eq!(rec.messages[1].sender, "Agent Bob");
        assert_eq!(rec.messages[1].text, "hi");

        let (_, replies) = h.send(&bob(), "#Disconnect").await;
        assert_eq!(replies, [RECONNECTED_TO_BOT]);
        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.state, HandoffState::Bot);
    }

    #[tokio::test]
    async fn connect_with_empty_queue() {
        let h = Harness::new();
        h.send(&alice(), "hello").await;
        let (outcome, replies) = h.send(&bob(), "#connect").await;
        assert_eq!(outcome.unwrap(), Outcome::Replied);
        assert_eq!(replies, [NOBODY_IN_QUEUE]);
        assert!(h.store.find_by_agent(&bob()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commands_while_paired_are_rejected() {
        let h = Harness::new();
        h.send(&alice(), "agent").await;
        h.send(&bob(), "#connect").await;

        for command in ["#list", "#connect", "#whatever"] {
            let (_, replies) = h.send(&bob(), command).await;
            assert_eq!(replies, [COMMAND_NOT_VALID]);
        }
        assert!(h.opener.sent().is_empty());
    }

    #[tokio::test]
    async fn list_reports_queue_in_order() {
        let h = Harness::new();
        h.send(&alice(), "agent").await;
        h.send(&ConversationIdentity::new("u-carol", "Carol"), "agent").await;

        let (_, replies) = h.send(&bob(), "#list").await;
        assert_eq!(replies, ["- Alice\n- Carol"]);
    }

    #[tokio::test]
    async fn list_on_empty_queue() {
        let h = Harness::new();
        let (_, replies) = h.send(&bob(), "#list").await;
        assert_eq!(replies, [NOBODY_IN_QUEUE]);
    }

    #[tokio::test]
    async fn unpaired_agent_is_an_ordinary_conversant() {
        let h = Harness::new();
        let (outcome, replies) = h.send(&bob(), "hello bot").await;
        assert_eq!(outcome.unwrap(), Outcome::PassedThrough);
        assert!(replies.is_empty());
        assert_eq!(h.next_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_and_stray_agent_commands_are_ignored() {
        let h = Harness::new();
        for command in ["#whoami", "#disconnect"] {
            let (outcome, replies) = h.send(&bob(), command).await;
            assert_eq!(outcome.unwrap(), Outcome::Ignored);
            assert!(replies.is_empty());
        }
        assert_eq!(h.next_calls(), 0);
    }

    #[tokio::test]
    async fn forward_failure_notifies_sender() {
        let h = Harness::with_opener(RecordingOpener {
            fail: true,
            ..Default::default()
        });
        h.send(&alice(), "agent").await;
        h.send(&bob(), "#connect").await;

        let (outcome, replies) = h.send(&bob(), "hi").await;
        assert!(matches!(outcome, Err(Error::Channel(_))));
        assert_eq!(replies, [FAILURE_NOTICE]);
    }

    #[tokio::test]
    async fn downstream_errors_are_returned_without_notice() {
        let h = Harness::new();
        let reply = RecordingReply::default();
        let next = next_fn(|| async { Err(anyhow::anyhow!("pipeline down")) });
        let outcome = h
            .router
            .handle(&alice(), &InboundActivity::message("hi"), &reply, next)
            .await;
        assert!(matches!(outcome, Err(Error::Next(_))));
        assert!(reply.sent().is_empty());
    }

    #[tokio::test]
    async fn events_follow_transitions() {
        let sink = Arc::new(RecordingSink::default());
        let h = Harness::new();
        let router =
            HandoffRouter::new(h.store.clone(), h.opener.clone(), &RouterConfig::default())
                .with_event_sink(sink.clone());
        let reply = RecordingReply::default();
        let msg = |text: &str| InboundActivity::message(text);

        for (from, text) in [
            (alice(), "agent"),
            (alice(), "agent"),
            (bob(), "#connect"),
            (bob(), "#disconnect"),
        ] {
            router.handle(&from, &msg(text), &reply, h.next()).await.unwrap();
        }

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], HandoffEvent::Queued { .. }));
        assert!(matches!(
            events[1],
            HandoffEvent::Connected { ref agent_name, .. } if agent_name == "Agent Bob"
        ));
        assert!(matches!(events[2], HandoffEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn custom_policy_overrides_name_prefix() {
        let h = Harness::new();
        let router =
            HandoffRouter::new(h.store.clone(), h.opener.clone(), &RouterConfig::default())
                .with_policy(|id: &ConversationIdentity| id.key().starts_with("staff:"));
        let reply = RecordingReply::default();
        let staff = ConversationIdentity::new("staff:1", "Dana");

        router
            .handle(&staff, &InboundActivity::message("#list"), &reply, h.next())
            .await
            .unwrap();
        assert_eq!(reply.sent(), [NOBODY_IN_QUEUE]);

        // The name prefix no longer matters.
        let outcome = router
            .handle(&bob(), &InboundActivity::message("#list"), &reply, h.next())
            .await;
        assert_eq!(outcome.unwrap(), Outcome::PassedThrough);
        assert_eq!(h.next_calls(), 1);
    }

    #[rstest]
    #[case::agent("agent", "enqueue")]
    #[case::cancel("cancel", "dequeue")]
    #[tokio::test]
    async fn user_command_racing_connect_is_forwarded_to_agent(
        #[case] text: &str,
        #[case] method: &'static str,
    ) {
        let h = Harness::new();
        h.send(&alice(), "agent").await;

        let gate = Gate::default();
        let router = h.router_over(WrappedStore {
            gated: Some((method, gate.clone())),
            ..WrappedStore::over(h.store.clone())
        });
        let (user, agent) = (alice(), bob());
        let user_msg = InboundActivity::message(text);
        let connect = InboundActivity::message("#connect");
        let (user_reply, agent_reply) = (RecordingReply::default(), RecordingReply::default());

        // The agent connects while the user's command is inside the store call.
        let (outcome, ()) = tokio::join!(
            router.handle(&user, &user_msg, &user_reply, h.next()),
            async {
                gate.entered.notified().await;
                let connected = router.handle(&agent, &connect, &agent_reply, h.next()).await;
                assert_eq!(connected.unwrap(), Outcome::Replied);
                gate.release.notify_one();
            },
        );

        assert_eq!(outcome.unwrap(), Outcome::Forwarded);
        assert!(user_reply.sent().is_empty());
        assert_eq!(agent_reply.sent(), ["Connected to Alice"]);
        assert_eq!(h.opener.sent(), [("a-bob".to_string(), text.to_string())]);
        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert!(rec.is_paired_with(&bob()));
        assert_eq!(h.next_calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_on_enqueue_notifies_user() {
        let h = Harness::new();
        let router = h.router_over(WrappedStore {
            fail: Some("enqueue"),
            ..WrappedStore::over(h.store.clone())
        });
        let reply = RecordingReply::default();

        let outcome = router
            .handle(&alice(), &InboundActivity::message("agent"), &reply, h.next())
            .await;
        assert!(matches!(outcome, Err(Error::Store(_))));
        assert_eq!(reply.sent(), [FAILURE_NOTICE]);
        assert_eq!(h.next_calls(), 0);

        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.state, HandoffState::Bot);
        assert!(h.store.list_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_on_connect_leaves_queue_alone() {
        let h = Harness::new();
        h.send(&alice(), "agent").await;
        let router = h.router_over(WrappedStore {
            fail: Some("pair_with_agent"),
            ..WrappedStore::over(h.store.clone())
        });
        let reply = RecordingReply::default();

        let outcome = router
            .handle(&bob(), &InboundActivity::message("#connect"), &reply, h.next())
            .await;
        assert!(matches!(outcome, Err(Error::Store(_))));
        assert_eq!(reply.sent(), [FAILURE_NOTICE]);
        assert_eq!(h.next_calls(), 0);

        let rec = h.store.get("u-alice").await.unwrap().unwrap();
        assert_eq!(rec.kind(), StateKind::Queued);
        assert!(h.store.find_by_agent(&bob()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broken_reply_sink_gets_no_failure_notice() {
        let h = Harness::new();
        let reply = BrokenReply::default();

        let outcome = h
            .router
            .handle(&alice(), &InboundActivity::message("agent"), &reply, h.next())
            .await;
        assert!(matches!(outcome, Err(Error::Reply(_))));
        assert_eq!(reply.attempts.load(Ordering::SeqCst), 1);
        // The transition itself was committed.
        assert_eq!(h.store.list_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn from_config_rejects_blank_agent_prefix() {
        let mut config = HandoffConfig::default();
        config.router.agent_name_prefix = "  ".into();

        let opener = Arc::new(RecordingOpener::default());
        let built = HandoffRouter::from_config(&config, opener.clone()).await;
        assert!(matches!(
            built,
            Err(Error::InvalidConfig { ref message })
                if message.contains("router.agent_name_prefix")
        ));

        config.router.agent_name_prefix = "agent".into();
        let built = HandoffRouter::from_config(&config, opener).await;
        assert!(built.is_ok());
    }
}
