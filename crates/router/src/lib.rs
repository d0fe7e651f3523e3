//! Human handoff middleware.
//!
//! [`HandoffRouter`] intercepts every inbound message before the bot
//! pipeline and decides, per user, whether it goes to the bot, waits in the
//! agent queue, or is relayed to a connected human agent. Agents are
//! recognized by an [`AgentPolicy`] and drive the queue with `#list`,
//! `#connect` and `#disconnect`.

pub mod command;
pub mod error;
pub mod events;
mod lock;
pub mod policy;
pub mod router;

pub use {
    command::{AgentCommand, UserCommand},
    error::{Error, Result},
    events::{HandoffEvent, HandoffEventSink},
    policy::{AgentPolicy, NamePrefixPolicy},
    router::{
        COMMAND_NOT_VALID, CONNECTED_TO_BOT, FAILURE_NOTICE, HandoffRouter, NOBODY_IN_QUEUE, Next,
        Outcome, RECONNECTED_TO_BOT, WAITING_FOR_AGENT, next_fn,
    },
};
