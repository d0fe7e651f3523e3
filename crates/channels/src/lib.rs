//! Transport collaborator interfaces.
//!
//! The router never talks to a wire protocol directly. A channel adapter
//! (Bot Framework, Slack, Telegram, ...) hands it an [`InboundActivity`] plus
//! a [`ReplySink`] for the current sender, and provides a
//! [`ConversationOpener`] for sending into any other captured conversation.

pub mod error;
pub mod transport;

pub use {
    error::{Error, Result},
    transport::{
        ActivityKind, ConversationOpener, InboundActivity, ReplySink, send_with_timeout,
    },
};
