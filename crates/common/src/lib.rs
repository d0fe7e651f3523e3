//! Shared types, error definitions, and utilities used across all handoff crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, Result},
    types::{ChannelAccount, ConversationAccount, ConversationIdentity},
};
