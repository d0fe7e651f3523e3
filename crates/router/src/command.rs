//! Text commands understood by the router.

/// Commands an end user can type while not bridged to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// "agent": join the queue.
    RequestAgent,
    /// "cancel": leave the queue.
    Cancel,
}

impl UserCommand {
    /// Whole-message match, trimmed and case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("agent") {
            Some(Self::RequestAgent)
        } else if text.eq_ignore_ascii_case("cancel") {
            Some(Self::Cancel)
        } else {
            None
        }
    }
}

/// `#`-prefixed commands sent by agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Disconnect,
    List,
    Connect,
    /// Any other `#name`; carries the lowercased name.
    Unknown(String),
}

impl AgentCommand {
    /// `None` when `text` is not a command (does not start with `#`).
    pub fn parse(text: &str) -> Option<Self> {
        let name = text.trim().strip_prefix('#')?.trim().to_lowercase();
        Some(match name.as_str() {
            "disconnect" => Self::Disconnect,
            "list" => Self::List,
            "connect" => Self::Connect,
            _ => Self::Unknown(name),
        })
    }
}
