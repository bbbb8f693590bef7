/// A chat message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Conversation the message was posted in
    pub channel: String,
    /// Author's user ID
    pub user: String,
    pub text: String,
    /// Slack timestamp, e.g. `1512085950.000216`
    pub ts: String,
}

/// Inbound events, decoded once at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The transport (re)established its connection
    Connected,
    Message(MessageEvent),
    /// The transport hit a problem it expects to recover from
    StreamError(String),
    /// The workspace rejected our credentials; no further events will arrive
    InvalidAuth,
    /// Anything else, by Slack event type
    Other(String),
}
