use anyhow::Result;
use async_trait::async_trait;

/// Conversation metadata as reported by the workspace directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationInfo {
    pub id: String,
    /// Empty for direct messages and other unnamed conversations
    pub name: String,
    pub is_channel: bool,
    pub is_group: bool,
    pub is_mpim: bool,
    pub is_im: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}

/// Read access to the workspace's users and conversations.
///
/// Every method is idempotent; callers are free to retry.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn conversation_info(&self, id: &str) -> Result<ConversationInfo>;

    /// Member user IDs in listing order, with pagination already followed
    async fn conversation_members(&self, id: &str) -> Result<Vec<String>>;

    async fn user_info(&self, id: &str) -> Result<UserInfo>;

    /// The identity the bot is authenticated as
    async fn self_identity(&self) -> Result<UserInfo>;
}
