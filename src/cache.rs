use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::directory::{ConversationInfo, Directory};
use crate::model::{Source, SourceKind};
use crate::slack::is_auth_error;

/// Cache key holding the bot's own identity. Never a valid Slack ID.
pub const SELF_KEY: &str = "@self";

/// Separator between member names of an unnamed conversation
pub const MEMBER_NAME_SEPARATOR: &str = "--";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("error retrieving {what} info, id: {id}, err: {reason}")]
    Lookup {
        what: &'static str,
        id: String,
        reason: String,
    },

    #[error("slack rejected credentials retrieving {what} info, id: {id}, err: {reason}")]
    Unauthorized {
        what: &'static str,
        id: String,
        reason: String,
    },

    #[error("timed out after {after:?} retrieving {what} info, id: {id}")]
    Timeout {
        what: &'static str,
        id: String,
        after: Duration,
    },

    #[error("error resolving member of conversation {conversation}")]
    Member {
        conversation: String,
        #[source]
        source: Box<ResolveError>,
    },

    #[error("no member names retrieved for conversation {id}")]
    NoMemberNames { id: String },

    #[error("error determining conversation type: {info:?}")]
    UnknownKind { info: ConversationInfo },
}

impl ResolveError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ResolveError::Unauthorized { .. } => true,
            ResolveError::Member { source, .. } => source.is_unauthorized(),
            _ => false,
        }
    }
}

/// Lazily populated mapping from Slack IDs to resolved sources.
///
/// Entries are inserted only once fully resolved and are never replaced, so a
/// cached ID always maps to the same `Arc<Source>`. The cache is owned by a
/// single task; nothing here locks.
pub struct SourceCache<D> {
    directory: D,
    sources: HashMap<String, Arc<Source>>,
    lookup_timeout: Duration,
}

impl<D: Directory> SourceCache<D> {
    pub fn new(directory: D, lookup_timeout: Duration) -> Self {
        Self {
            directory,
            sources: HashMap::new(),
            lookup_timeout,
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<Arc<Source>> {
        self.sources.get(id).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolve a user ID
    pub async fn resolve_user(&mut self, id: &str) -> Result<Arc<Source>, ResolveError> {
        if let Some(source) = self.sources.get(id) {
            return Ok(source.clone());
        }

        let user = bounded(
            self.lookup_timeout,
            "user",
            id,
            self.directory.user_info(id),
        )
        .await?;

        Ok(self.insert(id, Source::new(user.id, user.name, SourceKind::User)))
    }

    /// Resolve a channel, private group or direct message ID.
    ///
    /// Conversations without a name are named after their members, joined by
    /// [`MEMBER_NAME_SEPARATOR`] in listing order.
    pub async fn resolve_conversation(&mut self, id: &str) -> Result<Arc<Source>, ResolveError> {
        if let Some(source) = self.sources.get(id) {
            return Ok(source.clone());
        }

        let info = bounded(
            self.lookup_timeout,
            "conversation",
            id,
            self.directory.conversation_info(id),
        )
        .await?;

        let kind = if info.is_channel || info.is_group || info.is_mpim {
            SourceKind::Channel
        } else if info.is_im {
            SourceKind::DirectMessage
        } else {
            return Err(ResolveError::UnknownKind { info });
        };

        let name = if info.name.is_empty() {
            self.member_names(id).await?
        } else {
            info.name
        };

        Ok(self.insert(id, Source::new(info.id, name, kind)))
    }

    /// Resolve the identity the bot is authenticated as
    pub async fn resolve_self(&mut self) -> Result<Arc<Source>, ResolveError> {
        if let Some(source) = self.sources.get(SELF_KEY) {
            return Ok(source.clone());
        }

        let me = bounded(
            self.lookup_timeout,
            "bot identity",
            SELF_KEY,
            self.directory.self_identity(),
        )
        .await?;

        Ok(self.insert(SELF_KEY, Source::user(me.id, me.name)))
    }

    async fn member_names(&mut self, id: &str) -> Result<String, ResolveError> {
        let members = bounded(
            self.lookup_timeout,
            "conversation members",
            id,
            self.directory.conversation_members(id),
        )
        .await?;

        let mut names = Vec::with_capacity(members.len());
        for member in &members {
            let user = self
                .resolve_user(member)
                .await
                .map_err(|e| ResolveError::Member {
                    conversation: id.to_string(),
                    source: Box::new(e),
                })?;
            names.push(user.name.clone());
        }

        if names.is_empty() {
            return Err(ResolveError::NoMemberNames { id: id.to_string() });
        }

        Ok(names.join(MEMBER_NAME_SEPARATOR))
    }

    fn insert(&mut self, key: &str, source: Source) -> Arc<Source> {
        debug!("Caching {}", source);
        self.sources
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(source))
            .clone()
    }
}

async fn bounded<T, F>(
    after: Duration,
    what: &'static str,
    id: &str,
    lookup: F,
) -> Result<T, ResolveError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(after, lookup).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if is_auth_error(&e) => Err(ResolveError::Unauthorized {
            what,
            id: id.to_string(),
            reason: format!("{:#}", e),
        }),
        Ok(Err(e)) => Err(ResolveError::Lookup {
            what,
            id: id.to_string(),
            reason: format!("{:#}", e),
        }),
        Err(_) => Err(ResolveError::Timeout {
            what,
            id: id.to_string(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeDirectory;

    fn cache(directory: FakeDirectory) -> SourceCache<FakeDirectory> {
        SourceCache::new(directory, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_resolve_user_is_cached() {
        let directory = FakeDirectory::new().with_user("U1", "alice");
        let mut cache = cache(directory.clone());

        let first = cache.resolve_user("U1").await.unwrap();
        let second = cache.resolve_user("U1").await.unwrap();

        assert_eq!(*first, Source::user("U1", "alice"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_named_channel() {
        let directory = FakeDirectory::new().with_channel("C1", "general");
        let mut cache = cache(directory.clone());

        let channel = cache.resolve_conversation("C1").await.unwrap();
        assert_eq!(channel.name, "general");
        assert_eq!(channel.kind, SourceKind::Channel);

        cache.resolve_conversation("C1").await.unwrap();
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unnamed_conversation_named_after_members() {
        let directory = FakeDirectory::new()
            .with_user("U1", "alice")
            .with_user("U2", "bob")
            .with_im("D1", &["U1", "U2"]);
        let mut cache = cache(directory);

        let im = cache.resolve_conversation("D1").await.unwrap();
        assert_eq!(im.name, "alice--bob");
        assert_eq!(im.kind, SourceKind::DirectMessage);

        // Members were cached along the way
        assert_eq!(cache.get("U2").unwrap().name, "bob");
    }

    #[tokio::test]
    async fn test_unnamed_conversation_without_members_fails() {
        let directory = FakeDirectory::new().with_im("D1", &[]);
        let mut cache = cache(directory);

        let err = cache.resolve_conversation("D1").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoMemberNames { .. }));
        assert!(cache.get("D1").is_none());
    }

    #[tokio::test]
    async fn test_member_failure_leaves_conversation_uncached() {
        let directory = FakeDirectory::new()
            .with_user("U1", "alice")
            .with_im("D1", &["U1", "U404"]);
        let mut cache = cache(directory);

        let err = cache.resolve_conversation("D1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Member { .. }));
        assert!(cache.get("D1").is_none());
        assert!(cache.get("U404").is_none());
    }

    #[tokio::test]
    async fn test_conversation_without_known_kind_fails() {
        let directory = FakeDirectory::new().with_conversation(ConversationInfo {
            id: "X1".to_string(),
            name: "mystery".to_string(),
            ..Default::default()
        });
        let mut cache = cache(directory);

        let err = cache.resolve_conversation("X1").await.unwrap_err();
        assert!(matches!(err, ResolveError::UnknownKind { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_private_group_is_channel() {
        let directory = FakeDirectory::new().with_conversation(ConversationInfo {
            id: "G1".to_string(),
            name: "secret".to_string(),
            is_group: true,
            ..Default::default()
        });
        let mut cache = cache(directory);

        let group = cache.resolve_conversation("G1").await.unwrap();
        assert_eq!(group.kind, SourceKind::Channel);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_cached() {
        let directory = FakeDirectory::new();
        let mut cache = cache(directory.clone());

        assert!(cache.resolve_user("U9").await.is_err());
        assert!(cache.resolve_user("U9").await.is_err());
        assert_eq!(directory.call_count(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_self_is_stable() {
        let directory = FakeDirectory::new().with_bot("B1", "wfhbot");
        let mut cache = cache(directory.clone());

        let first = cache.resolve_self().await.unwrap();
        let second = cache.resolve_self().await.unwrap();

        assert_eq!(first.id, "B1");
        assert_eq!(first.kind, SourceKind::User);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.self_call_count(), 1);
        assert!(cache.get(SELF_KEY).is_some());
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_unauthorized() {
        let directory = FakeDirectory::new()
            .with_user("U1", "alice")
            .with_im("D1", &["U1"])
            .with_revoked_token();
        let mut cache = cache(directory);

        let err = cache.resolve_user("U1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unauthorized { .. }));
        assert!(err.is_unauthorized());

        let err = cache.resolve_conversation("D1").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_unauthorized() {
        let mut cache = cache(FakeDirectory::new());

        let err = cache.resolve_user("U404").await.unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { .. }));
        assert!(!err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let directory = FakeDirectory::new()
            .with_user("U1", "alice")
            .with_delay(Duration::from_millis(500));
        let mut cache = SourceCache::new(directory, Duration::from_millis(20));

        let err = cache.resolve_user("U1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
        assert!(cache.is_empty());
    }
}
