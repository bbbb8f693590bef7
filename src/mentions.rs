//! Rewriting of Slack `<@ID>` mentions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::{ResolveError, SourceCache};
use crate::directory::Directory;
use crate::model::Source;

/// Slack API mention format. The first capture group is the mentioned ID.
pub static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([A-Z0-9]+)>").expect("Invalid mention regex"));

/// API formatted reference to a source
pub fn mention_of(id: &str) -> String {
    format!("<@{}>", id)
}

/// Convert `<@ID>` mentions into `@name`.
///
/// Text without mentions is returned unchanged. If any mentioned ID cannot be
/// resolved the whole rewrite fails.
pub async fn normalize_mentions<D: Directory>(
    cache: &mut SourceCache<D>,
    text: &str,
) -> Result<String, ResolveError> {
    let mut ids: Vec<&str> = MENTION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if ids.is_empty() {
        return Ok(text.to_string());
    }
    ids.sort_unstable();
    ids.dedup();

    let mut normalized = text.to_string();
    for id in ids {
        let user = cache.resolve_user(id).await?;
        normalized = normalized.replace(&mention_of(id), &format!("@{}", user.name));
    }

    Ok(normalized)
}

/// Remove every mention of the bot from the text
pub fn strip_self_mentions(bot: &Source, text: &str) -> String {
    text.replace(&mention_of(&bot.id), "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeDirectory;
    use std::time::Duration;

    fn cache(directory: FakeDirectory) -> SourceCache<FakeDirectory> {
        SourceCache::new(directory, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_normalize_rewrites_every_mention() {
        let mut cache = cache(
            FakeDirectory::new()
                .with_user("U1", "Alice")
                .with_user("U2", "Bob"),
        );

        let text = normalize_mentions(&mut cache, "hello <@U1> and <@U2>")
            .await
            .unwrap();
        assert_eq!(text, "hello @Alice and @Bob");
    }

    #[tokio::test]
    async fn test_normalize_repeated_mention_looks_up_once() {
        let directory = FakeDirectory::new().with_user("U1", "Alice");
        let mut cache = cache(directory.clone());

        let text = normalize_mentions(&mut cache, "<@U1>, <@U1>!").await.unwrap();
        assert_eq!(text, "@Alice, @Alice!");
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn test_normalize_without_mentions_is_identity() {
        let directory = FakeDirectory::new();
        let mut cache = cache(directory.clone());

        let text = normalize_mentions(&mut cache, "nothing <@> to see <#C1>")
            .await
            .unwrap();
        assert_eq!(text, "nothing <@> to see <#C1>");
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn test_normalize_fails_on_unknown_user() {
        let mut cache = cache(FakeDirectory::new().with_user("U1", "Alice"));

        let result = normalize_mentions(&mut cache, "<@U1> and <@U404>").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_strip_self_mentions() {
        let bot = Source::user("B", "wfhbot");
        assert_eq!(
            strip_self_mentions(&bot, "<@B> yo, I worked from home"),
            "yo, I worked from home"
        );
        assert_eq!(
            strip_self_mentions(&bot, "hey <@B2> and <@B>"),
            "hey <@B2> and"
        );
    }
}
