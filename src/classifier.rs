//! Detection of "should have worked from home" messages.
//!
//! Classification runs in two stages. The subject pattern decides whether a
//! message is a target message at all and who it is about. Only when it
//! matches does the caller pay for mention normalization and run the reason
//! pattern over the normalized text.

use once_cell::sync::Lazy;
use regex::Regex;

/// A subject token (standalone `I`/`i` or an `<@ID>` mention) followed later by
/// the stems "work", "from" and "home", in that order.
static SUBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?:^|\W)(?P<subject>[Ii]|<@[A-Z0-9]+>)(?:\W|$).*?(?i:work).*?(?i:from).*?(?i:home)",
    )
    .expect("Invalid subject regex")
});

/// A causal connective followed by the reason, captured to the end of the text
static REASON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\b(?:because|b\s*/\s*c|bc)\b\s*(?P<reason>.+)").expect("Invalid reason regex")
});

/// Who a target message is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// The message author ("I should have worked from home")
    Sender,
    /// A mentioned user, by Slack ID
    Mention(String),
}

/// Returns the subject if `text` is a target message, `None` otherwise.
///
/// `text` should already have the bot's own mentions stripped.
pub fn classify(text: &str) -> Option<Subject> {
    let token = SUBJECT_RE.captures(text)?.name("subject")?.as_str();

    if token.eq_ignore_ascii_case("i") {
        return Some(Subject::Sender);
    }

    // Strip the "<@" prefix and ">" suffix
    Some(Subject::Mention(token[2..token.len() - 1].to_string()))
}

/// Reason given after "because", "bc" or "b/c", or an empty string
pub fn extract_reason(text: &str) -> String {
    REASON_RE
        .captures(text)
        .and_then(|c| c.name("reason"))
        .map(|m| m.as_str().trim_end().to_string())
        .unwrap_or_default()
}
