use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// What kind of Slack entity a [`Source`] represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    User,
    Channel,
    DirectMessage,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::User => write!(f, "user"),
            SourceKind::Channel => write!(f, "channel"),
            SourceKind::DirectMessage => write!(f, "im"),
        }
    }
}

/// A resolved chat entity: a user, a channel or a direct message conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Slack ID, unique within the workspace
    pub id: String,
    /// Human readable name
    pub name: String,
    pub kind: SourceKind,
}

impl Source {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, SourceKind::User)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (id: {})", self.kind, self.name, self.id)
    }
}

/// A message saying someone should have worked from home today
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    /// Channel or direct message the message was sent in
    pub origin: Arc<Source>,
    /// Author of the message
    pub sender: Arc<Source>,
    pub sent_at: DateTime<Utc>,
    /// Who should have worked from home
    pub subject: Arc<Source>,
    /// Explanation following "because" / "bc" / "b/c", empty when none was given
    pub reason: String,
    /// Message text with mentions rewritten to `@name`
    pub text: String,
}

impl fmt::Display for ClassifiedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] (from: {}, subject: {}, reason: {}): {}",
            self.sent_at.format("%-m/%-d/%Y %-H:%M"),
            self.origin.name,
            self.sender.name,
            self.subject.name,
            self.reason,
            self.text
        )
    }
}
