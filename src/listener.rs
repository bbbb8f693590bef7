//! The event loop: consumes transport events, classifies messages and reports
//! results on two output channels.
//!
//! Recoverable problems are reported as [`Notice::Error`] and the loop keeps
//! going. A fatal problem is reported as a [`Notice::Error`] immediately
//! followed by [`Notice::Terminated`], after which both output channels close.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ResolveError, SourceCache};
use crate::classifier::{classify, extract_reason, Subject};
use crate::config::ListenerConfig;
use crate::directory::Directory;
use crate::events::{Event, MessageEvent};
use crate::mentions::{normalize_mentions, strip_self_mentions};
use crate::model::ClassifiedMessage;
use crate::timestamp::{parse_timestamp, TimestampError};

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("error converting message timestamp: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("could not find message channel {channel}, dropping message: {source}")]
    Channel {
        channel: String,
        #[source]
        source: ResolveError,
    },

    #[error("could not find message sender {user}, dropping message: {source}")]
    Sender {
        user: String,
        #[source]
        source: ResolveError,
    },

    #[error("error retrieving bot identity: {0}")]
    SelfIdentity(#[source] ResolveError),

    #[error("error transforming mentions: {0}")]
    Mentions(#[source] ResolveError),

    #[error("could not find message subject {subject}, dropping message: {source}")]
    Subject {
        subject: String,
        #[source]
        source: ResolveError,
    },

    #[error("slack stream error: {0}")]
    Stream(String),

    #[error("invalid Slack authentication")]
    InvalidAuth,

    #[error("listener cancelled")]
    Cancelled,

    #[error("slack event stream closed")]
    StreamClosed,
}

impl ListenError {
    /// True if a directory lookup was rejected for bad credentials
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ListenError::Channel { source, .. }
            | ListenError::Sender { source, .. }
            | ListenError::Subject { source, .. }
            | ListenError::SelfIdentity(source)
            | ListenError::Mentions(source) => source.is_unauthorized(),
            _ => false,
        }
    }
}

/// Reports on the error channel
#[derive(Debug)]
pub enum Notice {
    /// Something went wrong; the listener carries on
    Error(ListenError),
    /// The listener has stopped and will emit nothing further
    Terminated,
}

/// Output side of a running listener
pub struct ListenerHandle {
    pub messages: mpsc::Receiver<ClassifiedMessage>,
    pub notices: mpsc::Receiver<Notice>,
    pub task: JoinHandle<()>,
}

/// Start classifying the events arriving on `events` in a background task.
///
/// The listener stops when `cancel` fires, when the workspace rejects our
/// authentication, or when the transport closes the event stream.
pub fn listen<D>(
    directory: D,
    events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    config: &ListenerConfig,
) -> ListenerHandle
where
    D: Directory + 'static,
{
    let capacity = config.channel_capacity.max(1);
    let (messages_tx, messages) = mpsc::channel(capacity);
    let (notices_tx, notices) = mpsc::channel(capacity);

    let listener = Listener {
        cache: SourceCache::new(
            directory,
            Duration::from_secs(config.resolve_timeout_secs.max(1)),
        ),
        messages: messages_tx,
        notices: notices_tx,
    };
    let task = tokio::spawn(listener.run(events, cancel));

    ListenerHandle {
        messages,
        notices,
        task,
    }
}

struct Listener<D> {
    cache: SourceCache<D>,
    messages: mpsc::Sender<ClassifiedMessage>,
    notices: mpsc::Sender<Notice>,
}

impl<D: Directory> Listener<D> {
    async fn run(mut self, mut events: mpsc::Receiver<Event>, cancel: CancellationToken) {
        info!("Started listening for Slack events");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    self.terminate(ListenError::Cancelled).await;
                    return;
                }
                event = events.recv() => event,
            };

            // The transport drops its sender when it sees the same token fire
            let Some(event) = event else {
                let cause = if cancel.is_cancelled() {
                    ListenError::Cancelled
                } else {
                    ListenError::StreamClosed
                };
                self.terminate(cause).await;
                return;
            };

            let delivered = match event {
                Event::Connected => {
                    info!("Successfully connected to Slack");
                    true
                }
                Event::Message(message) => match self.classify_message(message).await {
                    Err(e) if e.is_auth_failure() => {
                        self.terminate(e).await;
                        return;
                    }
                    outcome => self.deliver(outcome).await,
                },
                Event::StreamError(e) => self.report(ListenError::Stream(e)).await,
                Event::InvalidAuth => {
                    self.terminate(ListenError::InvalidAuth).await;
                    return;
                }
                Event::Other(kind) => {
                    debug!("Ignoring Slack event: {}", kind);
                    true
                }
            };

            if !delivered {
                warn!("Listener output dropped by consumer, stopping");
                return;
            }
        }
    }

    /// Returns false once the consumer has gone away
    async fn deliver(&self, outcome: Result<Option<ClassifiedMessage>, ListenError>) -> bool {
        match outcome {
            Ok(Some(classified)) => {
                info!("Classified message: {}", classified);
                self.messages.send(classified).await.is_ok()
            }
            Ok(None) => true,
            Err(e) => self.report(e).await,
        }
    }

    async fn classify_message(
        &mut self,
        message: MessageEvent,
    ) -> Result<Option<ClassifiedMessage>, ListenError> {
        let sent_at = parse_timestamp(&message.ts)?;

        let origin = self
            .cache
            .resolve_conversation(&message.channel)
            .await
            .map_err(|source| ListenError::Channel {
                channel: message.channel.clone(),
                source,
            })?;

        let sender = self
            .cache
            .resolve_user(&message.user)
            .await
            .map_err(|source| ListenError::Sender {
                user: message.user.clone(),
                source,
            })?;

        debug!(
            "Received Slack message in {} from {}: {}",
            origin.name, sender.name, message.text
        );

        let bot = self
            .cache
            .resolve_self()
            .await
            .map_err(ListenError::SelfIdentity)?;
        let stripped = strip_self_mentions(&bot, &message.text);

        let Some(subject) = classify(&stripped) else {
            return Ok(None);
        };

        let text = normalize_mentions(&mut self.cache, &stripped)
            .await
            .map_err(ListenError::Mentions)?;
        let reason = extract_reason(&text);

        let subject = match subject {
            Subject::Sender => sender.clone(),
            Subject::Mention(id) => {
                self.cache
                    .resolve_user(&id)
                    .await
                    .map_err(|source| ListenError::Subject {
                        subject: id.clone(),
                        source,
                    })?
            }
        };

        Ok(Some(ClassifiedMessage {
            origin,
            sender,
            sent_at,
            subject,
            reason,
            text,
        }))
    }

    async fn report(&self, error: ListenError) -> bool {
        debug!("Reporting listener error: {}", error);
        self.notices.send(Notice::Error(error)).await.is_ok()
    }

    async fn terminate(&self, cause: ListenError) {
        info!("Listener exiting: {}", cause);
        if self.report(cause).await {
            self.notices.send(Notice::Terminated).await.ok();
        }
    }
}
