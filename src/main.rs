mod cache;
mod classifier;
mod config;
mod directory;
mod events;
mod listener;
mod mentions;
mod model;
mod recorder;
mod slack;
mod timestamp;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::listener::{ListenError, Notice};
use crate::recorder::{LogRecorder, Recorder, SqliteRecorder};
use crate::slack::socket::SocketTransport;
use crate::slack::SlackClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wfhbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Slack API: {}", config.slack.api_base);
    info!(
        "  Resolve timeout: {}s",
        config.listener.resolve_timeout_secs
    );

    let recorder: Box<dyn Recorder> = match &config.recorder.database_path {
        Some(path) => Box::new(SqliteRecorder::open(path)?),
        None => Box::new(LogRecorder),
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let client = SlackClient::new(&config.slack)?;
    let transport = SocketTransport::new(
        client.clone(),
        Duration::from_millis(config.slack.reconnect_delay_ms),
    );
    let (events, transport_task) =
        transport.spawn(cancel.clone(), config.listener.channel_capacity);

    info!("Bot is starting...");
    let mut handle = listener::listen(client, events, cancel.clone(), &config.listener);

    let mut last_error: Option<ListenError> = None;
    loop {
        tokio::select! {
            Some(message) = handle.messages.recv() => {
                record(recorder.as_ref(), &message).await;
            }
            notice = handle.notices.recv() => match notice {
                Some(Notice::Error(e)) => {
                    warn!("Listener error: {}", e);
                    last_error = Some(e);
                }
                Some(Notice::Terminated) | None => break,
            },
        }
    }

    // Messages classified before termination may still be queued
    while let Some(message) = handle.messages.recv().await {
        record(recorder.as_ref(), &message).await;
    }

    cancel.cancel();
    transport_task.await.ok();
    handle.task.await.ok();

    match last_error {
        Some(ListenError::Cancelled) => {
            info!("Listener exited");
            Ok(())
        }
        Some(cause) => Err(anyhow::anyhow!("Listener exited: {}", cause)),
        None => Err(anyhow::anyhow!("Listener exited")),
    }
}

async fn record(recorder: &dyn Recorder, message: &model::ClassifiedMessage) {
    if let Err(e) = recorder.record(message).await {
        error!("Failed to record message: {:#}", e);
    }
}

/// Cancel on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }

        info!("Received termination signal");
        cancel.cancel();
    });
}
