//! Slack runtime for settle.
//!
//! Socket Mode envelopes feed the core [`Router`]; ready units come back on
//! the ready channel and are analyzed by one worker per channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use settle_core::clock::SystemClock;
use settle_core::config::Config;
use settle_core::ready::ready_channel;
use settle_core::router::Router;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::bot::queue::ChannelQueueMap;
use crate::bot::{BotContext, forward_ready, new_channel_queues};
use crate::handlers::events::{handle_command, handle_mention};
use crate::slack::socket::{self, Inbound};
use crate::slack::{SlackClient, SlackSettings};
use crate::summarize::{GeminiClient, Summarizer};

mod bot;
mod commands;
mod handlers;
pub mod notion;
pub mod render;
pub mod slack;
pub mod summarize;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

enum SessionEnd {
    Shutdown,
    Closed,
}

pub async fn run(config: Config) -> Result<()> {
    let settings = SlackSettings::from_config(&config)?;
    let slack = SlackClient::new(settings)?;
    let bot_user = slack
        .auth_test()
        .await
        .context("Slack auth.test failed; check slack.bot_token")?;
    let summarizer: Arc<dyn Summarizer> = Arc::new(GeminiClient::from_config(&config)?);
    let notion = notion::NotionClient::from_config(&config);

    info!(
        bot_user = %bot_user,
        model = %config.summarizer.model,
        notion = notion.is_some(),
        time_gap_secs = config.grouping.time_gap_secs,
        group_wait_minutes = config.grouping.wait_minutes,
        min_replies = config.threads.min_replies,
        thread_wait_minutes = config.threads.wait_minutes,
        "settle bot starting"
    );

    let (ready_tx, ready_rx) = ready_channel();
    let router = Router::new(
        &config,
        Arc::new(SystemClock),
        Arc::new(slack.clone()),
        ready_tx,
    );
    let context = Arc::new(BotContext::new(slack, summarizer, notion, router, config));
    let queues = new_channel_queues();
    tokio::spawn(forward_ready(
        ready_rx,
        Arc::clone(&queues),
        Arc::clone(&context),
    ));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        match run_socket_session(&context, &queues, &mut shutdown).await {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Closed) => info!("Socket Mode connection closed; reconnecting"),
            Err(err) => warn!(error = %format!("{err:#}"), "Socket Mode session failed"),
        }

        tokio::select! {
            _ = &mut shutdown => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    let status = context.router().status();
    info!(
        buffered = status.buffered_total(),
        threads_watching = status.threads_watching,
        "shutting down; pending groups and thread watches are discarded"
    );
    Ok(())
}

async fn run_socket_session<S>(
    context: &Arc<BotContext>,
    queues: &ChannelQueueMap,
    shutdown: &mut Pin<&mut S>,
) -> Result<SessionEnd>
where
    S: Future,
{
    let url = context.slack().open_socket_url().await?;
    let (stream, _response) = connect_async(url.as_str())
        .await
        .context("failed to connect Socket Mode websocket")?;
    let (mut sink, mut source) = stream.split();
    info!("Socket Mode connected");

    loop {
        tokio::select! {
            _ = shutdown.as_mut() => return Ok(SessionEnd::Shutdown),
            frame = source.next() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::Closed);
                };
                let frame = frame.context("failed reading Socket Mode frame")?;
                let Some(envelope) = socket::parse_frame(frame)? else {
                    continue;
                };
                if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                    socket::ack(&mut sink, envelope_id).await?;
                }
                match socket::classify(envelope) {
                    Ok(Inbound::Disconnect { reason }) => {
                        info!(reason = reason.as_deref().unwrap_or("unspecified"), "Slack requested reconnect");
                        return Ok(SessionEnd::Closed);
                    }
                    Ok(inbound) => dispatch(context, queues, inbound),
                    Err(err) => warn!(error = %format!("{err:#}"), "dropping unreadable envelope"),
                }
            }
        }
    }
}

/// Message ingestion is synchronous; anything that talks to Slack runs on
/// its own task so the socket keeps draining.
fn dispatch(context: &Arc<BotContext>, queues: &ChannelQueueMap, inbound: Inbound) {
    match inbound {
        Inbound::Message(raw) => {
            let routed = context.router().ingest(raw);
            debug!(?routed, "routed message");
        }
        Inbound::Mention { channel } => {
            let context = Arc::clone(context);
            tokio::spawn(async move {
                if let Err(err) = handle_mention(&context, &channel).await {
                    error!(channel = %channel, error = %format!("{err:#}"), "mention handling failed");
                }
            });
        }
        Inbound::Command(payload) => {
            let context = Arc::clone(context);
            let queues = Arc::clone(queues);
            tokio::spawn(async move {
                let channel = payload.channel_id.clone();
                if let Err(err) = handle_command(&context, &queues, payload).await {
                    error!(channel = %channel, error = %format!("{err:#}"), "slash command failed");
                }
            });
        }
        Inbound::Disconnect { .. } | Inbound::Ignored => {}
    }
}
