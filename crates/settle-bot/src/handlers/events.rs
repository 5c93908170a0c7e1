use std::sync::Arc;

use anyhow::{Context, Result};
use settle_core::grouping::FlushReport;
use settle_core::status::EngineStatus;
use settle_core::threads::ThreadKey;
use tracing::{debug, info, warn};

use crate::bot::queue::ChannelQueueMap;
use crate::bot::{BotContext, Job, enqueue_job};
use crate::commands::{SlashCommand, help_text, parse_command};
use crate::slack::SlashCommandPayload;

/// Replies to an @-mention with usage help.
pub(crate) async fn handle_mention(context: &BotContext, channel: &str) -> Result<()> {
    let help = help_text(context.config().threads.min_replies);
    context
        .slack()
        .post_message(channel, &help, None, None)
        .await
        .context("Failed to post help message")?;
    Ok(())
}

pub(crate) async fn handle_command(
    context: &Arc<BotContext>,
    queues: &ChannelQueueMap,
    payload: SlashCommandPayload,
) -> Result<()> {
    let channel = payload.channel_id.as_str();
    info!(
        command = %payload.command,
        channel,
        user = %payload.user_id,
        "slash command"
    );

    let reply = match parse_command(&payload.command, &payload.text) {
        Ok(SlashCommand::AnalyzeThread { thread_ts }) => {
            let key = ThreadKey::new(channel, thread_ts);
            if context.router().threads().mark_analyzed(&key) {
                debug!(thread = %key, "cancelled pending automatic analysis");
            }
            let reply = format!("Analyzing thread `{}`...", key.thread_ts);
            enqueue_job(queues, context, Job::ManualThread(key)).await;
            reply
        }
        Ok(SlashCommand::AnalyzeGroup) => match context.router().force_flush(channel) {
            Ok(report) => flush_summary(&report),
            Err(err) => {
                warn!(channel, error = %err, "forced flush failed");
                format!("Could not flush this channel: {err}")
            }
        },
        Ok(SlashCommand::AnalyzeStatus) => status_summary(&context.router().status()),
        Err(err) => err.to_string(),
    };

    context
        .slack()
        .post_message(channel, &reply, None, None)
        .await
        .context("Failed to post command response")?;
    Ok(())
}

fn flush_summary(report: &FlushReport) -> String {
    if report.emitted == 0 && report.duplicates == 0 && report.undersized == 0 {
        return if report.held_back == 0 {
            "No buffered messages in this channel.".to_string()
        } else {
            format!(
                "{} recent message(s) are still within the grouping window; nothing to analyze yet.",
                report.held_back
            )
        };
    }
    format!(
        "Queued {} group(s) for analysis ({} too small, {} already analyzed, {} recent message(s) held back).",
        report.emitted, report.undersized, report.duplicates, report.held_back
    )
}

fn status_summary(status: &EngineStatus) -> String {
    let mut lines = vec![
        "*settle status*".to_string(),
        format!(
            "• Buffered messages: {} across {} channel(s), {} flush timer(s) armed",
            status.buffered_total(),
            status.channels.len(),
            status.armed_timers()
        ),
        format!("• Groups analyzed: {}", status.groups_processed),
        format!(
            "• Threads: {} waiting to settle, {} analyzed",
            status.threads_watching, status.threads_analyzed
        ),
    ];
    for (channel, channel_status) in &status.channels {
        lines.push(format!(
            "  ◦ <#{channel}>: {} buffered{}",
            channel_status.buffered,
            if channel_status.timer_armed {
                ", timer armed"
            } else {
                ""
            }
        ));
    }
    lines.join("\n")
}
