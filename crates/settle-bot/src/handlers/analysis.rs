use anyhow::{Context, Result};
use settle_core::ready::{GroupReady, Ready, ThreadReady};
use settle_core::threads::ThreadKey;
use tracing::{info, warn};

use crate::bot::{BotContext, Job};
use crate::render;
use crate::slack::SlackMessage;
use crate::summarize::{TranscriptLine, format_transcript};

pub(crate) async fn run_job(context: &BotContext, job: Job) -> Result<()> {
    match job {
        Job::Ready(Ready::Thread(ThreadReady { key, reply_count })) => {
            info!(thread = %key, replies = reply_count, "analyzing settled thread");
            analyze_thread(context, &key).await
        }
        Job::Ready(Ready::Group(group)) => analyze_group(context, &group).await,
        Job::ManualThread(key) => {
            info!(thread = %key, "analyzing thread on request");
            analyze_thread(context, &key).await
        }
    }
}

/// Summarizes a thread, replies inside it, and exports to Notion when configured.
pub(crate) async fn analyze_thread(context: &BotContext, key: &ThreadKey) -> Result<()> {
    let slack = context.slack();
    let messages = slack
        .thread_replies(&key.channel_id, &key.thread_ts)
        .await
        .with_context(|| format!("Failed to fetch thread {key}"))?;

    let mut lines = Vec::with_capacity(messages.len());
    for message in messages.iter().filter(|message| !message.is_bot()) {
        lines.push(thread_line(context, message).await);
    }
    if lines.is_empty() {
        info!(thread = %key, "thread has no human messages; skipping");
        return Ok(());
    }

    let analysis = context
        .summarizer()
        .analyze_thread(&format_transcript(&lines))
        .await
        .with_context(|| format!("Failed to summarize thread {key}"))?;

    let rendered = render::thread_analysis(&analysis);
    let posted = slack
        .post_message(
            &key.channel_id,
            &rendered.text,
            Some(&rendered.blocks),
            Some(&key.thread_ts),
        )
        .await
        .with_context(|| format!("Failed to post analysis for thread {key}"))?;
    info!(thread = %key, ts = %posted, parse_error = analysis.error, "posted thread analysis");

    if let Some(notion) = context.notion()
        && let Err(err) = notion
            .save_thread_analysis(&key.channel_id, &key.thread_ts, &analysis, &lines)
            .await
    {
        warn!(thread = %key, error = %format!("{err:#}"), "Notion export failed");
    }
    Ok(())
}

async fn thread_line(context: &BotContext, message: &SlackMessage) -> TranscriptLine {
    let author = match message.user.as_deref() {
        Some(user) => context.slack().user_name(user).await,
        None => "unknown".to_string(),
    };
    TranscriptLine {
        ts: message.ts.clone().unwrap_or_default(),
        author,
        text: message.text.clone().unwrap_or_default(),
    }
}

/// Summarizes a channel group, posts the recap to the channel, and exports
/// to Notion when configured.
pub(crate) async fn analyze_group(context: &BotContext, group: &GroupReady) -> Result<()> {
    // User ids stay raw so the model can hand them back for mentions.
    let lines: Vec<TranscriptLine> = group
        .events
        .iter()
        .map(|event| TranscriptLine {
            ts: event.ts.clone(),
            author: event.author_id.clone(),
            text: event.text.clone(),
        })
        .collect();
    info!(
        group = %group.id,
        messages = lines.len(),
        of_groups = group.total_groups,
        "analyzing message group"
    );

    let analysis = context
        .summarizer()
        .analyze_group(&format_transcript(&lines))
        .await
        .with_context(|| format!("Failed to summarize group {}", group.id))?;

    let rendered = render::group_analysis(&analysis);
    let posted = context
        .slack()
        .post_message(
            group.channel_id(),
            &rendered.text,
            Some(&rendered.blocks),
            None,
        )
        .await
        .with_context(|| format!("Failed to post analysis for group {}", group.id))?;
    info!(
        group = %group.id,
        ts = %posted,
        kind = ?analysis.analysis_type,
        "posted group analysis"
    );

    if let Some(notion) = context.notion()
        && let Err(err) = notion
            .save_group_analysis(group.channel_id(), &group.id.first_ts, &analysis, &lines)
            .await
    {
        warn!(group = %group.id, error = %format!("{err:#}"), "Notion export failed");
    }
    Ok(())
}
