//! Offline dry-run of channel grouping.
//!
//! Feeds a JSON array of messages through the same partition the grouping
//! engine uses, without timers, dedup, or Slack.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use settle_core::clock::{Clock, SystemClock};
use settle_core::event::{ChatEvent, RawEvent};
use settle_core::grouping::partition;

pub struct PreviewOptions<'a> {
    pub file: &'a Path,
    pub now: Option<f64>,
    pub gap_secs: u64,
    pub min_size: usize,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PreviewReport {
    now: f64,
    gap_secs: u64,
    min_size: usize,
    channels: Vec<ChannelPreview>,
    skipped: Skipped,
}

#[derive(Debug, Serialize)]
struct ChannelPreview {
    channel: String,
    groups: Vec<GroupPreview>,
    held_back: usize,
}

#[derive(Debug, Serialize)]
struct GroupPreview {
    ordinal: usize,
    size: usize,
    first_ts: String,
    last_ts: String,
    emitted: bool,
}

#[derive(Debug, Default, Serialize)]
struct Skipped {
    malformed: usize,
    bot: usize,
    threaded: usize,
}

pub fn run(options: &PreviewOptions<'_>) -> Result<()> {
    let contents = fs::read_to_string(options.file)
        .with_context(|| format!("read {}", options.file.display()))?;
    let raw: Vec<RawEvent> = serde_json::from_str(&contents)
        .with_context(|| format!("parse {} as a JSON array of messages", options.file.display()))?;
    let now = options.now.unwrap_or_else(|| SystemClock.now());

    let report = build_report(raw, now, options.gap_secs, options.min_size);
    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize preview")?
        );
    } else {
        print!("{}", render_text(&report));
    }
    Ok(())
}

fn build_report(raw: Vec<RawEvent>, now: f64, gap_secs: u64, min_size: usize) -> PreviewReport {
    let mut skipped = Skipped::default();
    let mut by_channel: BTreeMap<String, Vec<ChatEvent>> = BTreeMap::new();
    for raw in raw {
        match ChatEvent::parse(raw, now) {
            Err(_) => skipped.malformed += 1,
            Ok(event) if event.bot => skipped.bot += 1,
            Ok(event) if event.is_threaded() => skipped.threaded += 1,
            Ok(event) => by_channel
                .entry(event.channel_id.clone())
                .or_default()
                .push(event),
        }
    }

    let channels = by_channel
        .into_iter()
        .map(|(channel, events)| {
            let split = partition(events, gap_secs as f64, now);
            let groups = split
                .finalized
                .iter()
                .enumerate()
                .filter_map(|(index, run)| {
                    let (first, last) = (run.first()?, run.last()?);
                    Some(GroupPreview {
                        ordinal: index + 1,
                        size: run.len(),
                        first_ts: first.ts.clone(),
                        last_ts: last.ts.clone(),
                        emitted: run.len() >= min_size,
                    })
                })
                .collect();
            ChannelPreview {
                channel,
                groups,
                held_back: split.open_tail.len(),
            }
        })
        .collect();

    PreviewReport {
        now,
        gap_secs,
        min_size,
        channels,
        skipped,
    }
}

fn render_text(report: &PreviewReport) -> String {
    let mut out = format!(
        "now={:.6} gap={}s min_size={}\n",
        report.now, report.gap_secs, report.min_size
    );
    if report.channels.is_empty() {
        out.push_str("No channel messages to group.\n");
    }
    for channel in &report.channels {
        out.push_str(&format!("channel {}\n", channel.channel));
        for group in &channel.groups {
            let verdict = if group.emitted {
                "emitted".to_string()
            } else {
                format!("dropped (below {})", report.min_size)
            };
            out.push_str(&format!(
                "  group {}: {} message(s), {} .. {} -> {verdict}\n",
                group.ordinal, group.size, group.first_ts, group.last_ts
            ));
        }
        out.push_str(&format!("  open tail: {} message(s)\n", channel.held_back));
    }
    let skipped = &report.skipped;
    if skipped.malformed + skipped.bot + skipped.threaded > 0 {
        out.push_str(&format!(
            "skipped: {} malformed, {} bot, {} thread message(s)\n",
            skipped.malformed, skipped.bot, skipped.threaded
        ));
    }
    out
}
