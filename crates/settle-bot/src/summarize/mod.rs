//! Conversation analysis: transcript formatting, model output parsing, and
//! the [`Summarizer`] seam the analysis workers call through.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

mod gemini;

pub use gemini::GeminiClient;

const PARSE_FAILURE_SUMMARY: &str = "The analysis result could not be parsed.";

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn analyze_thread(&self, transcript: &str) -> Result<ThreadAnalysis>;
    async fn analyze_group(&self, transcript: &str) -> Result<GroupAnalysis>;
}

/// One message of a transcript with its author already resolved to a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub ts: String,
    pub author: String,
    pub text: String,
}

/// Renders `[time] @author: text` lines separated by blank lines.
pub fn format_transcript(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(|line| format!("[{}] @{}: {}", display_time(&line.ts), line.author, line.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn display_time(ts: &str) -> String {
    ts.parse::<f64>()
        .ok()
        .and_then(|secs| {
            chrono::DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        })
        .map_or_else(
            || ts.to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThreadAnalysis {
    pub summary: String,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<String>,
    pub stakeholders: BTreeMap<String, String>,
    pub sentiment: String,
    pub tags: Vec<String>,
    /// Set when the model reply could not be parsed.
    pub error: bool,
}

impl ThreadAnalysis {
    pub fn parse(reply: &str) -> Self {
        parse_reply(reply).unwrap_or_else(|| Self {
            summary: PARSE_FAILURE_SUMMARY.to_string(),
            error: true,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Qa,
    DecisionMade,
    DecisionNeeded,
    #[default]
    #[serde(other)]
    General,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QnaItem {
    pub question: String,
    pub questioner: String,
    pub answer: String,
    pub answerer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecisionItem {
    pub decision: String,
    pub decision_maker: String,
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PendingDecision {
    pub issue: String,
    pub suggested_decision_makers: Vec<String>,
    pub urgency: String,
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionRequired {
    pub needs_response: bool,
    pub target_users: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupAnalysis {
    pub analysis_type: GroupKind,
    pub summary: String,
    pub qna: Vec<QnaItem>,
    pub decisions: Vec<DecisionItem>,
    pub pending_decisions: Vec<PendingDecision>,
    pub action_required: ActionRequired,
    pub participants: Vec<String>,
    pub error: bool,
}

impl GroupAnalysis {
    pub fn parse(reply: &str) -> Self {
        let mut analysis = parse_reply(reply).unwrap_or_else(|| Self {
            summary: PARSE_FAILURE_SUMMARY.to_string(),
            error: true,
            ..Self::default()
        });
        if analysis.summary.trim().is_empty() {
            analysis.summary = "No summary could be generated.".to_string();
        }
        analysis
    }
}

/// The span from the first `{` to the last `}`, so prose or code fences
/// around the JSON are tolerated.
fn json_span(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

fn parse_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let span = json_span(reply).unwrap_or(reply);
    match serde_json::from_str(span) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(error = %err, "failed to parse model reply as JSON");
            None
        }
    }
}
