//! Slack Block Kit rendering for analysis results.

use serde_json::{Value, json};

use crate::summarize::{GroupAnalysis, GroupKind, ThreadAnalysis};

/// Blocks plus the plain-text fallback Slack shows in notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub blocks: Value,
}

const NONE_LABEL: &str = "None";

fn header(text: &str) -> Value {
    json!({"type": "header", "text": {"type": "plain_text", "text": text, "emoji": true}})
}

fn section(text: &str) -> Value {
    json!({"type": "section", "text": {"type": "mrkdwn", "text": text}})
}

fn context(text: &str) -> Value {
    json!({"type": "context", "elements": [{"type": "mrkdwn", "text": text}]})
}

fn divider() -> Value {
    json!({"type": "divider"})
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return NONE_LABEL.to_string();
    }
    items
        .iter()
        .map(|item| format!("• {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

fn mentions<'a>(user_ids: impl IntoIterator<Item = &'a String>, separator: &str) -> String {
    user_ids
        .into_iter()
        .filter(|id| !id.trim().is_empty())
        .map(|id| mention(id))
        .collect::<Vec<_>>()
        .join(separator)
}

fn sentiment_emoji(sentiment: &str) -> &'static str {
    match sentiment.to_ascii_lowercase().as_str() {
        "positive" => "😀",
        "neutral" => "😐",
        "negative" => "😟",
        _ => "🤔",
    }
}

fn urgency_emoji(urgency: &str) -> &'static str {
    match urgency.to_ascii_lowercase().as_str() {
        "high" => "🔴",
        "medium" => "🟡",
        "low" => "🟢",
        _ => "⚪",
    }
}

pub fn thread_analysis(analysis: &ThreadAnalysis) -> Rendered {
    let tags = if analysis.tags.is_empty() {
        NONE_LABEL.to_string()
    } else {
        analysis
            .tags
            .iter()
            .map(|tag| format!("#{tag}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let sentiment = if analysis.sentiment.is_empty() {
        "unknown".to_string()
    } else {
        analysis.sentiment.to_uppercase()
    };

    let blocks = json!([
        header("🧵 Thread summary"),
        section(&format!("*Summary*\n{}", analysis.summary)),
        divider(),
        section(&format!("*Key points*\n{}", bullets(&analysis.key_points))),
        section(&format!("*Decisions*\n{}", bullets(&analysis.decisions))),
        section(&format!("*Action items*\n{}", bullets(&analysis.action_items))),
        divider(),
        context(&format!(
            "*Sentiment:* {} {sentiment}",
            sentiment_emoji(&analysis.sentiment)
        )),
        context(&format!("*Tags:* {tags}")),
    ]);

    Rendered {
        text: format!("🧵 Thread summary: {}", analysis.summary),
        blocks,
    }
}

pub fn group_analysis(analysis: &GroupAnalysis) -> Rendered {
    let (title, mut blocks, notify) = match analysis.analysis_type {
        GroupKind::Qa => (
            "📝 Q&A recap",
            qa_blocks(analysis),
            analysis
                .qna
                .iter()
                .map(|qa| mentions([&qa.questioner, &qa.answerer], " "))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        GroupKind::DecisionMade => (
            "✅ Decision made",
            decision_made_blocks(analysis),
            mentions(analysis.decisions.iter().map(|d| &d.decision_maker), " "),
        ),
        GroupKind::DecisionNeeded => (
            "⚠️ Decision needed",
            decision_needed_blocks(analysis),
            mentions(
                analysis
                    .pending_decisions
                    .iter()
                    .flat_map(|pending| &pending.suggested_decision_makers),
                " ",
            ),
        ),
        GroupKind::General => ("📊 Message group recap", general_blocks(analysis), String::new()),
    };
    blocks.insert(0, header(title));

    let mut text = title.to_string();
    if !notify.trim().is_empty() {
        text.push('\n');
        text.push_str(notify.trim());
    }
    let action = &analysis.action_required;
    if action.needs_response && !action.target_users.is_empty() {
        text.push('\n');
        text.push_str(&mentions(&action.target_users, " "));
        if !action.message.is_empty() {
            text.push(' ');
            text.push_str(&action.message);
        }
    }

    Rendered {
        text,
        blocks: Value::Array(blocks),
    }
}

fn summary_blocks(analysis: &GroupAnalysis) -> Vec<Value> {
    vec![
        section(&format!("*Summary*\n{}", analysis.summary)),
        divider(),
    ]
}

fn qa_blocks(analysis: &GroupAnalysis) -> Vec<Value> {
    let mut blocks = summary_blocks(analysis);
    for (index, qa) in analysis.qna.iter().enumerate() {
        let n = index + 1;
        blocks.push(section(&format!(
            "*Q{n}.* {}\n*A{n}.* {}",
            qa.question, qa.answer
        )));
        blocks.push(context(&format!(
            "Asked by {} | Answered by {}",
            mention(&qa.questioner),
            mention(&qa.answerer)
        )));
    }
    blocks
}

fn decision_made_blocks(analysis: &GroupAnalysis) -> Vec<Value> {
    let mut blocks = summary_blocks(analysis);
    for (index, decision) in analysis.decisions.iter().enumerate() {
        blocks.push(section(&format!(
            "*Decision {}*\n{}",
            index + 1,
            decision.decision
        )));
        blocks.push(context(&format!(
            "Decided by {} | Context: {}",
            mention(&decision.decision_maker),
            decision.context
        )));
    }
    blocks
}

fn decision_needed_blocks(analysis: &GroupAnalysis) -> Vec<Value> {
    let mut blocks = summary_blocks(analysis);
    for (index, pending) in analysis.pending_decisions.iter().enumerate() {
        blocks.push(section(&format!(
            "{} *Open decision {}*\n{}",
            urgency_emoji(&pending.urgency),
            index + 1,
            pending.issue
        )));
        blocks.push(context(&format!(
            "Urgency: {} | Suggested deciders: {}",
            pending.urgency.to_uppercase(),
            mentions(&pending.suggested_decision_makers, " ")
        )));
        if !pending.context.is_empty() {
            blocks.push(section(&format!("*Situation:* {}", pending.context)));
        }
    }
    blocks
}

fn general_blocks(analysis: &GroupAnalysis) -> Vec<Value> {
    vec![
        section(&format!("*Summary*\n{}", analysis.summary)),
        context(&format!(
            "Participants: {}",
            mentions(&analysis.participants, ", ")
        )),
    ]
}
