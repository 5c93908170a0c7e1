//! Notion export of thread and group analyses.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use settle_core::config::{Config, resolve_secret};
use tracing::{info, warn};

use crate::slack::archive_link;
use crate::summarize::{GroupAnalysis, ThreadAnalysis, TranscriptLine, format_transcript};

const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const TITLE_LIMIT: usize = 100;
const EMPTY_TITLE: &str = "(no content)";

pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    database_id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPage {
    id: String,
}

impl NotionClient {
    pub fn new(api_key: String, database_id: String, base_url: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            database_id,
        }
    }

    /// `None` unless both the API key and the database id resolve.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = resolve_secret(config.notion.api_key.as_deref(), "SETTLE_NOTION_API_KEY");
        let database_id = resolve_secret(
            config.notion.database_id.as_deref(),
            "SETTLE_NOTION_DATABASE_ID",
        );
        match (api_key, database_id) {
            (Some(api_key), Some(database_id)) => Some(Self::new(
                api_key,
                database_id,
                config.notion.base_url.as_deref(),
            )),
            (Some(_), None) => {
                warn!("notion.api_key is set but notion.database_id is missing; Notion export disabled");
                None
            }
            _ => None,
        }
    }

    /// Creates a database page for a thread analysis. Returns the page id.
    pub async fn save_thread_analysis(
        &self,
        channel: &str,
        thread_ts: &str,
        analysis: &ThreadAnalysis,
        messages: &[TranscriptLine],
    ) -> Result<String> {
        let body = page_body(&self.database_id, channel, thread_ts, analysis, messages);
        let id = self.create_page(&body).await?;
        info!(page = %id, channel, thread = thread_ts, "created Notion page");
        Ok(id)
    }

    /// Creates a database page for a channel group, linked to its first
    /// message. Sentiment and tags stay unset.
    pub async fn save_group_analysis(
        &self,
        channel: &str,
        first_ts: &str,
        analysis: &GroupAnalysis,
        messages: &[TranscriptLine],
    ) -> Result<String> {
        let body = group_page_body(&self.database_id, channel, first_ts, analysis, messages);
        let id = self.create_page(&body).await?;
        info!(page = %id, channel, first_ts, "created Notion page for group");
        Ok(id)
    }

    async fn create_page(&self, body: &Value) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/pages", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .context("Notion pages request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Notion returned {status}: {text}");
        }
        let page: CreatedPage = response
            .json()
            .await
            .context("Failed to decode Notion page response")?;
        Ok(page.id)
    }
}

fn page_title(messages: &[TranscriptLine]) -> String {
    let first = messages
        .first()
        .map(|line| line.text.trim())
        .filter(|text| !text.is_empty())
        .unwrap_or(EMPTY_TITLE);
    if first.chars().count() > TITLE_LIMIT {
        let head: String = first.chars().take(TITLE_LIMIT - 3).collect();
        format!("{head}...")
    } else {
        first.to_string()
    }
}

fn rich_text(content: &str) -> Value {
    json!([{"type": "text", "text": {"content": content}}])
}

fn block(kind: &str, content: &str) -> Value {
    json!({"object": "block", "type": kind, kind: {"rich_text": rich_text(content)}})
}

fn bullet_blocks(items: &[String]) -> Vec<Value> {
    if items.is_empty() {
        return vec![block("paragraph", "None")];
    }
    items
        .iter()
        .map(|item| block("bulleted_list_item", item))
        .collect()
}

fn page_body(
    database_id: &str,
    channel: &str,
    thread_ts: &str,
    analysis: &ThreadAnalysis,
    messages: &[TranscriptLine],
) -> Value {
    let mut children = vec![
        block("heading_1", "Thread analysis"),
        block("paragraph", &analysis.summary),
        block("heading_2", "Key points"),
    ];
    children.extend(bullet_blocks(&analysis.key_points));
    children.push(block("heading_2", "Decisions"));
    children.extend(bullet_blocks(&analysis.decisions));
    children.push(block("heading_2", "Action items"));
    children.extend(bullet_blocks(&analysis.action_items));
    children.push(block("heading_2", "Original thread"));
    children.push(transcript_toggle("Thread messages (expand)", messages));

    let mut properties = base_properties(channel, thread_ts, &analysis.summary, messages);
    properties["Tags"] = json!({
        "multi_select": analysis.tags.iter().map(|tag| json!({"name": tag})).collect::<Vec<_>>()
    });
    // Notion rejects an empty select option.
    if !analysis.sentiment.is_empty() {
        properties["Sentiment"] = json!({"select": {"name": analysis.sentiment}});
    }

    json!({
        "parent": {"database_id": database_id},
        "properties": properties,
        "children": children,
    })
}

fn group_page_body(
    database_id: &str,
    channel: &str,
    first_ts: &str,
    analysis: &GroupAnalysis,
    messages: &[TranscriptLine],
) -> Value {
    let mut children = vec![
        block("heading_1", "Group analysis"),
        block("paragraph", &analysis.summary),
        block("heading_2", "Participants"),
    ];
    children.extend(bullet_blocks(&analysis.participants));
    children.push(block("heading_2", "Original messages"));
    children.push(transcript_toggle("Group messages (expand)", messages));

    json!({
        "parent": {"database_id": database_id},
        "properties": base_properties(channel, first_ts, &analysis.summary, messages),
        "children": children,
    })
}

fn base_properties(channel: &str, ts: &str, summary: &str, messages: &[TranscriptLine]) -> Value {
    json!({
        "title": {"title": rich_text(&page_title(messages))},
        "Summary": {"rich_text": rich_text(summary)},
        "ThreadLink": {"url": archive_link(channel, ts)},
        "Channel": {"rich_text": rich_text(channel)},
        "Date": {"date": {"start": Utc::now().to_rfc3339()}},
    })
}

fn transcript_toggle(label: &str, messages: &[TranscriptLine]) -> Value {
    let transcript: Vec<Value> = messages
        .iter()
        .map(|line| block("paragraph", &format_transcript(std::slice::from_ref(line))))
        .collect();
    json!({
        "object": "block",
        "type": "toggle",
        "toggle": {
            "rich_text": rich_text(label),
            "children": transcript,
        }
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn line(text: &str) -> TranscriptLine {
        TranscriptLine {
            ts: "1700000000.000100".to_string(),
            author: "ada".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn long_titles_are_truncated_on_chars() {
        let long = "é".repeat(150);
        let title = page_title(&[line(&long)]);
        assert_eq!(title.chars().count(), 100);
        assert!(title.ends_with("..."));

        assert_eq!(page_title(&[line("short")]), "short");
        assert_eq!(page_title(&[]), EMPTY_TITLE);
    }

    #[test]
    fn empty_sections_render_none_paragraph() {
        let body = page_body("db", "C1", "1.0", &ThreadAnalysis::default(), &[line("hi")]);
        let children = body["children"].as_array().unwrap();
        let nones = children
            .iter()
            .filter(|b| b.pointer("/paragraph/rich_text/0/text/content") == Some(&json!("None")))
            .count();
        assert_eq!(nones, 3);
        assert!(body["properties"].get("Sentiment").is_none());
        assert_eq!(
            body["properties"]["ThreadLink"]["url"],
            "https://slack.com/archives/C1/p10"
        );
    }

    #[test]
    fn from_config_requires_database_id() {
        let mut config = Config::default();
        config.notion.api_key = Some("secret".to_string());
        config.notion.database_id = Some("db".to_string());
        assert!(NotionClient::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn creates_page_with_version_header() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "parent": {"database_id": "db1"},
                "properties": {"Sentiment": {"select": {"name": "neutral"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotionClient::new("secret".to_string(), "db1".to_string(), Some(&server.uri()));
        let analysis = ThreadAnalysis {
            summary: "ok".to_string(),
            sentiment: "neutral".to_string(),
            ..ThreadAnalysis::default()
        };
        let id = client
            .save_thread_analysis("C1", "1.0", &analysis, &[line("first")])
            .await
            .unwrap();
        assert_eq!(id, "page-1");
    }

    #[tokio::test]
    async fn api_failure_is_an_error() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("validation_error"))
            .mount(&server)
            .await;

        let client = NotionClient::new("k".to_string(), "db".to_string(), Some(&server.uri()));
        let err = client
            .save_thread_analysis("C1", "1.0", &ThreadAnalysis::default(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn group_page_has_no_sentiment_or_tags() {
        let analysis = GroupAnalysis {
            summary: "Standup".to_string(),
            participants: vec!["U1".to_string(), "U2".to_string()],
            ..GroupAnalysis::default()
        };
        let body = group_page_body("db", "C7", "10.000100", &analysis, &[line("morning")]);
        let properties = &body["properties"];
        assert!(properties.get("Sentiment").is_none());
        assert!(properties.get("Tags").is_none());
        assert_eq!(properties["ThreadLink"]["url"], "https://slack.com/archives/C7/p10000100");
        assert_eq!(properties["Channel"]["rich_text"][0]["text"]["content"], "C7");
        assert_eq!(properties["title"]["title"][0]["text"]["content"], "morning");
        let bullets = body["children"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|b| b["type"] == "bulleted_list_item")
            .count();
        assert_eq!(bullets, 2);
    }

    #[tokio::test]
    async fn saves_group_analysis_page() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(body_partial_json(json!({
                "parent": {"database_id": "db1"},
                "properties": {"Summary": {"rich_text": [{"text": {"content": "Standup"}}]}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-7"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotionClient::new("secret".to_string(), "db1".to_string(), Some(&server.uri()));
        let analysis = GroupAnalysis {
            summary: "Standup".to_string(),
            ..GroupAnalysis::default()
        };
        let id = client
            .save_group_analysis("C7", "10.0", &analysis, &[line("morning")])
            .await
            .unwrap();
        assert_eq!(id, "page-7");
    }
}
