use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use settle_core::config::{Config, resolve_secret};
use settle_core::threads::{ReplyCounter, ThreadKey};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub(crate) mod socket;
mod types;

pub use types::{SlackMessage, SlashCommandPayload};
pub(crate) use types::{EventCallback, SocketEnvelope};
use types::{AuthTest, OpenConnection, PostedMessage, RepliesPage, SlackResponse, UserInfo};

const REPLIES_PAGE_LIMIT: &str = "200";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlackSettings {
    pub bot_token: String,
    pub app_token: String,
    pub api_base: String,
}

impl SlackSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let bot_token = resolve_secret(config.slack.bot_token.as_deref(), "SETTLE_SLACK_BOT_TOKEN")
            .ok_or_else(|| anyhow!("slack.bot_token or SETTLE_SLACK_BOT_TOKEN is required"))?;
        let app_token = resolve_secret(config.slack.app_token.as_deref(), "SETTLE_SLACK_APP_TOKEN")
            .ok_or_else(|| anyhow!("slack.app_token or SETTLE_SLACK_APP_TOKEN is required"))?;

        Ok(Self {
            bot_token,
            app_token,
            api_base: config.slack.api_base.trim_end_matches('/').to_string(),
        })
    }
}

/// Slack Web API client.
///
/// Cloning shares the HTTP pool and the user-name cache.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: String,
    user_names: Arc<Mutex<HashMap<String, String>>>,
}

impl SlackClient {
    pub fn new(settings: SlackSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create Slack HTTP client")?;
        Ok(Self {
            http,
            api_base: settings.api_base,
            bot_token: settings.bot_token,
            app_token: settings.app_token,
            user_names: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the bot's own user id.
    pub async fn auth_test(&self) -> Result<String> {
        let auth: AuthTest = self.post("auth.test", &self.bot_token, &json!({})).await?;
        Ok(auth.user_id)
    }

    /// Requests a fresh Socket Mode websocket URL.
    pub async fn open_socket_url(&self) -> Result<String> {
        let connection: OpenConnection = self
            .post("apps.connections.open", &self.app_token, &json!({}))
            .await?;
        Ok(connection.url)
    }

    /// Every message of a thread, parent first, following pagination cursors.
    pub async fn thread_replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<SlackMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("channel", channel),
                ("ts", thread_ts),
                ("limit", REPLIES_PAGE_LIMIT),
            ];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }
            let page: RepliesPage = self.get("conversations.replies", &query).await?;
            let next = page.next_cursor().map(str::to_string);
            let has_more = page.has_more;
            messages.extend(page.messages);

            match next {
                Some(next) if has_more => cursor = Some(next),
                _ => break,
            }
        }

        debug!(channel, thread_ts, messages = messages.len(), "fetched thread messages");
        Ok(messages)
    }

    /// Posts a message and returns its `ts`.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<&Value>,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
        });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks.clone();
        }
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let posted: PostedMessage = self
            .post("chat.postMessage", &self.bot_token, &payload)
            .await?;
        Ok(posted.ts)
    }

    /// Display name for a user id, cached. Falls back to the id on failure.
    pub async fn user_name(&self, user_id: &str) -> String {
        if let Some(name) = self.user_names.lock().await.get(user_id) {
            return name.clone();
        }

        match self
            .get::<UserInfo>("users.info", &[("user", user_id)])
            .await
        {
            Ok(info) => {
                let name = info.user.best_name();
                self.user_names
                    .lock()
                    .await
                    .insert(user_id.to_string(), name.clone());
                name
            }
            Err(err) => {
                warn!(user = user_id, error = %err, "failed to resolve user name");
                user_id.to_string()
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;
        Self::decode(method, response).await
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, token: &str, body: &Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            bail!("Slack {method} failed with status {status}");
        }

        let payload: SlackResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode Slack {method} response"))?;
        if !payload.ok {
            let error = payload.error.unwrap_or_else(|| "unknown error".to_string());
            bail!("Slack {method} failed: {error}");
        }
        payload
            .body
            .ok_or_else(|| anyhow!("Slack {method} response is missing expected fields"))
    }
}

#[async_trait]
impl ReplyCounter for SlackClient {
    async fn reply_count(&self, key: &ThreadKey) -> Result<usize> {
        let messages = self.thread_replies(&key.channel_id, &key.thread_ts).await?;
        Ok(messages.len().saturating_sub(1))
    }
}

/// Permalink for a message, built without an API call.
pub fn archive_link(channel: &str, ts: &str) -> String {
    format!("https://slack.com/archives/{channel}/p{}", ts.replace('.', ""))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn client(server: &MockServer) -> SlackClient {
        SlackClient::new(SlackSettings {
            bot_token: "xoxb-test".to_string(),
            app_token: "xapp-test".to_string(),
            api_base: server.uri(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn thread_replies_follows_cursor() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"ts": "3.0", "user": "U3", "text": "third"}],
                "has_more": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("ts", "1.0"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"ts": "1.0", "user": "U1", "text": "parent"},
                    {"ts": "2.0", "user": "U2", "text": "second", "thread_ts": "1.0"}
                ],
                "has_more": true,
                "response_metadata": {"next_cursor": "page2"}
            })))
            .mount(&server)
            .await;

        let slack = client(&server);
        let messages = slack.thread_replies("C1", "1.0").await.unwrap();
        let stamps: Vec<_> = messages.iter().filter_map(|m| m.ts.as_deref()).collect();
        assert_eq!(stamps, vec!["1.0", "2.0", "3.0"]);

        let count = slack.reply_count(&ThreadKey::new("C1", "1.0")).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn api_error_envelope_becomes_error() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .post_message("C404", "hi", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn post_message_sends_blocks_and_thread() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(wiremock::matchers::body_partial_json(json!({
                "channel": "C1",
                "thread_ts": "1.0",
                "blocks": [{"type": "divider"}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "ts": "9.9"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let blocks = json!([{"type": "divider"}]);
        let ts = client(&server)
            .post_message("C1", "summary", Some(&blocks), Some("1.0"))
            .await
            .unwrap();
        assert_eq!(ts, "9.9");
    }

    #[tokio::test]
    async fn user_name_is_cached_and_falls_back_to_id() {
        if !can_bind_localhost() {
            eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user": {"id": "U1", "profile": {"display_name": "", "real_name": "Ada"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "user_not_found"})),
            )
            .mount(&server)
            .await;

        let slack = client(&server);
        assert_eq!(slack.user_name("U1").await, "Ada");
        assert_eq!(slack.user_name("U1").await, "Ada");
        assert_eq!(slack.user_name("U2").await, "U2");
    }

    #[test]
    fn archive_link_strips_dot() {
        assert_eq!(
            archive_link("C1", "1712345678.000200"),
            "https://slack.com/archives/C1/p1712345678000200"
        );
    }
}
