use serde::Deserialize;
use serde_json::Value;
use settle_core::event::RawEvent;

/// Common `{ ok, error }` envelope of Slack Web API responses.
#[derive(Debug, Deserialize)]
pub(crate) struct SlackResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthTest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenConnection {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostedMessage {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepliesPage {
    #[serde(default)]
    pub messages: Vec<SlackMessage>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

impl RepliesPage {
    pub fn next_cursor(&self) -> Option<&str> {
        self.response_metadata
            .as_ref()
            .and_then(|meta| meta.next_cursor.as_deref())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserInfo {
    pub user: SlackUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub profile: UserProfile,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
}

impl SlackUser {
    /// Display name, then real name, then the raw id.
    pub fn best_name(&self) -> String {
        [&self.profile.display_name, &self.profile.real_name]
            .into_iter()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .unwrap_or(self.id.as_str())
            .to_string()
    }
}

/// A message as delivered by the Events API or `conversations.replies`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessage {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl SlackMessage {
    pub fn is_bot(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }

    pub fn into_raw_event(self, channel: Option<&str>) -> RawEvent {
        let bot = self.is_bot();
        RawEvent {
            channel: self.channel.or_else(|| channel.map(str::to_string)),
            ts: self.ts,
            thread_ts: self.thread_ts,
            user: self.user,
            text: self.text,
            bot,
        }
    }
}

/// Socket Mode frame. `hello` frames carry no envelope id.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SocketEnvelope {
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventCallback {
    pub event: CallbackEvent,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub message: SlackMessage,
    /// Present on `message_replied` subtype events.
    #[serde(default, rename = "message")]
    pub inner_message: Option<SlackMessage>,
}

/// Slash command payload (form fields forwarded as JSON in Socket Mode).
#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
}
