//! Chat event model.

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Event as delivered by a source adapter, before validation.
///
/// Field names follow the Slack message payload so adapters and fixtures can
/// deserialize straight into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub channel: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub bot: bool,
}

/// One validated chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    pub channel_id: String,
    /// Source timestamp exactly as delivered; used in identities and links.
    pub ts: String,
    /// `ts` parsed to seconds; the ordering key.
    pub timestamp: f64,
    /// Parent timestamp when the message belongs to a thread.
    pub thread_key: Option<String>,
    pub author_id: String,
    pub text: String,
    pub bot: bool,
    /// Local arrival time. Only used for staleness checks, never for ordering.
    pub received_at: f64,
}

impl ChatEvent {
    /// Validates a raw event.
    ///
    /// # Errors
    /// Returns an [`EventError`] when the channel or timestamp is missing or
    /// the timestamp is not a finite number.
    pub fn parse(raw: RawEvent, received_at: f64) -> Result<Self, EventError> {
        let channel_id = non_empty(raw.channel).ok_or(EventError::MissingChannel)?;
        let ts = non_empty(raw.ts).ok_or(EventError::MissingTimestamp)?;
        let timestamp = ts
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| EventError::InvalidTimestamp(ts.clone()))?;

        Ok(Self {
            channel_id,
            ts,
            timestamp,
            thread_key: non_empty(raw.thread_ts),
            author_id: raw.user.unwrap_or_default(),
            text: raw.text.unwrap_or_default(),
            bot: raw.bot,
            received_at,
        })
    }

    /// True for thread replies and for thread parents (`thread_ts == ts`).
    pub fn is_threaded(&self) -> bool {
        self.thread_key.is_some()
    }

    /// Seconds between the source timestamp and local arrival.
    pub fn age_at_arrival(&self) -> f64 {
        self.received_at - self.timestamp
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
