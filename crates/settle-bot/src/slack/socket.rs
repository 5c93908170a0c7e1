//! Socket Mode framing: websocket messages in, typed inbound events out.

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt};
use serde_json::json;
use settle_core::event::RawEvent;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::{EventCallback, SlashCommandPayload, SocketEnvelope};

/// What an envelope asks the runtime to do.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A channel message or thread reply for the router.
    Message(RawEvent),
    /// The bot was mentioned.
    Mention { channel: String },
    Command(SlashCommandPayload),
    /// Slack is about to close the connection; reconnect.
    Disconnect { reason: Option<String> },
    Ignored,
}

pub(crate) fn parse_frame(message: WsMessage) -> Result<Option<SocketEnvelope>> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 Socket Mode payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None);
        }
    };
    let envelope = serde_json::from_str::<SocketEnvelope>(&text)
        .context("failed to parse Socket Mode envelope")?;
    Ok(Some(envelope))
}

pub(crate) async fn ack<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send Socket Mode ack")
}

pub(crate) fn classify(envelope: SocketEnvelope) -> Result<Inbound> {
    match envelope.kind.as_str() {
        "events_api" => {
            let callback: EventCallback = serde_json::from_value(envelope.payload)
                .context("failed to parse events_api payload")?;
            Ok(classify_event(callback))
        }
        "slash_commands" => {
            let command: SlashCommandPayload = serde_json::from_value(envelope.payload)
                .context("failed to parse slash command payload")?;
            Ok(Inbound::Command(command))
        }
        "disconnect" => Ok(Inbound::Disconnect {
            reason: envelope.reason,
        }),
        other => {
            debug!(kind = other, "ignoring Socket Mode frame");
            Ok(Inbound::Ignored)
        }
    }
}

fn classify_event(callback: EventCallback) -> Inbound {
    let event = callback.event;
    match event.kind.as_str() {
        "app_mention" => match event.message.channel {
            Some(channel) => Inbound::Mention { channel },
            None => Inbound::Ignored,
        },
        "message" => {
            let channel = event.message.channel.clone();
            let subtype = event.message.subtype.clone();
            match subtype.as_deref() {
                // Edits and deletions are not new activity.
                Some("message_changed" | "message_deleted") => Inbound::Ignored,
                Some("message_replied") => match event.inner_message {
                    Some(inner) => Inbound::Message(inner.into_raw_event(channel.as_deref())),
                    None => Inbound::Ignored,
                },
                _ => Inbound::Message(event.message.into_raw_event(None)),
            }
        }
        other => {
            debug!(kind = other, "ignoring event type");
            Inbound::Ignored
        }
    }
}
