use thiserror::Error;

/// Reasons an incoming event is refused before it reaches any buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event has no channel id")]
    MissingChannel,
    #[error("event has no timestamp")]
    MissingTimestamp,
    #[error("event timestamp {0:?} is not a finite number")]
    InvalidTimestamp(String),
}

/// State-machine defects and delivery failures inside the engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The receiving half of the ready-unit channel was dropped.
    #[error("ready-unit consumer is closed")]
    ConsumerClosed,
    /// A finalized run came out of the partitioner with no events.
    #[error("finalized group {ordinal} for channel {channel_id} is empty")]
    EmptyGroup { channel_id: String, ordinal: usize },
}
