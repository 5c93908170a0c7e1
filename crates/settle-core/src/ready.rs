//! Units handed to the downstream consumer.
//!
//! Engines push onto an unbounded tokio channel; whoever holds the receiver
//! decides how to process them (see the bot crate's per-channel workers).

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::event::ChatEvent;
use crate::grouping::GroupId;
use crate::threads::ThreadKey;

/// A finalized, non-duplicate group of channel messages.
#[derive(Debug, Clone)]
pub struct GroupReady {
    pub id: GroupId,
    /// Number of finalized runs in the flush that produced this group,
    /// including runs dropped for being undersized.
    pub total_groups: usize,
    pub events: Vec<ChatEvent>,
}

impl GroupReady {
    pub fn channel_id(&self) -> &str {
        &self.id.channel_id
    }

    pub fn ordinal(&self) -> usize {
        self.id.ordinal
    }
}

/// A thread that stayed quiet for the configured wait with enough replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReady {
    pub key: ThreadKey,
    /// Reply count read at fire time.
    pub reply_count: usize,
}

#[derive(Debug, Clone)]
pub enum Ready {
    Group(GroupReady),
    Thread(ThreadReady),
}

impl Ready {
    pub fn channel_id(&self) -> &str {
        match self {
            Ready::Group(group) => group.channel_id(),
            Ready::Thread(thread) => &thread.key.channel_id,
        }
    }
}

pub type ReadySender = mpsc::UnboundedSender<Ready>;
pub type ReadyReceiver = mpsc::UnboundedReceiver<Ready>;

pub fn ready_channel() -> (ReadySender, ReadyReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit(tx: &ReadySender, ready: Ready) -> Result<(), EngineError> {
    tx.send(ready).map_err(|_unsent| EngineError::ConsumerClosed)
}
