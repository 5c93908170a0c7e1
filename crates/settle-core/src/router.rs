//! Entry point for raw events.
//!
//! Thread replies (and thread parents) go only to the thread scheduler;
//! everything else that survives validation goes to the grouping engine.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{EngineError, EventError};
use crate::event::{ChatEvent, RawEvent};
use crate::grouping::{FlushReport, GroupingEngine, IngestOutcome};
use crate::ready::ReadySender;
use crate::status::EngineStatus;
use crate::threads::{ObserveOutcome, ReplyCounter, ThreadScheduler};

#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Grouping(IngestOutcome),
    Thread(ObserveOutcome),
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(EventError),
    Bot,
}

#[derive(Clone)]
pub struct Router {
    grouping: GroupingEngine,
    threads: ThreadScheduler,
    clock: Arc<dyn Clock>,
}

impl Router {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        counter: Arc<dyn ReplyCounter>,
        ready_tx: ReadySender,
    ) -> Self {
        let grouping =
            GroupingEngine::new(config.grouping.clone(), Arc::clone(&clock), ready_tx.clone());
        let threads =
            ThreadScheduler::new(config.threads.clone(), Arc::clone(&clock), counter, ready_tx);
        Self {
            grouping,
            threads,
            clock,
        }
    }

    pub fn ingest(&self, raw: RawEvent) -> Routed {
        let event = match ChatEvent::parse(raw, self.clock.now()) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed event");
                return Routed::Dropped(DropReason::Malformed(err));
            }
        };
        if event.bot {
            debug!(channel = %event.channel_id, ts = %event.ts, "dropping bot event");
            return Routed::Dropped(DropReason::Bot);
        }

        if event.is_threaded() {
            Routed::Thread(self.threads.observe(&event))
        } else {
            Routed::Grouping(self.grouping.ingest(event))
        }
    }

    /// See [`GroupingEngine::force_flush`].
    pub fn force_flush(&self, channel_id: &str) -> Result<FlushReport, EngineError> {
        self.grouping.force_flush(channel_id)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            channels: self.grouping.channel_statuses(),
            groups_processed: self.grouping.groups_processed(),
            threads_watching: self.threads.watching(),
            threads_analyzed: self.threads.analyzed(),
        }
    }

    pub fn grouping(&self) -> &GroupingEngine {
        &self.grouping
    }

    pub fn threads(&self) -> &ThreadScheduler {
        &self.threads
    }
}
