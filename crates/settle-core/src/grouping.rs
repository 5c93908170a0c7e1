//! Per-channel buffering and gap-based group partitioning.
//!
//! Every accepted message resets the channel's flush timer. When the timer
//! fires (or a flush is forced) the buffer is sorted by source timestamp and
//! split wherever two consecutive messages are at least `time_gap_secs`
//! apart. Runs bounded on both sides are final; the trailing run is only
//! final once "now" is also `time_gap_secs` past its last message, otherwise
//! it stays buffered as the open tail.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{self, Clock, TimerHandle};
use crate::config::GroupingConfig;
use crate::dedup::DedupSet;
use crate::error::EngineError;
use crate::event::ChatEvent;
use crate::ready::{self, GroupReady, Ready, ReadySender};
use crate::status::ChannelStatus;

/// Identity of a finalized group: `(channel, ordinal in flush, first ts)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupId {
    pub channel_id: String,
    pub ordinal: usize,
    pub first_ts: String,
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.channel_id, self.ordinal, self.first_ts)
    }
}

/// Result of splitting a channel buffer.
#[derive(Debug, Default)]
pub struct Partition {
    /// Runs whose end boundary has been observed, in timestamp order.
    pub finalized: Vec<Vec<ChatEvent>>,
    /// Trailing run still within the gap of "now".
    pub open_tail: Vec<ChatEvent>,
}

/// Sorts `events` by timestamp and splits them into runs.
///
/// A new run starts whenever the gap to the previous event is `>= time_gap`.
/// The last run is finalized only when `now - last.timestamp >= time_gap`.
pub fn partition(mut events: Vec<ChatEvent>, time_gap: f64, now: f64) -> Partition {
    if events.is_empty() {
        return Partition::default();
    }

    events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut finalized = Vec::new();
    let mut current: Vec<ChatEvent> = Vec::new();
    for event in events {
        if let Some(previous) = current.last()
            && event.timestamp - previous.timestamp >= time_gap
        {
            finalized.push(std::mem::take(&mut current));
        }
        current.push(event);
    }

    let tail_end = current.last().map_or(now, |event| event.timestamp);
    if now - tail_end >= time_gap {
        finalized.push(current);
        Partition {
            finalized,
            open_tail: Vec::new(),
        }
    } else {
        Partition {
            finalized,
            open_tail: current,
        }
    }
}

/// Outcome of one partition-and-flush pass over a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Groups handed to the consumer.
    pub emitted: usize,
    /// Finalized groups skipped because their identity was already emitted.
    pub duplicates: usize,
    /// Finalized groups dropped for being below the minimum size.
    pub undersized: usize,
    /// Messages left in the buffer as the open tail.
    pub held_back: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Bot,
    Threaded,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Buffered { queued: usize },
    Rejected(RejectReason),
}

#[derive(Debug, Default)]
struct ChannelQueue {
    events: Vec<ChatEvent>,
    timer: Option<TimerHandle>,
}

impl ChannelQueue {
    /// Cancels and clears the pending flush timer. Returns whether one existed.
    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    fn owns_timer(&self, timer_id: u64) -> bool {
        self.timer.as_ref().map(TimerHandle::id) == Some(timer_id)
    }
}

#[derive(Debug, Default)]
struct GroupingState {
    queues: HashMap<String, ChannelQueue>,
    processed: DedupSet<GroupId>,
}

struct Inner {
    config: GroupingConfig,
    clock: Arc<dyn Clock>,
    ready_tx: ReadySender,
    state: Mutex<GroupingState>,
}

/// Buffers top-level channel messages and emits finalized groups.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct GroupingEngine {
    inner: Arc<Inner>,
}

impl GroupingEngine {
    pub fn new(config: GroupingConfig, clock: Arc<dyn Clock>, ready_tx: ReadySender) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                ready_tx,
                state: Mutex::new(GroupingState::default()),
            }),
        }
    }

    /// Buffers a non-threaded, human-authored message and re-arms the
    /// channel's flush timer.
    pub fn ingest(&self, event: ChatEvent) -> IngestOutcome {
        if event.bot {
            debug!(channel = %event.channel_id, ts = %event.ts, "ignoring bot message");
            return IngestOutcome::Rejected(RejectReason::Bot);
        }
        if event.is_threaded() {
            debug!(channel = %event.channel_id, ts = %event.ts, "thread reply is not grouped");
            return IngestOutcome::Rejected(RejectReason::Threaded);
        }
        if self.is_stale(&event) {
            info!(
                channel = %event.channel_id,
                ts = %event.ts,
                age_secs = event.age_at_arrival(),
                "dropping stale message"
            );
            return IngestOutcome::Rejected(RejectReason::Stale);
        }

        let channel_id = event.channel_id.clone();
        let mut state = self.lock();
        let queue = state.queues.entry(channel_id.clone()).or_default();
        queue.events.push(event);
        let queued = queue.events.len();

        queue.cancel_timer();
        if self.inner.config.auto_flush {
            queue.timer = Some(self.arm_flush(&channel_id));
        }

        info!(
            channel = %channel_id,
            queued,
            wait_minutes = self.inner.config.wait_minutes,
            "buffered message, flush timer reset"
        );
        IngestOutcome::Buffered { queued }
    }

    /// Cancels any pending timer and runs partition-and-flush immediately.
    ///
    /// # Errors
    /// Returns [`EngineError`] if a group cannot be delivered to the consumer
    /// or the partitioner produced an empty run.
    pub fn force_flush(&self, channel_id: &str) -> Result<FlushReport, EngineError> {
        let mut state = self.lock();
        if let Some(queue) = state.queues.get_mut(channel_id)
            && queue.cancel_timer()
        {
            debug!(channel = %channel_id, "cancelled pending flush timer for forced flush");
        }
        info!(channel = %channel_id, "forced flush");
        self.flush_locked(&mut state, channel_id)
    }

    pub fn channel_statuses(&self) -> BTreeMap<String, ChannelStatus> {
        let state = self.lock();
        state
            .queues
            .iter()
            .map(|(channel_id, queue)| {
                (
                    channel_id.clone(),
                    ChannelStatus {
                        buffered: queue.events.len(),
                        timer_armed: queue.timer.is_some(),
                    },
                )
            })
            .collect()
    }

    pub fn groups_processed(&self) -> usize {
        self.lock().processed.len()
    }

    fn is_stale(&self, event: &ChatEvent) -> bool {
        let max_age = self.inner.config.max_event_age_secs;
        max_age > 0 && event.age_at_arrival() > max_age as f64
    }

    fn arm_flush(&self, channel_id: &str) -> TimerHandle {
        let engine = self.clone();
        let channel_id = channel_id.to_string();
        clock::arm(self.inner.config.flush_delay(), move |timer_id| async move {
            engine.on_flush_timer(&channel_id, timer_id);
        })
    }

    fn on_flush_timer(&self, channel_id: &str, timer_id: u64) {
        let mut state = self.lock();
        let Some(queue) = state.queues.get_mut(channel_id) else {
            return;
        };
        if !queue.owns_timer(timer_id) {
            debug!(channel = %channel_id, timer_id, "superseded flush timer fired, ignoring");
            return;
        }
        queue.timer = None;

        match self.flush_locked(&mut state, channel_id) {
            Ok(report) => info!(
                channel = %channel_id,
                emitted = report.emitted,
                duplicates = report.duplicates,
                undersized = report.undersized,
                held_back = report.held_back,
                "flush timer completed"
            ),
            Err(err) => error!(channel = %channel_id, error = %err, "flush timer failed"),
        }
    }

    fn flush_locked(
        &self,
        state: &mut GroupingState,
        channel_id: &str,
    ) -> Result<FlushReport, EngineError> {
        let config = &self.inner.config;
        let now = self.inner.clock.now();

        let finalized = {
            let Some(queue) = state.queues.get_mut(channel_id) else {
                return Ok(FlushReport::default());
            };
            if queue.events.is_empty() {
                return Ok(FlushReport::default());
            }
            let events = std::mem::take(&mut queue.events);
            let Partition {
                finalized,
                open_tail,
            } = partition(events, config.time_gap(), now);
            if let Some(last) = open_tail.last() {
                info!(
                    channel = %channel_id,
                    held_back = open_tail.len(),
                    quiet_secs = now - last.timestamp,
                    "latest group is still open, holding it back"
                );
            }
            queue.events = open_tail;
            finalized
        };

        let mut report = FlushReport {
            held_back: state.queues.get(channel_id).map_or(0, |q| q.events.len()),
            ..FlushReport::default()
        };

        let total_groups = finalized.len();
        for (index, events) in finalized.into_iter().enumerate() {
            let ordinal = index + 1;
            if events.len() < config.min_group_size {
                debug!(channel = %channel_id, ordinal, size = events.len(), "group below minimum size, dropped");
                report.undersized += 1;
                continue;
            }
            let Some(first) = events.first() else {
                return Err(EngineError::EmptyGroup {
                    channel_id: channel_id.to_string(),
                    ordinal,
                });
            };

            let id = GroupId {
                channel_id: channel_id.to_string(),
                ordinal,
                first_ts: first.ts.clone(),
            };
            if !state.processed.check_and_record(id.clone()) {
                debug!(group = %id, "group already processed, skipping");
                report.duplicates += 1;
                continue;
            }

            info!(group = %id, size = events.len(), total_groups, "group ready");
            if let Err(err) = ready::emit(
                &self.inner.ready_tx,
                Ready::Group(GroupReady {
                    id,
                    total_groups,
                    events,
                }),
            ) {
                warn!(channel = %channel_id, "ready consumer closed during flush");
                return Err(err);
            }
            report.emitted += 1;
        }

        Ok(report)
    }

    fn lock(&self) -> MutexGuard<'_, GroupingState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::TokioClock;
    use crate::ready::{ReadyReceiver, ready_channel};
    use crate::testing::{drain, message, reply, settle_for};

    fn timestamps(events: &[ChatEvent]) -> Vec<f64> {
        events.iter().map(|event| event.timestamp).collect()
    }

    fn channel_events(stamps: &[f64]) -> Vec<ChatEvent> {
        stamps.iter().map(|ts| message("C1", *ts)).collect()
    }

    fn group_config(wait_minutes: u64) -> GroupingConfig {
        GroupingConfig {
            time_gap_secs: 300,
            wait_minutes,
            ..GroupingConfig::default()
        }
    }

    fn manual_config() -> GroupingConfig {
        GroupingConfig {
            auto_flush: false,
            ..group_config(5)
        }
    }

    fn engine_at(start: f64, config: GroupingConfig) -> (GroupingEngine, ReadyReceiver) {
        let (tx, rx) = ready_channel();
        let clock = Arc::new(TokioClock::starting_at(start));
        (GroupingEngine::new(config, clock, tx), rx)
    }

    fn groups(readies: Vec<Ready>) -> Vec<GroupReady> {
        readies
            .into_iter()
            .map(|ready| match ready {
                Ready::Group(group) => group,
                Ready::Thread(thread) => panic!("unexpected thread unit {thread:?}"),
            })
            .collect()
    }

    #[test]
    fn quiet_tail_is_finalized() {
        let result = partition(channel_events(&[0.0, 60.0, 120.0, 500.0, 560.0]), 300.0, 900.0);

        assert_eq!(result.finalized.len(), 2);
        assert_eq!(timestamps(&result.finalized[0]), vec![0.0, 60.0, 120.0]);
        assert_eq!(timestamps(&result.finalized[1]), vec![500.0, 560.0]);
        assert!(result.open_tail.is_empty());
    }

    #[test]
    fn recent_tail_is_held_back() {
        let result = partition(channel_events(&[0.0, 60.0, 120.0, 500.0, 560.0]), 300.0, 700.0);

        assert_eq!(result.finalized.len(), 1);
        assert_eq!(timestamps(&result.finalized[0]), vec![0.0, 60.0, 120.0]);
        assert_eq!(timestamps(&result.open_tail), vec![500.0, 560.0]);
    }

    #[test]
    fn out_of_order_arrival_is_sorted_before_splitting() {
        let result = partition(channel_events(&[560.0, 0.0, 500.0, 120.0, 60.0]), 300.0, 900.0);

        assert_eq!(timestamps(&result.finalized[0]), vec![0.0, 60.0, 120.0]);
        assert_eq!(timestamps(&result.finalized[1]), vec![500.0, 560.0]);
    }

    #[test]
    fn gap_equal_to_threshold_splits() {
        let result = partition(channel_events(&[0.0, 300.0]), 300.0, 10_000.0);
        assert_eq!(result.finalized.len(), 2);

        let result = partition(channel_events(&[0.0, 299.0]), 300.0, 10_000.0);
        assert_eq!(result.finalized.len(), 1);
    }

    #[test]
    fn partition_boundaries_respect_gap() {
        let stamps = [3.0, 7.0, 400.0, 410.0, 1_000.0, 1_299.0, 1_600.0, 1_601.0, 2_500.0];
        let result = partition(channel_events(&stamps), 300.0, 2_600.0);

        let mut runs = result.finalized.clone();
        if !result.open_tail.is_empty() {
            runs.push(result.open_tail.clone());
        }
        for run in &runs {
            for pair in run.windows(2) {
                assert!(pair[1].timestamp - pair[0].timestamp < 300.0);
            }
        }
        for pair in runs.windows(2) {
            let gap = pair[1][0].timestamp - pair[0].last().unwrap().timestamp;
            assert!(gap >= 300.0);
        }
        assert_eq!(timestamps(&result.open_tail), vec![2_500.0]);
    }

    #[test]
    fn empty_buffer_partitions_to_nothing() {
        let result = partition(Vec::new(), 300.0, 0.0);
        assert!(result.finalized.is_empty());
        assert!(result.open_tail.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_wait_arms_without_overflow() {
        let (engine, mut rx) = engine_at(0.0, group_config(u64::MAX / 60));
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 10.0));

        settle_for(Duration::from_secs(86_400)).await;
        assert!(drain(&mut rx).is_empty());
        let status = &engine.channel_statuses()["C1"];
        assert_eq!(status.buffered, 2);
        assert!(status.timer_armed);

        let report = engine.force_flush("C1").unwrap();
        assert_eq!(report.emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_emits_both_groups_when_tail_is_quiet() {
        let (engine, mut rx) = engine_at(0.0, manual_config());
        for ts in [0.0, 60.0, 120.0, 500.0, 560.0] {
            engine.ingest(message("C1", ts));
        }
        tokio::time::advance(Duration::from_secs(900)).await;

        let report = engine.force_flush("C1").unwrap();
        assert_eq!(report.emitted, 2);
        assert_eq!(report.held_back, 0);

        let emitted = groups(drain(&mut rx));
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].events.len(), 3);
        assert_eq!(emitted[1].events.len(), 2);
        assert_eq!(emitted[0].ordinal(), 1);
        assert_eq!(emitted[1].ordinal(), 2);
        assert_eq!(emitted[1].total_groups, 2);
        assert_eq!(emitted[0].id.first_ts, "0.000000");
        assert_eq!(engine.channel_statuses()["C1"].buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_holds_back_recent_tail() {
        let (engine, mut rx) = engine_at(0.0, manual_config());
        for ts in [0.0, 60.0, 120.0, 500.0, 560.0] {
            engine.ingest(message("C1", ts));
        }
        tokio::time::advance(Duration::from_secs(700)).await;

        let report = engine.force_flush("C1").unwrap();
        assert_eq!(report.emitted, 1);
        assert_eq!(report.held_back, 2);

        let emitted = groups(drain(&mut rx));
        assert_eq!(emitted.len(), 1);
        assert_eq!(timestamps(&emitted[0].events), vec![0.0, 60.0, 120.0]);

        let status = &engine.channel_statuses()["C1"];
        assert_eq!(status.buffered, 2);
        assert!(!status.timer_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn single_message_groups_are_never_emitted() {
        let (engine, mut rx) = engine_at(0.0, manual_config());
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 400.0));
        engine.ingest(message("C1", 410.0));
        tokio::time::advance(Duration::from_secs(2_000)).await;

        let report = engine.force_flush("C1").unwrap();
        assert_eq!(report.undersized, 1);
        assert_eq!(report.emitted, 1);

        let emitted = groups(drain(&mut rx));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].ordinal(), 2);
        assert_eq!(emitted[0].total_groups, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_flushes_do_not_emit_a_group_twice() {
        let (engine, mut rx) = engine_at(0.0, manual_config());
        for ts in [0.0, 30.0] {
            engine.ingest(message("C1", ts));
        }
        tokio::time::advance(Duration::from_secs(1_000)).await;
        assert_eq!(engine.force_flush("C1").unwrap().emitted, 1);
        assert_eq!(engine.force_flush("C1").unwrap(), FlushReport::default());

        // Redelivery of the same messages yields the same identity.
        for ts in [0.0, 30.0] {
            engine.ingest(message("C1", ts));
        }
        let report = engine.force_flush("C1").unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.emitted, 0);

        assert_eq!(groups(drain(&mut rx)).len(), 1);
        assert_eq!(engine.groups_processed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_message_resets_the_flush_timer() {
        let (engine, mut rx) = engine_at(0.0, group_config(5));
        engine.ingest(message("C1", 0.0));

        settle_for(Duration::from_secs(240)).await;
        engine.ingest(message("C1", 240.0));

        // 5 minutes after the first message, but only 1 after the second.
        settle_for(Duration::from_secs(120)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(engine.channel_statuses()["C1"].timer_armed);

        // Re-armed timer fires at 540, exactly one gap after the last message.
        settle_for(Duration::from_secs(181)).await;
        let emitted = groups(drain(&mut rx));
        assert_eq!(emitted.len(), 1);
        assert_eq!(timestamps(&emitted[0].events), vec![0.0, 240.0]);
        let status = &engine.channel_statuses()["C1"];
        assert_eq!(status.buffered, 0);
        assert!(!status.timer_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flush_emits_once_the_channel_is_quiet() {
        let (engine, mut rx) = engine_at(0.0, group_config(10));
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 20.0));

        settle_for(Duration::from_secs(599)).await;
        assert!(drain(&mut rx).is_empty());

        settle_for(Duration::from_secs(2)).await;
        let emitted = groups(drain(&mut rx));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].events.len(), 2);
        assert!(!engine.channel_statuses()["C1"].timer_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_cancels_pending_timer() {
        let (engine, mut rx) = engine_at(0.0, group_config(10));
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 10.0));
        settle_for(Duration::from_secs(400)).await;

        assert_eq!(engine.force_flush("C1").unwrap().emitted, 1);
        assert!(!engine.channel_statuses()["C1"].timer_armed);

        settle_for(Duration::from_secs(1_200)).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_bot_threaded_and_stale_messages() {
        let config = GroupingConfig {
            max_event_age_secs: 60,
            ..group_config(5)
        };
        let (engine, _rx) = engine_at(10_000.0, config);

        let mut bot = message("C1", 10_000.0);
        bot.bot = true;
        assert_eq!(engine.ingest(bot), IngestOutcome::Rejected(RejectReason::Bot));
        assert_eq!(
            engine.ingest(reply("C1", "9990.0", 10_000.0)),
            IngestOutcome::Rejected(RejectReason::Threaded)
        );

        let mut stale = message("C1", 100.0);
        stale.received_at = 10_000.0;
        assert_eq!(engine.ingest(stale), IngestOutcome::Rejected(RejectReason::Stale));

        assert_eq!(
            engine.ingest(message("C1", 10_000.0)),
            IngestOutcome::Buffered { queued: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_flush_disabled_only_flushes_on_demand() {
        let config = GroupingConfig {
            auto_flush: false,
            ..group_config(1)
        };
        let (engine, mut rx) = engine_at(0.0, config);
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 5.0));

        settle_for(Duration::from_secs(3_600)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(!engine.channel_statuses()["C1"].timer_armed);

        assert_eq!(engine.force_flush("C1").unwrap().emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_are_independent() {
        let (engine, mut rx) = engine_at(0.0, group_config(10));
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 10.0));
        engine.ingest(message("C2", 0.0));
        engine.ingest(message("C2", 10.0));

        assert_eq!(engine.force_flush("C3").unwrap(), FlushReport::default());

        settle_for(Duration::from_secs(700)).await;
        let mut channels: Vec<String> = drain(&mut rx)
            .iter()
            .map(|ready| ready.channel_id().to_string())
            .collect();
        channels.sort();
        assert_eq!(channels, vec!["C1", "C2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_consumer_surfaces_error() {
        let (engine, rx) = engine_at(0.0, manual_config());
        drop(rx);
        engine.ingest(message("C1", 0.0));
        engine.ingest(message("C1", 1.0));
        tokio::time::advance(Duration::from_secs(400)).await;

        assert_eq!(engine.force_flush("C1"), Err(EngineError::ConsumerClosed));
        // The group still counts as processed (at-most-once).
        assert_eq!(engine.groups_processed(), 1);
    }
}
