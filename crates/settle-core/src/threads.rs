//! Per-thread stabilization scheduler.
//!
//! Each reply to a thread restarts that thread's timer. When the timer fires
//! the reply count is re-read from the source (the locally observed count can
//! miss edits, deletions and replies sent while we were offline) and the
//! thread is emitted once if it reaches the threshold.
//!
//! State per thread: Idle (no entry) -> Watching (timer armed) -> Checking
//! (count fetch in flight) -> Analyzed (recorded in the dedup set) or back to
//! Idle when the count is short.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{self, Clock, TimerHandle};
use crate::config::ThreadConfig;
use crate::dedup::DedupSet;
use crate::event::ChatEvent;
use crate::ready::{self, Ready, ReadySender, ThreadReady};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ThreadKey {
    pub channel_id: String,
    /// Timestamp of the thread's parent message.
    pub thread_ts: String,
}

impl ThreadKey {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.channel_id, self.thread_ts)
    }
}

/// Authoritative reply count for a thread, excluding the parent message.
#[async_trait]
pub trait ReplyCounter: Send + Sync {
    async fn reply_count(&self, key: &ThreadKey) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveRejection {
    Bot,
    NotThreaded,
    AlreadyAnalyzed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// The thread's timer was (re)started.
    ///
    /// `immediate` is set when the wait is zero and the locally observed count
    /// already meets the threshold, so the check runs on the next turn.
    Armed {
        observed_replies: usize,
        immediate: bool,
    },
    Rejected(ObserveRejection),
}

#[derive(Debug)]
struct ThreadWatch {
    last_activity_at: f64,
    observed_replies: usize,
    timer: Option<TimerHandle>,
}

impl ThreadWatch {
    fn owns_timer(&self, timer_id: u64) -> bool {
        self.timer.as_ref().map(TimerHandle::id) == Some(timer_id)
    }
}

#[derive(Debug, Default)]
struct ThreadState {
    watches: HashMap<ThreadKey, ThreadWatch>,
    analyzed: DedupSet<ThreadKey>,
}

struct Inner {
    config: ThreadConfig,
    clock: Arc<dyn Clock>,
    counter: Arc<dyn ReplyCounter>,
    ready_tx: ReadySender,
    state: Mutex<ThreadState>,
}

/// Debounces thread replies and emits threads that have gone quiet.
#[derive(Clone)]
pub struct ThreadScheduler {
    inner: Arc<Inner>,
}

impl ThreadScheduler {
    pub fn new(
        config: ThreadConfig,
        clock: Arc<dyn Clock>,
        counter: Arc<dyn ReplyCounter>,
        ready_tx: ReadySender,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                counter,
                ready_tx,
                state: Mutex::new(ThreadState::default()),
            }),
        }
    }

    /// Records activity on a thread and restarts its stabilization timer.
    pub fn observe(&self, event: &ChatEvent) -> ObserveOutcome {
        if event.bot {
            return ObserveOutcome::Rejected(ObserveRejection::Bot);
        }
        let Some(thread_ts) = event.thread_key.as_deref() else {
            return ObserveOutcome::Rejected(ObserveRejection::NotThreaded);
        };
        let key = ThreadKey::new(event.channel_id.as_str(), thread_ts);

        let mut state = self.lock();
        if state.analyzed.contains(&key) {
            debug!(thread = %key, "thread already analyzed, ignoring reply");
            return ObserveOutcome::Rejected(ObserveRejection::AlreadyAnalyzed);
        }

        let now = self.inner.clock.now();
        let watch = state.watches.entry(key.clone()).or_insert_with(|| ThreadWatch {
            last_activity_at: now,
            observed_replies: 0,
            timer: None,
        });
        if let Some(timer) = watch.timer.take() {
            timer.cancel();
        }
        watch.last_activity_at = now;
        // The parent message itself is not a reply.
        if event.ts != thread_ts {
            watch.observed_replies += 1;
        }
        let observed_replies = watch.observed_replies;

        let delay = self.inner.config.analysis_delay();
        watch.timer = Some(self.arm_check(&key));
        let immediate = delay.is_zero() && observed_replies >= self.inner.config.min_replies;

        info!(
            thread = %key,
            observed_replies,
            wait_minutes = self.inner.config.wait_minutes,
            "thread activity, stabilization timer reset"
        );
        ObserveOutcome::Armed {
            observed_replies,
            immediate,
        }
    }

    pub fn watching(&self) -> usize {
        self.lock().watches.len()
    }

    pub fn analyzed(&self) -> usize {
        self.lock().analyzed.len()
    }

    pub fn is_analyzed(&self, key: &ThreadKey) -> bool {
        self.lock().analyzed.contains(key)
    }

    /// Marks a thread analyzed outside the timer path (an on-demand request)
    /// and drops any pending watch. Returns `false` if it was already marked.
    pub fn mark_analyzed(&self, key: &ThreadKey) -> bool {
        let mut state = self.lock();
        if let Some(watch) = state.watches.remove(key)
            && let Some(timer) = watch.timer
        {
            timer.cancel();
        }
        state.analyzed.check_and_record(key.clone())
    }

    fn arm_check(&self, key: &ThreadKey) -> TimerHandle {
        let scheduler = self.clone();
        let key = key.clone();
        clock::arm(self.inner.config.analysis_delay(), move |timer_id| async move {
            scheduler.on_timer(key, timer_id).await;
        })
    }

    async fn on_timer(&self, key: ThreadKey, timer_id: u64) {
        {
            let mut state = self.lock();
            let Some(watch) = state.watches.get_mut(&key) else {
                return;
            };
            if !watch.owns_timer(timer_id) {
                debug!(thread = %key, timer_id, "superseded thread timer fired, ignoring");
                return;
            }
            watch.timer = None;
            let quiet_secs = self.inner.clock.now() - watch.last_activity_at;
            if state.analyzed.contains(&key) {
                state.watches.remove(&key);
                return;
            }
            debug!(thread = %key, quiet_secs, "thread quiet, checking reply count");
        }

        let fetched = self.inner.counter.reply_count(&key).await;

        let mut state = self.lock();
        let Some(watch) = state.watches.get(&key) else {
            return;
        };
        // A reply arrived while the count was in flight; that timer owns the next check.
        if watch.timer.is_some() {
            debug!(thread = %key, "thread resumed during count check");
            return;
        }
        state.watches.remove(&key);

        let reply_count = match fetched {
            Ok(count) => count,
            Err(err) => {
                warn!(thread = %key, error = %err, "failed to read reply count, thread returned to idle");
                return;
            }
        };
        if reply_count < self.inner.config.min_replies {
            info!(
                thread = %key,
                reply_count,
                min_replies = self.inner.config.min_replies,
                "thread below reply threshold"
            );
            return;
        }
        if !state.analyzed.check_and_record(key.clone()) {
            return;
        }

        info!(thread = %key, reply_count, "thread ready");
        if let Err(err) = ready::emit(&self.inner.ready_tx, Ready::Thread(ThreadReady { key, reply_count })) {
            warn!(error = %err, "dropping ready thread");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
