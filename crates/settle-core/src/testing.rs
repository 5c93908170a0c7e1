//! Shared fixtures for engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::event::{ChatEvent, RawEvent};
use crate::ready::{Ready, ReadyReceiver};
use crate::threads::{ReplyCounter, ThreadKey};

/// Sleeps on the (paused) tokio clock, then yields so woken timer tasks run.
pub(crate) async fn settle_for(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn message(channel: &str, ts: f64) -> ChatEvent {
    raw_event(channel, ts, None)
}

pub(crate) fn reply(channel: &str, thread_ts: &str, ts: f64) -> ChatEvent {
    raw_event(channel, ts, Some(thread_ts))
}

fn raw_event(channel: &str, ts: f64, thread_ts: Option<&str>) -> ChatEvent {
    let raw = RawEvent {
        channel: Some(channel.to_string()),
        ts: Some(format!("{ts:.6}")),
        thread_ts: thread_ts.map(str::to_string),
        user: Some("U1".to_string()),
        text: Some(format!("message at {ts}")),
        bot: false,
    };
    ChatEvent::parse(raw, ts).unwrap()
}

/// Drains everything currently queued on a ready channel.
pub(crate) fn drain(rx: &mut ReadyReceiver) -> Vec<Ready> {
    let mut out = Vec::new();
    while let Ok(ready) = rx.try_recv() {
        out.push(ready);
    }
    out
}

/// Reply counter whose answer is set by the test.
#[derive(Debug, Default)]
pub(crate) struct StubCounter {
    replies: AtomicUsize,
    calls: AtomicUsize,
    fail: AtomicBool,
    fetch_delay_ms: AtomicU64,
}

impl StubCounter {
    pub(crate) fn with_replies(replies: usize) -> Arc<Self> {
        let counter = Self::default();
        counter.replies.store(replies, Ordering::SeqCst);
        Arc::new(counter)
    }

    pub(crate) fn set_replies(&self, replies: usize) {
        self.replies.store(replies, Ordering::SeqCst);
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes each count fetch take this long on the tokio clock.
    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyCounter for StubCounter {
    async fn reply_count(&self, _key: &ThreadKey) -> anyhow::Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("conversations.replies unavailable");
        }
        Ok(self.replies.load(Ordering::SeqCst))
    }
}
