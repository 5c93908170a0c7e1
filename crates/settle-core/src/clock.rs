//! Time source and cancellable one-shot timers.
//!
//! Engines read "now" through [`Clock`] so that partition decisions compare
//! against the same scale as event timestamps (Unix seconds). Timers run on
//! the tokio timer wheel and are cancelled through an explicit
//! [`CancellationToken`] held in the returned [`TimerHandle`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Wall time anchored to the tokio clock.
///
/// Advancing tokio time (for example `tokio::time::advance` on a paused
/// runtime) advances this clock by the same amount, which keeps timer
/// deadlines and partition "now" in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: f64,
    instant_anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now())
    }

    pub fn starting_at(wall_secs: f64) -> Self {
        Self {
            wall_anchor: wall_secs,
            instant_anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> f64 {
        self.wall_anchor + self.instant_anchor.elapsed().as_secs_f64()
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an armed one-shot timer.
///
/// The id is unique for the process lifetime; fire callbacks receive it so the
/// owner can tell whether the firing timer is still the one it armed.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stops the timer if it has not fired yet. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Arms a timer that runs `task` after `delay` unless cancelled first.
///
/// Must be called from within a tokio runtime. A zero delay fires on the next
/// scheduler turn; a delay past the timer's range never fires.
pub fn arm<F, Fut>(delay: Duration, task: F) -> TimerHandle
where
    F: FnOnce(u64) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    // Created here so the deadline counts from arming; `sleep` clamps overflow.
    let sleep = tokio::time::sleep(delay);

    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => {}
            () = sleep => task(id).await,
        }
    });

    TimerHandle { id, cancel }
}
