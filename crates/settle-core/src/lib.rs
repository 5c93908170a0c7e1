//! Core settle library (grouping engine, thread scheduler, config).
//!
//! Two independent debouncers sit behind [`router::Router`]: the
//! [`grouping::GroupingEngine`] buffers top-level channel messages and splits
//! them into gap-bounded groups, and the [`threads::ThreadScheduler`] waits for
//! a discussion thread to go quiet before declaring it ready. Both emit
//! [`ready::Ready`] units onto a channel owned by the caller.

pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod grouping;
pub mod ready;
pub mod router;
pub mod status;
pub mod threads;

#[cfg(test)]
pub(crate) mod testing;
