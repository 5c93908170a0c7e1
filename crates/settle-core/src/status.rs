//! Point-in-time snapshot of both engines.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Messages currently buffered for the channel.
    pub buffered: usize,
    pub timer_armed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub channels: BTreeMap<String, ChannelStatus>,
    pub groups_processed: usize,
    pub threads_watching: usize,
    pub threads_analyzed: usize,
}

impl EngineStatus {
    pub fn buffered_total(&self) -> usize {
        self.channels.values().map(|status| status.buffered).sum()
    }

    pub fn armed_timers(&self) -> usize {
        self.channels
            .values()
            .filter(|status| status.timer_armed)
            .count()
    }
}
