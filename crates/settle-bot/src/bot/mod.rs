pub(crate) mod context;
pub(crate) mod queue;

pub(crate) use context::BotContext;
pub(crate) use queue::{Job, enqueue_job, forward_ready, new_channel_queues};
