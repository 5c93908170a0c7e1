use std::collections::HashMap;
use std::sync::Arc;

use settle_core::ready::{Ready, ReadyReceiver};
use settle_core::threads::ThreadKey;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use crate::bot::context::BotContext;
use crate::handlers::analysis::run_job;

/// Work for a channel's analysis worker.
#[derive(Debug, Clone)]
pub(crate) enum Job {
    Ready(Ready),
    /// `/analyze-thread`: runs regardless of debounce or earlier analyses.
    ManualThread(ThreadKey),
}

impl Job {
    fn channel_id(&self) -> &str {
        match self {
            Job::Ready(ready) => ready.channel_id(),
            Job::ManualThread(key) => &key.channel_id,
        }
    }
}

/// One sequential worker per channel; different channels run concurrently.
pub(crate) type ChannelQueueMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

pub(crate) fn new_channel_queues() -> ChannelQueueMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Moves ready units from the engines onto the channel queues until every
/// sender is dropped.
pub(crate) async fn forward_ready(
    mut ready_rx: ReadyReceiver,
    queues: ChannelQueueMap,
    context: Arc<BotContext>,
) {
    while let Some(ready) = ready_rx.recv().await {
        enqueue_job(&queues, &context, Job::Ready(ready)).await;
    }
    debug!("ready channel closed; dispatcher stopping");
}

pub(crate) async fn enqueue_job(queues: &ChannelQueueMap, context: &Arc<BotContext>, job: Job) {
    let key = job.channel_id().to_string();
    let sender = {
        let mut queues = queues.lock().await;
        if let Some(sender) = queues.get(&key) {
            sender.clone()
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            spawn_queue_worker(key.clone(), receiver, Arc::clone(context));
            queues.insert(key.clone(), sender.clone());
            sender
        }
    };

    if let Err(err) = sender.send(job) {
        let job = err.0;
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_queue_worker(key.clone(), receiver, Arc::clone(context));
        queues.lock().await.insert(key.clone(), sender.clone());
        if sender.send(job).is_err() {
            error!(channel = %key, "analysis worker closed immediately; job lost");
        }
    }
}

fn spawn_queue_worker(
    channel: String,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    context: Arc<BotContext>,
) {
    info!(channel = %channel, "starting analysis worker");
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            if let Err(err) = run_job(context.as_ref(), job).await {
                error!(channel = %channel, error = %format!("{err:#}"), "analysis job failed");
            }
        }
    });
}
