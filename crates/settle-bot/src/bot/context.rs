use std::sync::Arc;

use settle_core::config::Config;
use settle_core::router::Router;

use crate::notion::NotionClient;
use crate::slack::SlackClient;
use crate::summarize::Summarizer;

pub(crate) struct BotContext {
    slack: SlackClient,
    summarizer: Arc<dyn Summarizer>,
    notion: Option<NotionClient>,
    router: Router,
    config: Config,
}

impl BotContext {
    pub(crate) fn new(
        slack: SlackClient,
        summarizer: Arc<dyn Summarizer>,
        notion: Option<NotionClient>,
        router: Router,
        config: Config,
    ) -> Self {
        Self {
            slack,
            summarizer,
            notion,
            router,
            config,
        }
    }

    pub(crate) fn slack(&self) -> &SlackClient {
        &self.slack
    }

    pub(crate) fn summarizer(&self) -> &dyn Summarizer {
        self.summarizer.as_ref()
    }

    pub(crate) fn notion(&self) -> Option<&NotionClient> {
        self.notion.as_ref()
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}
