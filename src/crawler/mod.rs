use std::collections::VecDeque;

use scraper::Html;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pipeline::Intake;

pub mod fetcher;
pub mod models;
pub mod parser;
pub mod states;

use self::states::{Context, CrawlState, FollowUp, Site};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub pages: usize,
    pub records: usize,
}

/// Sequential crawl driver: pops follow-ups off a frontier, fetches the
/// page, dispatches the state's handler, sends records into the ingestion
/// pipeline and queues the handler's follow-ups. One failed page is logged
/// and skipped, never fatal.
pub struct Engine {
    site: Site,
    start_url: String,
    delay: Duration,
}

impl Engine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            site: Site {
                base_url: cfg.base_url(),
                district_blacklist: cfg.district_blacklist.clone(),
            },
            start_url: cfg.start_url(),
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }

    pub async fn run(&self, intake: &Intake) -> anyhow::Result<RunSummary> {
        let client = fetcher::build_client();
        let mut frontier = VecDeque::new();
        frontier.push_back(FollowUp {
            url: self.start_url.clone(),
            state: CrawlState::Home,
            context: Context::None,
        });

        let mut summary = RunSummary::default();
        while let Some(next) = frontier.pop_front() {
            debug!(url = %next.url, state = ?next.state, "fetching page");
            let body = match fetcher::fetch_html(&client, &next.url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %next.url, error = %e, "failed to fetch page");
                    continue;
                }
            };

            let output = {
                let html = Html::parse_document(&body);
                states::dispatch(next.state, &html, &next.context, &self.site)
            };
            summary.pages += 1;
            summary.records += output.records.len();

            for record in output.records {
                // Blocks when the intake queue is full; backpressure from a
                // slow consumer throttles the crawl instead of dropping.
                intake.send(record).await?;
            }
            frontier.extend(output.follow_ups);

            sleep(self.delay).await;
        }

        info!(
            pages = summary.pages,
            records = summary.records,
            "crawl finished"
        );
        Ok(summary)
    }
}
