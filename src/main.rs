use std::sync::Arc;

use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xiaoqu_scraper::config::Config;
use xiaoqu_scraper::crawler::Engine;
use xiaoqu_scraper::pipeline;
use xiaoqu_scraper::storage::postgres::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(city = %cfg.city, "starting crawl");

    let storage = Storage::new(&cfg.database_url).await?;
    storage.ensure_schema().await?;

    let (intake, consumer) = pipeline::start(
        Arc::new(storage),
        cfg.queue_capacity,
        Duration::from_secs(cfg.flush_interval_secs),
    );

    let engine = Engine::new(&cfg);
    let summary = engine.run(&intake).await?;

    // Drain-and-stop: one close signal after the last record, then wait for
    // the consumer so nothing is written after storage teardown.
    intake.close().await?;
    consumer.await?;

    info!(
        pages = summary.pages,
        records = summary.records,
        "all pages processed"
    );
    Ok(())
}
