use std::time::Duration;

use newscentral::ai::Enricher;
use newscentral::config::Config;
use newscentral::db::Repository;
use newscentral::error::Result;
use newscentral::pipeline::Pipeline;
use newscentral::scrape::SiteFetcher;
use newscentral::services::ImageRelocator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let once = args.iter().skip(1).any(|a| a == "--once");

    let config = Config::load()?;
    tracing::info!(path = %Config::config_path().display(), "Loaded configuration");

    let repository = Repository::new(&config.db_path).await?;
    let fetcher = SiteFetcher::from_kind(
        config.fetcher,
        Duration::from_secs(config.page_timeout_secs),
    )
    .await?;
    let relocator = ImageRelocator::new(config.images.clone())?;
    let enricher = match config.enrichment.api_key.clone() {
        Some(key) if !key.is_empty() => Some(Enricher::new(&config.enrichment, key)?),
        _ => {
            tracing::warn!("No enrichment API key configured, articles will be stored without summaries");
            None
        }
    };

    let pipeline = Pipeline::new(fetcher, repository, relocator, enricher);

    if once {
        pipeline.run_and_report(&config.sources).await;
    } else {
        let minutes = u64::from(config.refresh_interval_minutes.max(1));
        pipeline
            .run_until(&config.sources, Duration::from_secs(minutes * 60), shutdown_signal())
            .await;
        tracing::info!("Shutting down");
    }

    pipeline.into_fetcher().shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
