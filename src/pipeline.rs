use std::fmt;
use std::future::Future;
use std::ops::AddAssign;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::ai::Enricher;
use crate::db::Repository;
use crate::error::Result;
use crate::models::{Article, Enrichment, NewArticle, ScrapeResult, UpsertOutcome};
use crate::scrape::{extract_detail, extract_listing, PageSource, SourceId, SourceRules};
use crate::services::ImageRelocator;

/// Counts for one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub inserted: usize,
    pub backfilled: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RunStats {
    fn record(&mut self, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Backfilled { .. } => self.backfilled += 1,
            UpsertOutcome::Unchanged(_) => self.unchanged += 1,
        }
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.backfilled += other.backfilled;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} backfilled, {} unchanged, {} failed",
            self.inserted, self.backfilled, self.unchanged, self.failed
        )
    }
}

/// Fetch → extract → relocate → enrich → upsert, for every configured source.
pub struct Pipeline<P> {
    fetcher: P,
    repository: Repository,
    relocator: ImageRelocator,
    enricher: Option<Enricher>,
}

impl<P: PageSource> Pipeline<P> {
    pub fn new(
        fetcher: P,
        repository: Repository,
        relocator: ImageRelocator,
        enricher: Option<Enricher>,
    ) -> Self {
        Self {
            fetcher,
            repository,
            relocator,
            enricher,
        }
    }

    pub fn into_fetcher(self) -> P {
        self.fetcher
    }

    /// Run every source concurrently. A failing source never stops the others.
    pub async fn run(&self, sources: &[SourceId]) -> RunStats {
        let results = join_all(sources.iter().map(|&id| self.run_source(id))).await;

        let mut total = RunStats::default();
        for (id, result) in sources.iter().zip(results) {
            match result {
                Ok(stats) => total += stats,
                Err(e) => error!(source = %id, error = %e, "Failed to scrape source"),
            }
        }
        total
    }

    /// Run, then log the stats together with the stored article total.
    pub async fn run_and_report(&self, sources: &[SourceId]) -> RunStats {
        info!(sources = sources.len(), "Starting scrape run");
        let stats = self.run(sources).await;
        match self.repository.count_articles().await {
            Ok(total) => info!(%stats, total, "Scrape run finished"),
            Err(e) => error!(%stats, error = %e, "Scrape run finished, failed to count articles"),
        }
        stats
    }

    /// Run immediately and then every `every` until `shutdown` resolves.
    /// `shutdown` is watched during runs as well, and cancels the run in
    /// progress. Returns the number of completed runs.
    pub async fn run_until<F: Future>(&self, sources: &[SourceId], every: Duration, shutdown: F) -> usize {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(every);
        let mut completed = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => return completed,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Shutdown requested, abandoning scrape run");
                    return completed;
                }
                _ = self.run_and_report(sources) => completed += 1,
            }
        }
    }

    /// Scrape one source's listing and ingest each entry in listing order.
    /// Only a failed listing page is returned as an error.
    #[instrument(skip(self), fields(source = %id))]
    pub async fn run_source(&self, id: SourceId) -> Result<RunStats> {
        let rules = id.rules();
        let html = self.fetcher.load(rules.listing_url, rules.listing_ready).await?;
        let entries = extract_listing(&html, rules)?;
        info!(count = entries.len(), "Extracted listing entries");

        let mut stats = RunStats::default();
        for entry in entries {
            let url = entry.url.clone();
            match self.ingest(rules, entry).await {
                Ok(outcome) => {
                    debug!(%url, id = outcome.id(), ?outcome, "Stored article");
                    stats.record(&outcome);
                }
                Err(e) => {
                    warn!(%url, error = %e, "Skipping article");
                    stats.failed += 1;
                }
            }
        }

        info!(%stats, "Finished source");
        Ok(stats)
    }

    async fn ingest(&self, rules: &SourceRules, mut entry: ScrapeResult) -> Result<UpsertOutcome> {
        let html = self.fetcher.load(&entry.url, rules.detail_ready).await?;
        let detail = extract_detail(&html, rules)?;

        entry.content = detail.content.or_else(|| entry.excerpt.clone());
        if let Some(author) = detail.author {
            entry.author = author;
        }

        let existing = self
            .repository
            .find_article(&entry.title, &entry.source, &entry.url)
            .await?;

        // Stored articles keep their image; relocating again would orphan a copy.
        let image_url = match &existing {
            Some(article) => article.image_url.clone(),
            None => self.relocator.relocate(entry.image_url.as_deref()).await,
        };

        let enrichment = match &existing {
            Some(article) if is_fully_enriched(article) => {
                debug!(url = %entry.url, "Already enriched");
                Enrichment::default()
            }
            _ => self.enrich(&entry).await,
        };

        let article = NewArticle::from_scraped(entry, image_url, enrichment);
        self.repository.upsert_scraped(article).await
    }

    async fn enrich(&self, entry: &ScrapeResult) -> Enrichment {
        let Some(enricher) = &self.enricher else {
            return Enrichment::default();
        };
        match entry.content.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(content) => {
                let enrichment = enricher.enrich(&entry.title, content).await;
                if enrichment.is_empty() {
                    warn!(url = %entry.url, "Enrichment returned nothing");
                }
                enrichment
            }
            None => {
                debug!(url = %entry.url, "No content to enrich");
                Enrichment::default()
            }
        }
    }
}

fn is_fully_enriched(article: &Article) -> bool {
    article.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
        && !article.keywords.is_empty()
        && !article.vectors.is_empty()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{EnrichmentConfig, ImageStorage};
    use crate::error::AppError;

    /// Serves fixed HTML per url, checking the ready selector like the real
    /// fetchers do.
    struct StaticPages {
        pages: HashMap<String, String>,
        requested: std::sync::Mutex<Vec<String>>,
    }

    impl StaticPages {
        fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, html)| (url.to_string(), html.clone()))
                    .collect(),
                requested: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl PageSource for StaticPages {
        async fn load(&self, url: &str, ready_selector: &str) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_string());
            let missing = || AppError::SelectorMissing {
                url: url.to_string(),
                selector: ready_selector.to_string(),
            };
            let html = self.pages.get(url).ok_or_else(missing)?;
            let selector = scraper::Selector::parse(ready_selector).unwrap();
            if scraper::Html::parse_document(html).select(&selector).next().is_none() {
                return Err(missing());
            }
            Ok(html.clone())
        }
    }

    const LISTING_URL: &str = "https://frontpageafricaonline.com/";

    fn listing(image_url: &str) -> String {
        format!(
            r#"<html><body>
              <article class="l-post grid-post grid-base-post">
                <h2 class="post-title"><a href="https://x/1">Storm hits capital</a></h2>
                <a class="category">Weather</a>
                <span class="img" data-bgsrc="{image_url}"></span>
              </article>
              <article class="l-post grid-post grid-base-post">
                <div class="excerpt"><p>Untitled teaser</p></div>
                <h2 class="post-title"><a href="https://x/2"></a></h2>
              </article>
            </body></html>"#
        )
    }

    fn detail() -> String {
        r#"<html><body>
          <div class="post-content cf entry-content content-spacious"><p>Heavy rain fell...</p></div>
        </body></html>"#
            .to_string()
    }

    fn generated(text: &str) -> serde_json::Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    async fn mount_enrichment(server: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("Summarize the following"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated("Rain hit the capital.")))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("comma-separated keywords"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated("rain, capital")))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-embedding-004:embedContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embedding": { "values": [0.1, 0.2] } })),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storm.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(server)
            .await;
    }

    fn pipeline(
        server: &MockServer,
        repository: Repository,
        upload_dir: &std::path::Path,
    ) -> Pipeline<StaticPages> {
        let image_url = format!("{}/storm.jpg", server.uri());
        let pages = StaticPages::new(&[
            (LISTING_URL, listing(&image_url)),
            ("https://x/1", detail()),
        ]);
        let relocator = ImageRelocator::new(ImageStorage::Local {
            dir: upload_dir.to_path_buf(),
            public_prefix: "/uploads".to_string(),
        })
        .unwrap();
        let config = EnrichmentConfig {
            api_base: server.uri(),
            ..EnrichmentConfig::default()
        };
        let enricher = Enricher::new(&config, "test-key".to_string()).unwrap();
        Pipeline::new(pages, repository, relocator, Some(enricher))
    }

    #[tokio::test]
    async fn storm_article_is_scraped_enriched_and_stored() {
        let server = MockServer::start().await;
        mount_enrichment(&server).await;
        let uploads = tempfile::tempdir().unwrap();
        let repository = Repository::open_in_memory().await.unwrap();

        let pipeline = pipeline(&server, repository.clone(), uploads.path());
        let stats = pipeline.run(&[SourceId::FrontPageAfrica]).await;
        assert_eq!(
            stats,
            RunStats {
                inserted: 1,
                ..RunStats::default()
            }
        );

        let stored = repository
            .find_article("Storm hits capital", "FrontPageAfrica", "https://x/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content.as_deref(), Some("Heavy rain fell..."));
        assert_eq!(stored.summary.as_deref(), Some("Rain hit the capital."));
        assert_eq!(stored.keywords, vec!["rain", "capital"]);
        assert_eq!(stored.vectors, vec![0.1, 0.2]);
        assert_eq!(stored.author_id, "Unknown");
        assert!(stored.is_scraped);
        assert!(stored.image_url.unwrap().starts_with("/uploads/"));

        let category = repository.category_by_name("Weather").await.unwrap().unwrap();
        assert_eq!(stored.category_id, category.id);

        // The untitled teaser never reached the detail fetch.
        let requested = pipeline.into_fetcher().requested();
        assert_eq!(requested, vec![LISTING_URL.to_string(), "https://x/1".to_string()]);
    }

    #[tokio::test]
    async fn failed_enrichment_on_rerun_keeps_summary() {
        // First run: summary and embedding succeed, keywords come back as prose.
        let first_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Summarize the following"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated("Rain hit the capital.")))
            .mount(&first_server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("comma-separated keywords"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated(
                "I cannot determine relevant keywords for this text.",
            )))
            .mount(&first_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-embedding-004:embedContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "embedding": { "values": [0.1, 0.2] } })),
            )
            .mount(&first_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storm.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&first_server)
            .await;
        let uploads = tempfile::tempdir().unwrap();
        let repository = Repository::open_in_memory().await.unwrap();

        pipeline(&first_server, repository.clone(), uploads.path())
            .run(&[SourceId::FrontPageAfrica])
            .await;

        // Second run: keywords are still missing, so the API is called and fails.
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(3)
            .mount(&failing)
            .await;

        let stats = pipeline(&failing, repository.clone(), uploads.path())
            .run(&[SourceId::FrontPageAfrica])
            .await;
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.inserted, 0);

        assert_eq!(repository.count_articles().await.unwrap(), 1);
        let stored = repository
            .find_article("Storm hits capital", "FrontPageAfrica", "https://x/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.summary.as_deref(), Some("Rain hit the capital."));
        assert!(stored.keywords.is_empty());
        assert_eq!(stored.vectors, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn reruns_reuse_stored_image_and_enrichment() {
        let server = MockServer::start().await;
        mount_enrichment(&server).await;
        let uploads = tempfile::tempdir().unwrap();
        let repository = Repository::open_in_memory().await.unwrap();

        for _ in 0..3 {
            pipeline(&server, repository.clone(), uploads.path())
                .run(&[SourceId::FrontPageAfrica])
                .await;
        }

        assert_eq!(repository.count_articles().await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 1);

        let requests = server.received_requests().await.unwrap();
        let downloads = requests.iter().filter(|r| r.method.as_str() == "GET").count();
        let api_calls = requests.iter().filter(|r| r.method.as_str() == "POST").count();
        assert_eq!(downloads, 1);
        assert_eq!(api_calls, 3);

        let stored = repository
            .find_article("Storm hits capital", "FrontPageAfrica", "https://x/1")
            .await
            .unwrap()
            .unwrap();
        let file_name = stored.image_url.unwrap().trim_start_matches("/uploads/").to_string();
        assert!(uploads.path().join(file_name).exists());
    }

    /// Never finishes loading anything.
    struct StalledPages;

    impl PageSource for StalledPages {
        async fn load(&self, _url: &str, _ready_selector: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    fn local_relocator(dir: &std::path::Path) -> ImageRelocator {
        ImageRelocator::new(ImageStorage::Local {
            dir: dir.to_path_buf(),
            public_prefix: "/uploads".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_run_in_progress() {
        let repository = Repository::open_in_memory().await.unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(StalledPages, repository, local_relocator(uploads.path()), None);

        let completed = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_until(
                &[SourceId::FrontPageAfrica],
                Duration::from_secs(3600),
                tokio::time::sleep(Duration::from_millis(100)),
            ),
        )
        .await
        .expect("shutdown was not observed during the run");
        assert_eq!(completed, 0);
    }

    #[tokio::test]
    async fn shutdown_while_idle_stops_after_finished_run() {
        let repository = Repository::open_in_memory().await.unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let pages = StaticPages::new(&[
            (LISTING_URL, listing("ftp://cdn/storm.jpg")),
            ("https://x/1", detail()),
        ]);
        let pipeline = Pipeline::new(pages, repository.clone(), local_relocator(uploads.path()), None);

        let completed = pipeline
            .run_until(
                &[SourceId::FrontPageAfrica],
                Duration::from_secs(3600),
                tokio::time::sleep(Duration::from_millis(300)),
            )
            .await;
        assert_eq!(completed, 1);
        assert_eq!(repository.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_listing_skips_only_that_source() {
        let server = MockServer::start().await;
        mount_enrichment(&server).await;
        let uploads = tempfile::tempdir().unwrap();
        let repository = Repository::open_in_memory().await.unwrap();

        let stats = pipeline(&server, repository.clone(), uploads.path())
            .run(&[SourceId::NewDawn, SourceId::FrontPageAfrica])
            .await;

        assert_eq!(stats.inserted, 1);
        assert_eq!(repository.count_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_detail_counts_as_failed() {
        let repository = Repository::open_in_memory().await.unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let pages = StaticPages::new(&[(LISTING_URL, listing("ftp://cdn/storm.jpg"))]);
        let relocator = ImageRelocator::new(ImageStorage::Local {
            dir: uploads.path().to_path_buf(),
            public_prefix: "/uploads".to_string(),
        })
        .unwrap();

        let stats = Pipeline::new(pages, repository.clone(), relocator, None)
            .run(&[SourceId::FrontPageAfrica])
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(repository.count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn excerpt_stands_in_for_missing_body_without_enricher() {
        let repository = Repository::open_in_memory().await.unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let listing = r#"
            <article class="l-post grid-post grid-base-post">
              <h2 class="post-title"><a href="https://x/3">Budget passes</a></h2>
              <div class="excerpt"><p>Lawmakers approved the budget.</p></div>
            </article>"#
            .to_string();
        let detail = r#"
            <div class="post-content cf entry-content content-spacious"></div>"#
            .to_string();
        let pages = StaticPages::new(&[(LISTING_URL, listing), ("https://x/3", detail)]);
        let relocator = ImageRelocator::new(ImageStorage::Local {
            dir: uploads.path().to_path_buf(),
            public_prefix: "/uploads".to_string(),
        })
        .unwrap();

        let stats = Pipeline::new(pages, repository.clone(), relocator, None)
            .run(&[SourceId::FrontPageAfrica])
            .await;
        assert_eq!(stats.inserted, 1);

        let stored = repository
            .find_article("Budget passes", "FrontPageAfrica", "https://x/3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content.as_deref(), Some("Lawmakers approved the budget."));
        assert_eq!(stored.summary, None);
        assert_eq!(stored.image_url, None);
    }
}
