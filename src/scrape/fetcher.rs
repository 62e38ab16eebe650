use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::config::FetcherKind;
use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Something that can load a page and hand back its rendered HTML once
/// `ready_selector` is present.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn load(&self, url: &str, ready_selector: &str) -> Result<String>;
}

/// Plain HTTP fetcher for server-rendered pages.
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

impl PageSource for HttpPageSource {
    async fn load(&self, url: &str, ready_selector: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, USER_AGENT_STRING)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch {}: HTTP {}", url, response.status()).into());
        }

        let html = response.text().await?;
        if !has_selector(&html, ready_selector)? {
            return Err(AppError::SelectorMissing {
                url: url.to_string(),
                selector: ready_selector.to_string(),
            });
        }
        Ok(html)
    }
}

fn has_selector(html: &str, ready_selector: &str) -> Result<bool> {
    let selector = Selector::parse(ready_selector)
        .map_err(|e| AppError::Config(format!("invalid selector `{ready_selector}`: {e}")))?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}

/// One time budget shared by every step of a page load.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
struct Deadline<'a> {
    at: tokio::time::Instant,
    budget: Duration,
    url: &'a str,
    selector: &'a str,
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl<'a> Deadline<'a> {
    fn start(budget: Duration, url: &'a str, selector: &'a str) -> Self {
        Self {
            at: tokio::time::Instant::now() + budget,
            budget,
            url,
            selector,
        }
    }

    /// Await `step`, failing with `PageTimeout` once the budget is spent.
    async fn within<T>(&self, step: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout_at(self.at, step).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PageTimeout {
                url: self.url.to_string(),
                selector: self.selector.to_string(),
                secs: self.budget.as_secs(),
            }),
        }
    }
}

#[cfg(feature = "browser")]
pub use browser::BrowserPageSource;

#[cfg(feature = "browser")]
mod browser {
    use std::time::Duration;

    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::Page;
    use futures::StreamExt;
    use tokio::task::JoinHandle;

    use super::{Deadline, PageSource};
    use crate::error::{AppError, Result};

    const POLL_INTERVAL: Duration = Duration::from_millis(250);
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    fn browser_err(e: impl std::fmt::Display) -> AppError {
        AppError::Browser(e.to_string())
    }

    /// Headless Chromium for sites that render their listings with
    /// JavaScript. One browser is shared; each load gets its own tab.
    pub struct BrowserPageSource {
        browser: Browser,
        handler: JoinHandle<()>,
        timeout: Duration,
    }

    impl BrowserPageSource {
        pub async fn launch(timeout: Duration) -> Result<Self> {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .arg("--disable-setuid-sandbox")
                .build()
                .map_err(AppError::Browser)?;

            let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            tracing::info!("Launched headless browser");
            Ok(Self {
                browser,
                handler,
                timeout,
            })
        }

        pub async fn shutdown(mut self) {
            if let Err(e) = self.browser.close().await {
                tracing::warn!(error = %e, "Failed to close browser");
            }
            let _ = self.handler.await;
        }

        async fn render(&self, page: &Page, url: &str, ready_selector: &str) -> Result<String> {
            page.goto(url).await.map_err(browser_err)?;
            while page.find_element(ready_selector).await.is_err() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            page.content().await.map_err(browser_err)
        }
    }

    impl PageSource for BrowserPageSource {
        async fn load(&self, url: &str, ready_selector: &str) -> Result<String> {
            let deadline = Deadline::start(self.timeout, url, ready_selector);
            let page = deadline
                .within(async { self.browser.new_page("about:blank").await.map_err(browser_err) })
                .await?;

            let result = deadline.within(self.render(&page, url, ready_selector)).await;

            match tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(%url, error = %e, "Failed to close tab"),
                Err(_) => tracing::debug!(%url, "Timed out closing tab"),
            }
            result
        }
    }
}

/// The fetcher chosen in configuration.
pub enum SiteFetcher {
    Http(HttpPageSource),
    #[cfg(feature = "browser")]
    Browser(BrowserPageSource),
}

impl SiteFetcher {
    pub async fn from_kind(kind: FetcherKind, timeout: Duration) -> Result<Self> {
        match kind {
            FetcherKind::Http => Ok(SiteFetcher::Http(HttpPageSource::new(timeout)?)),
            #[cfg(feature = "browser")]
            FetcherKind::Browser => Ok(SiteFetcher::Browser(BrowserPageSource::launch(timeout).await?)),
            #[cfg(not(feature = "browser"))]
            FetcherKind::Browser => Err(AppError::Config(
                "fetcher = \"browser\" needs the `browser` feature".to_string(),
            )),
        }
    }

    pub async fn shutdown(self) {
        match self {
            SiteFetcher::Http(_) => {}
            #[cfg(feature = "browser")]
            SiteFetcher::Browser(browser) => browser.shutdown().await,
        }
    }
}

impl PageSource for SiteFetcher {
    async fn load(&self, url: &str, ready_selector: &str) -> Result<String> {
        match self {
            SiteFetcher::Http(http) => http.load(url, ready_selector).await,
            #[cfg(feature = "browser")]
            SiteFetcher::Browser(browser) => browser.load(url, ready_selector).await,
        }
    }
}
