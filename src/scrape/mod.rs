mod extractor;
mod fetcher;
mod sources;

pub use extractor::{extract_detail, extract_listing};
#[cfg(feature = "browser")]
pub use fetcher::BrowserPageSource;
pub use fetcher::{HttpPageSource, PageSource, SiteFetcher};
pub use sources::{SourceId, SourceRules};
