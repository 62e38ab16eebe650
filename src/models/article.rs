use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CATEGORY: &str = "Uncategorized";
pub const DEFAULT_AUTHOR: &str = "Unknown";

/// A persisted article row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub category_id: i64,
    pub source: String,
    pub author_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_scraped: bool,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub vectors: Vec<f32>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub image_url: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One listing entry as extracted from a source, before image relocation
/// and enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult {
    pub title: String,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<String>,
    pub excerpt: Option<String>,
    pub category_name: String,
    pub author: String,
    pub content: Option<String>,
    pub source: String,
}

/// Fields read from an article's own page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detail {
    pub content: Option<String>,
    pub author: Option<String>,
}

/// Output of the content enricher. Empty values mean the call failed or
/// was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub summary: String,
    pub keywords: Vec<String>,
    pub vectors: Vec<f32>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.keywords.is_empty() && self.vectors.is_empty()
    }
}

/// Everything the upserter needs to write one scraped article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category_name: String,
    pub source: String,
    pub author_id: String,
    pub excerpt: Option<String>,
    pub enrichment: Enrichment,
}

impl NewArticle {
    pub fn from_scraped(
        scraped: ScrapeResult,
        image_url: Option<String>,
        enrichment: Enrichment,
    ) -> Self {
        let published_at = scraped.published_at.as_deref().and_then(parse_datetime);
        Self {
            title: scraped.title,
            content: scraped.content,
            url: scraped.url,
            image_url,
            published_at,
            category_name: scraped.category_name,
            source: scraped.source,
            author_id: scraped.author,
            excerpt: scraped.excerpt,
            enrichment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Backfilled { id: i64, fields: Vec<&'static str> },
    Unchanged(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Unchanged(id) => *id,
            UpsertOutcome::Backfilled { id, .. } => *id,
        }
    }
}

/// Parse stored timestamps as well as the publish dates sources put in
/// `datetime` attributes or bylines.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    // "October 5, 2024" style bylines
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%B %d, %Y") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}
