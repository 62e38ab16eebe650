//! Turns rendered pages into article fields using a source's [`SourceRules`].
//!
//! Everything here is a pure function of the HTML and the rule set, so the
//! rules can be checked against saved page snapshots.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Detail, ScrapeResult, DEFAULT_AUTHOR, DEFAULT_CATEGORY};

use super::sources::{Field, Read, Scope, SourceRules};

const TEXT_WIDTH: usize = 100;

/// Characters sites leave dangling at the end of image attributes, e.g.
/// `data-bgsrc="https://…/a.jpg;"`.
const STRAY_IMAGE_SUFFIX: &[char] = &[';', ',', '\'', '"', ')'];

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::Config(format!("invalid selector `{s}`: {e}")))
}

/// Extract listing teasers in page order. Entries without a title or a
/// resolvable url are dropped here, before any detail page is fetched.
pub fn extract_listing(html: &str, rules: &SourceRules) -> Result<Vec<ScrapeResult>> {
    let document = Html::parse_document(html);
    let base = Url::parse(rules.listing_url)?;
    let entry_selector = selector(rules.entry)?;
    let headline_selector = selector(rules.headline)?;

    let mut results = Vec::new();
    let mut dropped = 0usize;
    for entry in document.select(&entry_selector) {
        let headline = entry.select(&headline_selector).next();
        let title = headline.map(element_text).filter(|t| !t.is_empty());
        let url = headline
            .and_then(|h| h.value().attr("href"))
            .and_then(|href| base.join(href.trim()).ok());

        let (Some(title), Some(url)) = (title, url) else {
            dropped += 1;
            continue;
        };

        let category_name = read_field(&document, entry, rules.category)?
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let author = read_field(&document, entry, rules.author)?
            .map(|a| strip_byline(&a))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
        let image_url = read_field(&document, entry, rules.image)?
            .and_then(|raw| sanitize_image_url(&raw, &base));

        results.push(ScrapeResult {
            title,
            url: url.to_string(),
            image_url,
            published_at: read_field(&document, entry, rules.published_at)?,
            excerpt: read_field(&document, entry, rules.excerpt)?,
            category_name,
            author,
            content: None,
            source: rules.name.to_string(),
        });
    }

    if dropped > 0 {
        tracing::debug!(source = rules.name, dropped, "Dropped listing entries without title or url");
    }

    Ok(results)
}

/// Extract the article body (and byline, where the source has one) from a
/// detail page.
pub fn extract_detail(html: &str, rules: &SourceRules) -> Result<Detail> {
    let document = Html::parse_document(html);

    let content = document
        .select(&selector(rules.detail_body)?)
        .next()
        .and_then(body_text);

    let author = match rules.detail_author {
        Some(s) => document
            .select(&selector(s)?)
            .next()
            .map(|el| strip_byline(&element_text(el)))
            .filter(|a| !a.is_empty()),
        None => None,
    };

    Ok(Detail { content, author })
}

/// Clean up a raw image attribute value and make it absolute.
pub fn sanitize_image_url(raw: &str, base: &Url) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_start_matches(['\'', '"'])
        .trim_end_matches(STRAY_IMAGE_SUFFIX)
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    match base.join(cleaned) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Some(cleaned.to_string()),
    }
}

fn read_field(document: &Html, entry: ElementRef<'_>, field: Option<Field>) -> Result<Option<String>> {
    let Some(field) = field else {
        return Ok(None);
    };
    let sel = selector(field.selector)?;
    let element = match field.scope {
        Scope::Entry => entry.select(&sel).next(),
        Scope::Document => document.select(&sel).next(),
    };
    let Some(element) = element else {
        return Ok(None);
    };

    let value = match field.read {
        Read::Text => Some(element_text(element)),
        Read::Attr(name) => element.value().attr(name).map(str::to_string),
        Read::SrcSet(name) => element.value().attr(name).and_then(first_srcset_candidate),
    };
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// `"https://a/x.jpg?resize=300 300w, https://a/y.jpg 600w"` → `https://a/x.jpg`
fn first_srcset_candidate(srcset: &str) -> Option<String> {
    let first = srcset.split(',').next()?.split_whitespace().next()?;
    let without_query = first.split('?').next().unwrap_or(first);
    Some(without_query.to_string())
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_byline(author: &str) -> String {
    let author = author.trim();
    author.strip_prefix("By ").unwrap_or(author).trim().to_string()
}

fn body_text(element: ElementRef<'_>) -> Option<String> {
    let html = element.html();
    let text = match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert article body to text: {}", e);
            return None;
        }
    };

    static FOOTNOTE: OnceLock<Option<Regex>> = OnceLock::new();
    static LINK_REF: OnceLock<Option<Regex>> = OnceLock::new();
    let footnote = FOOTNOTE.get_or_init(|| Regex::new(r"^\[\d+\]:\s").ok());
    let link_ref = LINK_REF.get_or_init(|| Regex::new(r"\[([^\]]*)\]\[\d+\]").ok());

    let cleaned: String = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !footnote.as_ref().is_some_and(|re| re.is_match(l)))
        .map(|l| match link_ref {
            Some(re) => re.replace_all(l, "$1").into_owned(),
            None => l.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::SourceId;

    const FRONT_PAGE_LISTING: &str = r#"
        <html><body>
          <article class="l-post grid-post grid-base-post">
            <h2 class="post-title"><a href="https://frontpageafricaonline.com/news/storm">Storm hits capital</a></h2>
            <a class="category">Weather</a>
            <time class="post-date" datetime="2024-10-05T08:30:00+00:00">Oct 5</time>
            <div class="excerpt"><p>Heavy rain expected.</p></div>
            <span class="img" data-bgsrc="https://cdn.example/storm.jpg;"></span>
            <p><strong><em>By Jane Doe</em></strong></p>
          </article>
          <article class="l-post grid-post grid-base-post">
            <div class="excerpt"><p>An entry with no headline.</p></div>
          </article>
          <article class="l-post grid-post grid-base-post">
            <h2 class="post-title"><a href="/news/budget">  Budget   passes </a></h2>
          </article>
        </body></html>
    "#;

    #[test]
    fn listing_keeps_titled_entries_in_order() {
        let rules = SourceId::FrontPageAfrica.rules();
        let results = extract_listing(FRONT_PAGE_LISTING, rules).unwrap();
        assert_eq!(results.len(), 2);

        let storm = &results[0];
        assert_eq!(storm.title, "Storm hits capital");
        assert_eq!(storm.url, "https://frontpageafricaonline.com/news/storm");
        assert_eq!(storm.category_name, "Weather");
        assert_eq!(storm.author, "Jane Doe");
        assert_eq!(storm.image_url.as_deref(), Some("https://cdn.example/storm.jpg"));
        assert_eq!(storm.published_at.as_deref(), Some("2024-10-05T08:30:00+00:00"));
        assert_eq!(storm.excerpt.as_deref(), Some("Heavy rain expected."));
        assert_eq!(storm.source, "FrontPageAfrica");
        assert_eq!(storm.content, None);

        let budget = &results[1];
        assert_eq!(budget.title, "Budget passes");
        assert_eq!(budget.url, "https://frontpageafricaonline.com/news/budget");
        assert_eq!(budget.category_name, DEFAULT_CATEGORY);
        assert_eq!(budget.author, DEFAULT_AUTHOR);
        assert_eq!(budget.image_url, None);
    }

    #[test]
    fn srcset_images_take_first_candidate_without_query() {
        let html = r#"
            <div class="card-container">
              <div class="card-headline"><a class="tnt-asset-link" href="/news/a">Port reopens</a></div>
              <div class="card-image">
                <img data-srcset="https://img.example/port.jpg?resize=300 300w, https://img.example/port.jpg?resize=600 600w">
              </div>
              <div class="card-byline">By Observer Staff</div>
            </div>
        "#;
        let results = extract_listing(html, SourceId::LiberianObserver.rules()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].image_url.as_deref(), Some("https://img.example/port.jpg"));
        assert_eq!(results[0].author, "Observer Staff");
        assert_eq!(results[0].url, "https://www.liberianobserver.com/news/a");
    }

    #[test]
    fn document_scoped_category_applies_to_every_entry() {
        let html = r#"
            <section class="archive-title"><h1 class="page-heading"><span class="h-title">Politics</span></h1></section>
            <article class="post"><h2 class="title"><a class="post-title" href="https://nr.example/1">One</a></h2></article>
            <article class="post"><h2 class="title"><a class="post-title" href="https://nr.example/2">Two</a></h2></article>
        "#;
        let results = extract_listing(html, SourceId::NewRepublicLiberia.rules()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.category_name == "Politics"));
    }

    #[test]
    fn detail_reads_body_and_byline() {
        let html = r#"
            <div class="post-content cf entry-content content-spacious">
              <p><strong><em>By John Smith</em></strong></p>
              <p>Heavy rain fell on Monday.</p>
              <p>Roads were closed.</p>
            </div>
        "#;
        let detail = extract_detail(html, SourceId::FrontPageAfrica.rules()).unwrap();
        assert_eq!(detail.author.as_deref(), Some("John Smith"));
        let content = detail.content.unwrap();
        assert!(content.contains("Heavy rain fell on Monday."));
        assert!(content.contains("Roads were closed."));
    }

    #[test]
    fn detail_without_body_has_no_content() {
        let detail = extract_detail("<html><body><p>404</p></body></html>", SourceId::NewDawn.rules())
            .unwrap();
        assert_eq!(detail, Detail::default());
    }

    #[test]
    fn image_urls_are_sanitized() {
        let base = Url::parse("https://site.example/").unwrap();
        assert_eq!(
            sanitize_image_url(" https://cdn.example/a.png;", &base).as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(
            sanitize_image_url("'/uploads/b.jpg')", &base).as_deref(),
            Some("https://site.example/uploads/b.jpg")
        );
        assert_eq!(sanitize_image_url(" ; ", &base), None);
    }
}
