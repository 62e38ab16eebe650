use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// News sites the scraper knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    FrontPageAfrica,
    LiberianObserver,
    NewDawn,
    NewRepublicLiberia,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::FrontPageAfrica,
        SourceId::LiberianObserver,
        SourceId::NewDawn,
        SourceId::NewRepublicLiberia,
    ];

    pub fn rules(self) -> &'static SourceRules {
        match self {
            SourceId::FrontPageAfrica => &FRONT_PAGE_AFRICA,
            SourceId::LiberianObserver => &LIBERIAN_OBSERVER,
            SourceId::NewDawn => &NEW_DAWN,
            SourceId::NewRepublicLiberia => &NEW_REPUBLIC_LIBERIA,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::FrontPageAfrica => "front-page-africa",
            SourceId::LiberianObserver => "liberian-observer",
            SourceId::NewDawn => "new-dawn",
            SourceId::NewRepublicLiberia => "new-republic-liberia",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| AppError::Config(format!("unknown source `{s}`")))
    }
}

/// How a field's value is read from the element a selector matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Text,
    Attr(&'static str),
    /// First candidate of a `srcset`-style attribute.
    SrcSet(&'static str),
}

/// Where a selector is evaluated: inside the listing entry or against the
/// whole page (for values shared by every entry, like an archive heading).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Entry,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub selector: &'static str,
    pub read: Read,
    pub scope: Scope,
}

impl Field {
    const fn text(selector: &'static str) -> Self {
        Self {
            selector,
            read: Read::Text,
            scope: Scope::Entry,
        }
    }

    const fn attr(selector: &'static str, name: &'static str) -> Self {
        Self {
            selector,
            read: Read::Attr(name),
            scope: Scope::Entry,
        }
    }
}

/// Selector rule set for one source's listing and detail pages.
#[derive(Debug)]
pub struct SourceRules {
    /// Value stored in `articles.source`.
    pub name: &'static str,
    pub listing_url: &'static str,
    pub listing_ready: &'static str,
    /// One match per article teaser.
    pub entry: &'static str,
    /// Link whose text is the title and whose `href` is the article url.
    pub headline: &'static str,
    pub category: Option<Field>,
    pub published_at: Option<Field>,
    pub excerpt: Option<Field>,
    pub image: Option<Field>,
    pub author: Option<Field>,
    pub detail_ready: &'static str,
    pub detail_body: &'static str,
    /// Byline on the article page, preferred over the listing's author.
    pub detail_author: Option<&'static str>,
}

static FRONT_PAGE_AFRICA: SourceRules = SourceRules {
    name: "FrontPageAfrica",
    listing_url: "https://frontpageafricaonline.com/",
    listing_ready: "article.l-post.grid-post.grid-base-post",
    entry: "article.l-post.grid-post.grid-base-post",
    headline: "h2.post-title a",
    category: Some(Field::text("a.category")),
    published_at: Some(Field::attr("time.post-date", "datetime")),
    excerpt: Some(Field::text("div.excerpt p")),
    image: Some(Field::attr("span.img", "data-bgsrc")),
    author: Some(Field::text("p strong em")),
    detail_ready: "div.post-content.cf.entry-content.content-spacious",
    detail_body: "div.post-content.cf.entry-content.content-spacious",
    detail_author: Some("p strong em"),
};

static LIBERIAN_OBSERVER: SourceRules = SourceRules {
    name: "LiberianObserver",
    listing_url: "https://www.liberianobserver.com/",
    listing_ready: ".card-container",
    entry: ".card-container",
    headline: ".card-headline a.tnt-asset-link",
    category: Some(Field::text(
        ".card-labels .card-label-section a.tnt-section-tag",
    )),
    published_at: Some(Field::attr(".tnt-date", "datetime")),
    excerpt: Some(Field::text(".tnt-summary")),
    image: Some(Field {
        selector: ".card-image img[data-srcset]",
        read: Read::SrcSet("data-srcset"),
        scope: Scope::Entry,
    }),
    author: Some(Field::text(".card-byline")),
    detail_ready: "div.asset-content",
    detail_body: "div.asset-content",
    detail_author: None,
};

static NEW_DAWN: SourceRules = SourceRules {
    name: "New Dawn",
    listing_url: "https://thenewdawnliberia.com/",
    listing_ready: ".post-item",
    entry: ".post-item",
    headline: "h2.post-title a",
    category: Some(Field::text(".post-cat")),
    published_at: Some(Field::text(".post-meta .date")),
    excerpt: Some(Field::text(".post-excerpt")),
    image: Some(Field::attr("img", "src")),
    author: Some(Field::text(".meta-author-wrapper .meta-author a")),
    detail_ready: "div.entry-content.entry.clearfix",
    detail_body: "div.entry-content.entry.clearfix",
    detail_author: None,
};

static NEW_REPUBLIC_LIBERIA: SourceRules = SourceRules {
    name: "New Republic Liberia",
    listing_url: "https://www.newrepublicliberia.com/",
    listing_ready: "article.post",
    entry: "article.post",
    headline: "h2.title a.post-title",
    category: Some(Field {
        selector: "section.archive-title h1.page-heading span.h-title",
        read: Read::Text,
        scope: Scope::Document,
    }),
    published_at: Some(Field::attr("time.post-published", "datetime")),
    excerpt: Some(Field::text("div.post-summary")),
    image: Some(Field::attr("a.img-holder", "data-src")),
    author: Some(Field::text(".post-author.author")),
    detail_ready: "div.entry-content",
    detail_body: "div.entry-content",
    detail_author: None,
};
