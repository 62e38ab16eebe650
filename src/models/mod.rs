mod article;

pub use article::{
    parse_datetime, Article, Category, Detail, Enrichment, NewArticle, ScrapeResult,
    UpsertOutcome, DEFAULT_AUTHOR, DEFAULT_CATEGORY,
};
