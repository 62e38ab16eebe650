use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{parse_datetime, Article, Category, NewArticle, UpsertOutcome};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, title, content, category_id, source, author_id, url, fetched_at, \
     published_at, is_scraped, excerpt, image_url, summary, keywords, vectors, deleted_at";

/// Handle to the article store. Cloning shares the underlying connection,
/// whose calls are serialised on a single background thread.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Ingestion

    /// Write one scraped article.
    ///
    /// Category resolution, the duplicate check and the insert or backfill
    /// all happen in one immediate transaction, so concurrent runs cannot
    /// create the same category or article twice. On an existing article only
    /// summary, keywords and vectors are touched, and only when the stored
    /// value is empty.
    pub async fn upsert_scraped(&self, article: NewArticle) -> Result<UpsertOutcome> {
        let summary = Some(article.enrichment.summary.clone()).filter(|s| !s.is_empty());
        let keywords = if article.enrichment.keywords.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&article.enrichment.keywords)?)
        };
        let vectors = if article.enrichment.vectors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&article.enrichment.vectors)?)
        };
        let fetched_at = Utc::now().to_rfc3339();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let category_id = resolve_category(&tx, &article.category_name)?;

                let existing = tx
                    .query_row(
                        "SELECT id, summary, keywords, vectors FROM articles
                         WHERE title = ?1 AND source = ?2 AND url = ?3",
                        params![article.title, article.source, article.url],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, Option<String>>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, Option<String>>(3)?,
                            ))
                        },
                    )
                    .optional()?;

                let outcome = match existing {
                    None => {
                        tx.execute(
                            r#"INSERT INTO articles (title, content, url, image_url, published_at,
                                   category_id, source, author_id, excerpt, fetched_at, is_scraped,
                                   summary, keywords, vectors)
                               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?13)"#,
                            params![
                                article.title,
                                article.content,
                                article.url,
                                article.image_url,
                                article.published_at.map(|dt| dt.to_rfc3339()),
                                category_id,
                                article.source,
                                article.author_id,
                                article.excerpt,
                                fetched_at,
                                summary,
                                keywords,
                                vectors,
                            ],
                        )?;
                        UpsertOutcome::Inserted(tx.last_insert_rowid())
                    }
                    Some((id, old_summary, old_keywords, old_vectors)) => {
                        let mut fields = Vec::new();
                        let candidates = [
                            ("summary", old_summary, summary),
                            ("keywords", old_keywords, keywords),
                            ("vectors", old_vectors, vectors),
                        ];
                        for (column, old, new) in candidates {
                            let Some(new) = new else { continue };
                            if !is_blank(old.as_deref()) {
                                continue;
                            }
                            tx.execute(
                                &format!("UPDATE articles SET {column} = ?1 WHERE id = ?2"),
                                params![new, id],
                            )?;
                            fields.push(column);
                        }
                        if fields.is_empty() {
                            UpsertOutcome::Unchanged(id)
                        } else {
                            UpsertOutcome::Backfilled { id, fields }
                        }
                    }
                };

                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }

    // Article operations

    pub async fn find_article(&self, title: &str, source: &str, url: &str) -> Result<Option<Article>> {
        let (title, source, url) = (title.to_string(), source.to_string(), url.to_string());
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE title = ?1 AND source = ?2 AND url = ?3"
                ))?;
                let article = stmt
                    .query_row(params![title, source, url], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"))?;
                let article = stmt.query_row(params![id], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn list_recent_articles(&self, limit: usize) -> Result<Vec<Article>> {
        let limit = limit as i64;
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE deleted_at IS NULL
                     ORDER BY published_at DESC NULLS LAST, fetched_at DESC
                     LIMIT ?1"
                ))?;
                let articles = stmt
                    .query_map(params![limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Hard delete, used by admin tooling. The pipeline never deletes.
    pub async fn delete_article(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Category operations

    pub async fn category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let name = name.to_string();
        let category = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, image_url, deleted_at FROM categories WHERE name = ?1",
                )?;
                let category = stmt.query_row(params![name], category_from_row).optional()?;
                Ok(category)
            })
            .await?;
        Ok(category)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, image_url, deleted_at FROM categories ORDER BY name")?;
                let categories = stmt
                    .query_map([], category_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(categories)
            })
            .await?;
        Ok(categories)
    }

    /// Soft-delete a category. Returns `false` and leaves it alone while any
    /// article still references it.
    pub async fn soft_delete_category(&self, id: i64) -> Result<bool> {
        let deleted_at = Utc::now().to_rfc3339();
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let referenced: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM articles WHERE category_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                if referenced > 0 {
                    return Ok(false);
                }
                let changed = tx.execute(
                    "UPDATE categories SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                    params![deleted_at, id],
                )?;
                tx.commit()?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }
}

/// Create the category if needed and return its id. A soft-deleted category
/// is brought back since an article is about to reference it.
fn resolve_category(tx: &Transaction<'_>, name: &str) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT INTO categories (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET deleted_at = NULL",
        params![name],
    )?;
    tx.query_row(
        "SELECT id FROM categories WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
}

fn is_blank(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") | Some("[]") | Some("null") => true,
        Some(_) => false,
    }
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category_id: row.get(3)?,
        source: row.get(4)?,
        author_id: row.get(5)?,
        url: row.get(6)?,
        fetched_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        published_at: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| parse_datetime(&s)),
        is_scraped: row.get::<_, i64>(9)? != 0,
        excerpt: row.get(10)?,
        image_url: row.get(11)?,
        summary: row.get(12)?,
        keywords: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        vectors: row
            .get::<_, Option<String>>(14)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        deleted_at: row
            .get::<_, Option<String>>(15)?
            .and_then(|s| parse_datetime(&s)),
    })
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        image_url: row.get(2)?,
        deleted_at: row
            .get::<_, Option<String>>(3)?
            .and_then(|s| parse_datetime(&s)),
    })
}
