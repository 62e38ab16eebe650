use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EnrichmentConfig;
use crate::error::{AppError, Result};
use crate::models::Enrichment;

const MAX_INPUT_CHARS: usize = 10_000;
const MAX_KEYWORD_WORDS: usize = 4;

const SUMMARY_PROMPT: &str = "Summarize the following news article in two or three sentences. \
Reply with the summary only.";
const KEYWORDS_PROMPT: &str = "List 5 to 10 keywords for the following news article. \
Reply with a single line of comma-separated keywords and nothing else.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> Content<'a> {
    fn text(text: &'a str) -> Self {
        Self {
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Embedding,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// Client for the generative-text and embedding API used to summarize,
/// tag and embed article bodies.
pub struct Enricher {
    client: Client,
    api_key: String,
    api_base: String,
    text_model: String,
    embedding_model: String,
}

impl Enricher {
    pub fn new(config: &EnrichmentConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }

    /// Run the three enrichment calls one after another. Each failure only
    /// empties its own field.
    pub async fn enrich(&self, title: &str, text: &str) -> Enrichment {
        let text = truncate_chars(text, MAX_INPUT_CHARS);

        let summary = self.summarize(title, text).await.unwrap_or_else(|e| {
            warn!(%title, error = %e, "Summary generation failed");
            String::new()
        });

        let keywords = match self.keywords(text).await {
            Ok(keywords) => keywords,
            Err(AppError::KeywordParse(raw)) => {
                warn!(%title, response = %raw, "Keyword response could not be parsed");
                Vec::new()
            }
            Err(e) => {
                warn!(%title, error = %e, "Keyword extraction failed");
                Vec::new()
            }
        };

        let vectors = self.embed(text).await.unwrap_or_else(|e| {
            warn!(%title, error = %e, "Embedding failed");
            Vec::new()
        });

        Enrichment {
            summary,
            keywords,
            vectors,
        }
    }

    pub async fn summarize(&self, title: &str, text: &str) -> Result<String> {
        let prompt = format!("{SUMMARY_PROMPT}\n\nTitle: {title}\n\n{text}");
        let summary = self.generate(&prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(AppError::EnrichmentApi("empty summary".to_string()));
        }
        Ok(summary.to_string())
    }

    pub async fn keywords(&self, text: &str) -> Result<Vec<String>> {
        let prompt = format!("{KEYWORDS_PROMPT}\n\n{text}");
        let raw = self.generate(&prompt).await?;
        parse_keywords(&raw).ok_or(AppError::KeywordParse(raw))
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.api_base, self.embedding_model
        );
        let request = EmbedRequest {
            content: Content::text(text),
        };

        let response = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::EnrichmentApi(format!("HTTP {status}: {error_text}")));
        }

        let embed_response: EmbedResponse = response.json().await?;
        if embed_response.embedding.values.is_empty() {
            return Err(AppError::EnrichmentApi("empty embedding".to_string()));
        }
        Ok(embed_response.embedding.values)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.text_model
        );
        let request = GenerateRequest {
            contents: vec![Content::text(prompt)],
        };

        let response = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::EnrichmentApi(format!("HTTP {status}: {error_text}")));
        }

        let generated: GenerateResponse = response.json().await?;
        generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or_else(|| AppError::EnrichmentApi("no candidates in response".to_string()))
    }
}

/// Pull a keyword list out of a free-text model answer. Accepts a
/// comma-separated line as asked for, and tolerates bullet lists, JSON-ish
/// arrays, preamble lines ending in `:` and a leading `label:` prefix.
/// Returns `None` when nothing in the answer looks like a keyword.
pub fn parse_keywords(raw: &str) -> Option<Vec<String>> {
    static BULLET: OnceLock<Option<Regex>> = OnceLock::new();
    let bullet = BULLET.get_or_init(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s*").ok());

    let mut lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .skip_while(|line| line.ends_with(':'))
        .collect();
    if let Some((_, rest)) = lines.first().copied().and_then(|first| first.split_once(':')) {
        lines[0] = rest;
    }

    let mut seen = HashSet::new();
    let keywords: Vec<String> = lines
        .into_iter()
        .flat_map(|line| line.split(','))
        .map(|piece| {
            let piece = piece.trim();
            let piece = match bullet {
                Some(re) => re.replace(piece, "").into_owned(),
                None => piece.to_string(),
            };
            piece
                .trim_matches(|c: char| {
                    matches!(c, '[' | ']' | '"' | '\'' | '`' | '.' | ':') || c.is_whitespace()
                })
                .to_string()
        })
        .filter(|k| !k.is_empty() && k.split_whitespace().count() <= MAX_KEYWORD_WORDS)
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect();

    if keywords.is_empty() {
        None
    } else {
        Some(keywords)
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
