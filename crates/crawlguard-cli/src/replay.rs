//! Replays previously crawled articles from a JSON Lines file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use crawlguard_core::error::AppError;
use crawlguard_core::models::Article;
use crawlguard_core::traits::Fetcher;

/// Read one JSON [`Article`] per line. Blank lines are skipped.
pub fn load_articles(path: &Path) -> Result<Vec<Article>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;

    let mut articles = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let article: Article = serde_json::from_str(&line)
            .with_context(|| format!("Invalid article JSON on line {}", index + 1))?;
        articles.push(article);
    }
    Ok(articles)
}

/// Fetcher serving articles from memory, keyed by URL.
#[derive(Clone)]
pub struct ReplayFetcher {
    articles: Arc<HashMap<String, Article>>,
}

impl ReplayFetcher {
    /// Later entries for the same URL replace earlier ones.
    pub fn new(articles: impl IntoIterator<Item = Article>) -> Self {
        let articles = articles
            .into_iter()
            .map(|article| (article.url.clone(), article))
            .collect();
        Self {
            articles: Arc::new(articles),
        }
    }
}

impl Fetcher for ReplayFetcher {
    async fn fetch(&self, url: &str) -> Result<Article, AppError> {
        self.articles
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 Not Found: {url} not in replay set")))
    }
}
