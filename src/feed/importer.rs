use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::db::Repository;
use crate::error::Result;
use crate::models::{InsertOutcome, NewArticle};

use super::dates::normalize_date;

/// A feed item mapped to canonical field names, date still raw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub url: String,
    pub source: String,
    pub date: String,
    pub snippet: Option<String>,
}

/// A row a feed produced, or why it could not be read.
pub type FeedRow = std::result::Result<FeedItem, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounts {
    pub added: usize,
    pub duplicate: usize,
    pub error: usize,
}

impl FeedCounts {
    pub fn total(&self) -> usize {
        self.added + self.duplicate + self.error
    }

    fn merge(&mut self, other: FeedCounts) {
        self.added += other.added;
        self.duplicate += other.duplicate;
        self.error += other.error;
    }
}

/// Per-feed classification of every attempted row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub feeds: BTreeMap<String, FeedCounts>,
}

impl ImportReport {
    pub fn totals(&self) -> FeedCounts {
        let mut totals = FeedCounts::default();
        for counts in self.feeds.values() {
            totals.merge(*counts);
        }
        totals
    }

    pub fn merge(&mut self, other: ImportReport) {
        for (feed, counts) in other.feeds {
            self.feeds.entry(feed).or_default().merge(counts);
        }
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<15} {:>8} {:>10} {:>7}", "feed", "added", "duplicate", "error")?;
        for (feed, counts) in &self.feeds {
            writeln!(
                f,
                "{:<15} {:>8} {:>10} {:>7}",
                feed, counts.added, counts.duplicate, counts.error
            )?;
        }
        let totals = self.totals();
        write!(
            f,
            "{:<15} {:>8} {:>10} {:>7}",
            "total", totals.added, totals.duplicate, totals.error
        )
    }
}

/// Merges feeds into the store under the unique-URL constraint. Existing rows
/// are never modified: a duplicate URL is counted and skipped.
pub struct Importer<'a> {
    repository: &'a Repository,
    now: DateTime<Utc>,
}

impl<'a> Importer<'a> {
    /// `now` anchors relative dates such as "3 days ago".
    pub fn new(repository: &'a Repository, now: DateTime<Utc>) -> Self {
        Self { repository, now }
    }

    pub async fn import<I>(&self, origin_tag: &str, rows: I) -> Result<ImportReport>
    where
        I: IntoIterator<Item = FeedRow>,
    {
        let mut counts = FeedCounts::default();

        for row in rows {
            let item = match row {
                Ok(item) => item,
                Err(reason) => {
                    tracing::warn!(feed = origin_tag, %reason, "unreadable feed row");
                    counts.error += 1;
                    continue;
                }
            };

            let Some(article) = self.to_article(origin_tag, item) else {
                tracing::warn!(feed = origin_tag, "feed row without url");
                counts.error += 1;
                continue;
            };

            let url = article.url.clone();
            match self.repository.insert_article(article).await {
                Ok(InsertOutcome::Added(id)) => {
                    counts.added += 1;
                    tracing::debug!(feed = origin_tag, article_id = id, %url, "added");
                    if counts.added % 500 == 0 {
                        tracing::info!(feed = origin_tag, added = counts.added, "import progress");
                    }
                }
                Ok(InsertOutcome::Duplicate) => {
                    counts.duplicate += 1;
                    tracing::debug!(feed = origin_tag, %url, "duplicate");
                }
                Err(e) => {
                    counts.error += 1;
                    tracing::warn!(feed = origin_tag, %url, error = %e, "insert failed");
                }
            }
        }

        tracing::info!(
            feed = origin_tag,
            added = counts.added,
            duplicate = counts.duplicate,
            error = counts.error,
            "feed imported"
        );

        let mut report = ImportReport::default();
        report.feeds.insert(origin_tag.to_string(), counts);
        Ok(report)
    }

    fn to_article(&self, origin_tag: &str, item: FeedItem) -> Option<NewArticle> {
        let url = item.url.trim().to_string();
        if url.is_empty() {
            return None;
        }

        let date = item.date.trim();
        let published_date = if date.is_empty() {
            None
        } else {
            Some(normalize_date(date, self.now).into_stored())
        };

        Some(NewArticle {
            title: item.title.trim().to_string(),
            url,
            source: Some(item.source.trim().to_string()).filter(|s| !s.is_empty()),
            published_date,
            origin_tag: origin_tag.to_string(),
            snippet: item.snippet.filter(|s| !s.trim().is_empty()),
        })
    }
}
