use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the article store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: Option<String>,
    /// Normalized RFC 3339 timestamp, or the raw feed string when unparseable.
    pub published_date: Option<String>,
    pub origin_tag: String,
    pub snippet: Option<String>,
    pub scraped_text: Option<String>,
    pub scrape_status: Option<String>,
    pub scraped_at: Option<String>,
    pub summary: Option<String>,
    pub summary_status: Option<String>,
    pub summarized_at: Option<String>,
    pub pending_batch_handle: Option<String>,
    pub relevance_flag: Option<bool>,
    pub filter_batch_handle: Option<String>,
    pub cluster_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn display_source(&self) -> &str {
        self.source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.origin_tag)
    }
}

/// Canonical shape every feed item is mapped to before insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewArticle {
    pub title: String,
    pub url: String,
    pub source: Option<String>,
    pub published_date: Option<String>,
    pub origin_tag: String,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added(i64),
    Duplicate,
}
