use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::BatchState;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_NO_CONTENT: &str = "no_content";
pub const STATUS_INVALID_URL: &str = "invalid_url";

/// Error messages stored in status columns are cut to this many characters.
pub const MAX_ERROR_CHARS: usize = 200;

/// Minimum scraped text length accepted by the scrape stage.
pub const MIN_SCRAPED_CHARS: usize = 100;
/// Minimum scraped text length before an article is worth summarizing.
pub const MIN_SUMMARIZE_CHARS: usize = 200;
/// Minimum summary length for relevance filtering and clustering.
pub const MIN_SUMMARY_CHARS: usize = 50;

/// Reserved cluster id for articles with no coherent theme.
pub const OUTLIER_CLUSTER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scrape,
    Summarize,
    Filter,
    Cluster,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Scrape, Stage::Summarize, Stage::Filter, Stage::Cluster];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Summarize => "summarize",
            Stage::Filter => "filter",
            Stage::Cluster => "cluster",
        }
    }

    pub fn output_column(self) -> StageColumn {
        match self {
            Stage::Scrape => StageColumn::ScrapedText,
            Stage::Summarize => StageColumn::Summary,
            Stage::Filter => StageColumn::RelevanceFlag,
            Stage::Cluster => StageColumn::ClusterId,
        }
    }

    pub fn status_column(self) -> Option<StageColumn> {
        match self {
            Stage::Scrape => Some(StageColumn::ScrapeStatus),
            Stage::Summarize => Some(StageColumn::SummaryStatus),
            Stage::Filter | Stage::Cluster => None,
        }
    }

    /// Column holding the handle of the asynchronous job a record belongs to.
    pub fn batch_handle_column(self) -> Option<StageColumn> {
        match self {
            Stage::Summarize => Some(StageColumn::PendingBatchHandle),
            Stage::Filter => Some(StageColumn::FilterBatchHandle),
            Stage::Scrape | Stage::Cluster => None,
        }
    }

    /// SQL condition on `articles` for "output still missing".
    pub fn output_missing(self) -> String {
        let column = self.output_column().name();
        match self.output_column().column_type() {
            ColumnType::Text => format!("({column} IS NULL OR {column} = '')"),
            _ => format!("{column} IS NULL"),
        }
    }

    /// SQL condition on `articles` for the stage's prerequisites.
    pub fn prerequisites(self) -> String {
        match self {
            Stage::Scrape => format!(
                "url != '' AND (scrape_status IS NULL OR scrape_status NOT IN ('{STATUS_NO_CONTENT}', '{STATUS_INVALID_URL}'))"
            ),
            Stage::Summarize => format!(
                "scraped_text IS NOT NULL AND LENGTH(scraped_text) > {MIN_SUMMARIZE_CHARS}"
            ),
            Stage::Filter => {
                format!("summary IS NOT NULL AND LENGTH(summary) > {MIN_SUMMARY_CHARS}")
            }
            Stage::Cluster => format!(
                "summary IS NOT NULL AND LENGTH(summary) > {MIN_SUMMARY_CHARS} AND (relevance_flag = 1 OR relevance_flag IS NULL)"
            ),
        }
    }

    /// Full pending-set condition: output missing, prerequisites met, and not
    /// held by a batch job that is still in flight.
    pub fn pending_predicate(self) -> String {
        let mut predicate = format!("{} AND {}", self.output_missing(), self.prerequisites());
        if let Some(handle) = self.batch_handle_column() {
            predicate.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM batch_jobs j WHERE j.handle = articles.{} AND j.state NOT IN ({}))",
                handle.name(),
                BatchState::final_states_sql()
            ));
        }
        predicate
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scrape" => Ok(Stage::Scrape),
            "summarize" | "summary" => Ok(Stage::Summarize),
            "filter" | "relevance" => Ok(Stage::Filter),
            "cluster" => Ok(Stage::Cluster),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Timestamp,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

/// The optional, independently nullable columns added to `articles` over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageColumn {
    Snippet,
    ScrapedText,
    ScrapeStatus,
    ScrapedAt,
    Summary,
    SummaryStatus,
    SummarizedAt,
    PendingBatchHandle,
    RelevanceFlag,
    FilterBatchHandle,
    ClusterId,
}

impl StageColumn {
    pub const ALL: [StageColumn; 11] = [
        StageColumn::Snippet,
        StageColumn::ScrapedText,
        StageColumn::ScrapeStatus,
        StageColumn::ScrapedAt,
        StageColumn::Summary,
        StageColumn::SummaryStatus,
        StageColumn::SummarizedAt,
        StageColumn::PendingBatchHandle,
        StageColumn::RelevanceFlag,
        StageColumn::FilterBatchHandle,
        StageColumn::ClusterId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageColumn::Snippet => "snippet",
            StageColumn::ScrapedText => "scraped_text",
            StageColumn::ScrapeStatus => "scrape_status",
            StageColumn::ScrapedAt => "scraped_at",
            StageColumn::Summary => "summary",
            StageColumn::SummaryStatus => "summary_status",
            StageColumn::SummarizedAt => "summarized_at",
            StageColumn::PendingBatchHandle => "pending_batch_handle",
            StageColumn::RelevanceFlag => "relevance_flag",
            StageColumn::FilterBatchHandle => "filter_batch_handle",
            StageColumn::ClusterId => "cluster_id",
        }
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            StageColumn::ScrapedAt | StageColumn::SummarizedAt => ColumnType::Timestamp,
            StageColumn::RelevanceFlag | StageColumn::ClusterId => ColumnType::Integer,
            _ => ColumnType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Null,
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Text(value.to_rfc3339())
    }
}

/// Column values written to one record as a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUpdate {
    pub fields: Vec<(StageColumn, FieldValue)>,
}

impl StageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: StageColumn, value: impl Into<FieldValue>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn writes(&self, column: StageColumn) -> bool {
        self.fields.iter().any(|(c, _)| *c == column)
    }

    /// Output + `success` status + timestamp for `stage`.
    pub fn success(stage: Stage, output: impl Into<FieldValue>, at: DateTime<Utc>) -> Self {
        let update = Self::new().set(stage.output_column(), output);
        match stage {
            Stage::Scrape => update
                .set(StageColumn::ScrapeStatus, STATUS_SUCCESS)
                .set(StageColumn::ScrapedAt, at),
            Stage::Summarize => update
                .set(StageColumn::SummaryStatus, STATUS_SUCCESS)
                .set(StageColumn::SummarizedAt, at),
            Stage::Filter | Stage::Cluster => update,
        }
    }

    /// Status-only write; the output column stays null.
    pub fn status(stage: Stage, status: impl Into<FieldValue>) -> Self {
        match stage.status_column() {
            Some(column) => Self::new().set(column, status),
            None => Self::new(),
        }
    }

    pub fn failure(stage: Stage, message: &str) -> Self {
        Self::status(stage, error_status(message))
    }
}

/// `error: <message>` with the message capped at [`MAX_ERROR_CHARS`].
pub fn error_status(message: &str) -> String {
    let truncated: String = message.chars().take(MAX_ERROR_CHARS).collect();
    format!("error: {truncated}")
}
