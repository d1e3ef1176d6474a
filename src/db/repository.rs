use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{ffi, params, params_from_iter, OpenFlags, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    Article, BatchJob, BatchState, BatchStatus, ColumnType, FieldValue, InsertOutcome,
    NewArticle, Stage, StageColumn, StageUpdate,
};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, title, url, source, published_date, origin_tag, snippet, \
    scraped_text, scrape_status, scraped_at, summary, summary_status, summarized_at, \
    pending_batch_handle, relevance_flag, filter_batch_handle, cluster_id, created_at";

const BATCH_COLUMNS: &str = "handle, stage, state, input_file_id, output_file_id, error_file_id, \
    total, completed, failed, description, submitted_at, updated_at";

/// Single-writer article store. Every write is its own transaction, so an
/// interrupted stage loses at most the record it was working on.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        let repo = Self { conn };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// Opens an existing store without write access (dashboard).
    pub async fn open_read_only(db_path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .await?;
        Ok(Self { conn })
    }

    // Schema evolution

    /// Adds `name` to `articles` unless it is already there. Returns whether
    /// the column was added.
    pub async fn ensure_column(&self, name: &str, column_type: ColumnType) -> Result<bool> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AppError::Config(format!("invalid column name: {name:?}")));
        }

        let name = name.to_string();
        let added = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM pragma_table_info('articles') WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(false);
                }
                conn.execute(
                    &format!("ALTER TABLE articles ADD COLUMN {} {}", name, column_type.sql()),
                    [],
                )?;
                Ok(true)
            })
            .await?;
        Ok(added)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for column in StageColumn::ALL {
            if self.ensure_column(column.name(), column.column_type()).await? {
                tracing::debug!(column = column.name(), "added column");
            }
        }
        Ok(())
    }

    // Article operations

    /// Inserts a new article. A URL already in the store is reported as
    /// `Duplicate` and the existing row is left untouched.
    pub async fn insert_article(&self, article: NewArticle) -> Result<InsertOutcome> {
        let outcome = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    r#"INSERT INTO articles (title, url, source, published_date, origin_tag, snippet)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        article.title,
                        article.url,
                        article.source,
                        article.published_date,
                        article.origin_tag,
                        article.snippet,
                    ],
                );
                match inserted {
                    Ok(_) => Ok(InsertOutcome::Added(conn.last_insert_rowid())),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
                    {
                        Ok(InsertOutcome::Duplicate)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(outcome)
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

    pub async fn all_articles(&self) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY published_date DESC, id"
        ))
        .await
    }

    /// Records eligible for `stage` right now, in insertion order.
    pub async fn select_pending(&self, stage: Stage) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE {} ORDER BY id",
            stage.pending_predicate()
        ))
        .await
    }

    pub async fn count_pending(&self, stage: Stage) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM articles WHERE {}",
            stage.pending_predicate()
        );
        let count = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await?;
        Ok(count)
    }

    /// Every record meeting the clustering prerequisites, clustered or not.
    pub async fn select_cluster_corpus(&self) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE {} ORDER BY id",
            Stage::Cluster.prerequisites()
        ))
        .await
    }

    pub async fn articles_in_cluster(&self, cluster_id: i64) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE cluster_id = ?1 ORDER BY published_date DESC, id"
        );
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![cluster_id], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn query_articles(&self, sql: String) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Writes `update` to record `id`. Returns false when no such record exists.
    pub async fn update_stage(&self, id: i64, update: &StageUpdate) -> Result<bool> {
        self.apply_update(id, update, None).await
    }

    /// Like [`update_stage`](Self::update_stage) but only while `stage`'s
    /// output is still missing, so re-applying a result is a no-op.
    pub async fn update_stage_if_pending(
        &self,
        id: i64,
        stage: Stage,
        update: &StageUpdate,
    ) -> Result<bool> {
        self.apply_update(id, update, Some(stage.output_missing()))
            .await
    }

    async fn apply_update(
        &self,
        id: i64,
        update: &StageUpdate,
        guard: Option<String>,
    ) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let assignments = update
            .fields
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column.name(), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "UPDATE articles SET {assignments} WHERE id = ?{}",
            update.fields.len() + 1
        );
        if let Some(guard) = guard {
            sql.push_str(" AND ");
            sql.push_str(&guard);
        }

        let mut values: Vec<Value> = update
            .fields
            .iter()
            .map(|(_, value)| to_sql_value(value))
            .collect();
        values.push(Value::Integer(id));

        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params_from_iter(values))?))
            .await?;
        Ok(changed > 0)
    }

    // Batch jobs

    /// Persists a freshly submitted job, its members, and the handle on every
    /// member record, atomically.
    pub async fn record_batch_submission(
        &self,
        stage: Stage,
        status: &BatchStatus,
        description: &str,
        member_ids: &[i64],
    ) -> Result<()> {
        let handle_column = stage.batch_handle_column().ok_or_else(|| {
            AppError::Batch(format!("stage {stage} does not run as a batch"))
        })?;
        let status = status.clone();
        let description = description.to_string();
        let member_ids = member_ids.to_vec();
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"INSERT INTO batch_jobs (handle, stage, state, input_file_id, output_file_id,
                                               error_file_id, total, completed, failed, description,
                                               submitted_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)"#,
                    params![
                        status.handle,
                        stage.as_str(),
                        status.state.as_str(),
                        status.input_file_id,
                        status.output_file_id,
                        status.error_file_id,
                        status.total,
                        status.completed,
                        status.failed,
                        description,
                        now,
                    ],
                )?;
                {
                    let mut member = tx.prepare(
                        "INSERT OR IGNORE INTO batch_job_members (handle, article_id) VALUES (?1, ?2)",
                    )?;
                    let mut mark = tx.prepare(&format!(
                        "UPDATE articles SET {} = ?1 WHERE id = ?2",
                        handle_column.name()
                    ))?;
                    for id in &member_ids {
                        member.execute(params![status.handle, id])?;
                        mark.execute(params![status.handle, id])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn update_batch_status(&self, status: &BatchStatus) -> Result<()> {
        let status = status.clone();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE batch_jobs
                       SET state = ?1, output_file_id = COALESCE(?2, output_file_id),
                           error_file_id = COALESCE(?3, error_file_id),
                           total = ?4, completed = ?5, failed = ?6, updated_at = ?7
                       WHERE handle = ?8 AND state != 'reconciled'"#,
                    params![
                        status.state.as_str(),
                        status.output_file_id,
                        status.error_file_id,
                        status.total,
                        status.completed,
                        status.failed,
                        now,
                        status.handle,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_batch_state(&self, handle: &str, state: BatchState) -> Result<()> {
        let handle = handle.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE batch_jobs SET state = ?1, updated_at = ?2 WHERE handle = ?3",
                    params![state.as_str(), now, handle],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_batch_job(&self, handle: &str) -> Result<Option<BatchJob>> {
        let handle = handle.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let job = conn
                    .query_row(
                        &format!("SELECT {BATCH_COLUMNS} FROM batch_jobs WHERE handle = ?1"),
                        params![handle],
                        batch_job_from_row,
                    )
                    .optional()?;
                match job {
                    Some(mut job) => {
                        job.member_ids = batch_members(conn, &job.handle)?;
                        Ok(Some(job))
                    }
                    None => Ok(None),
                }
            })
            .await?;
        Ok(job)
    }

    /// The most recently submitted job of `stage` that is not final yet.
    pub async fn latest_active_batch(&self, stage: Stage) -> Result<Option<BatchJob>> {
        let sql = format!(
            "SELECT handle FROM batch_jobs WHERE stage = ?1 AND state NOT IN ({}) \
             ORDER BY submitted_at DESC, rowid DESC LIMIT 1",
            BatchState::final_states_sql()
        );
        let handle: Option<String> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params![stage.as_str()], |row| row.get(0))
                    .optional()?)
            })
            .await?;

        match handle {
            Some(handle) => self.get_batch_job(&handle).await,
            None => Ok(None),
        }
    }

    /// Members of every job of `stage` that is not final, with their handle.
    pub async fn active_batch_members(&self, stage: Stage) -> Result<BTreeMap<i64, String>> {
        let sql = format!(
            "SELECT m.article_id, m.handle FROM batch_job_members m \
             JOIN batch_jobs j ON j.handle = m.handle \
             WHERE j.stage = ?1 AND j.state NOT IN ({})",
            BatchState::final_states_sql()
        );
        let members = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let members = stmt
                    .query_map(params![stage.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
                Ok(members)
            })
            .await?;
        Ok(members)
    }

    // Reporting

    pub async fn origin_counts(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts(
            "SELECT origin_tag, COUNT(*) FROM articles GROUP BY origin_tag ORDER BY COUNT(*) DESC",
        )
        .await
    }

    /// `(status, count)` for the stage's status column; `not attempted` for null.
    pub async fn status_breakdown(&self, stage: Stage) -> Result<Vec<(String, i64)>> {
        let sql = match stage.status_column() {
            Some(column) => format!(
                "SELECT COALESCE({0}, 'not attempted'), COUNT(*) FROM articles GROUP BY {0} ORDER BY COUNT(*) DESC",
                column.name()
            ),
            None => format!(
                "SELECT COALESCE(CAST({0} AS TEXT), 'not set'), COUNT(*) FROM articles GROUP BY {0} ORDER BY COUNT(*) DESC",
                stage.output_column().name()
            ),
        };
        self.grouped_counts(&sql).await
    }

    async fn grouped_counts(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let sql = sql.to_string();
        let counts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let counts = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    /// `(cluster_id, article count)` over clustered articles.
    pub async fn cluster_counts(&self) -> Result<Vec<(i64, i64)>> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT cluster_id, COUNT(*) FROM articles
                       WHERE cluster_id IS NOT NULL
                       GROUP BY cluster_id
                       ORDER BY cluster_id = -1, COUNT(*) DESC, cluster_id"#,
                )?;
                let counts = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(i) => Value::Integer(*i),
        FieldValue::Null => Value::Null,
    }
}

fn batch_members(conn: &rusqlite::Connection, handle: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT article_id FROM batch_job_members WHERE handle = ?1 ORDER BY article_id")?;
    let ids = stmt
        .query_map(params![handle], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        source: row.get(3)?,
        published_date: row.get(4)?,
        origin_tag: row.get(5)?,
        snippet: row.get(6)?,
        scraped_text: row.get(7)?,
        scrape_status: row.get(8)?,
        scraped_at: row.get(9)?,
        summary: row.get(10)?,
        summary_status: row.get(11)?,
        summarized_at: row.get(12)?,
        pending_batch_handle: row.get(13)?,
        relevance_flag: row.get::<_, Option<i64>>(14)?.map(|v| v != 0),
        filter_batch_handle: row.get(15)?,
        cluster_id: row.get(16)?,
        created_at: row
            .get::<_, Option<String>>(17)?
            .and_then(|s| parse_datetime(&s)),
    })
}

fn batch_job_from_row(row: &Row) -> rusqlite::Result<BatchJob> {
    let stage: String = row.get(1)?;
    let state: String = row.get(2)?;
    let invalid = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            msg.into(),
        )
    };
    Ok(BatchJob {
        handle: row.get(0)?,
        stage: stage.parse().map_err(|e| invalid(1, e))?,
        state: state.parse().map_err(|e| invalid(2, e))?,
        input_file_id: row.get(3)?,
        output_file_id: row.get(4)?,
        error_file_id: row.get(5)?,
        total: row.get(6)?,
        completed: row.get(7)?,
        failed: row.get(8)?,
        description: row.get(9)?,
        submitted_at: row
            .get::<_, String>(10)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(11)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        member_ids: Vec::new(),
    })
}
