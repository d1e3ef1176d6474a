/// Base tables. Stage output columns are not listed here: they are declared in
/// `StageColumn` and added on open by `Repository::ensure_schema`.
pub const SCHEMA: &str = r#"
-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL UNIQUE,
    source TEXT,
    published_date TEXT,
    origin_tag TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_articles_origin_tag ON articles(origin_tag);

-- batch_jobs table: one row per asynchronous job submitted to the provider
CREATE TABLE IF NOT EXISTS batch_jobs (
    handle TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    state TEXT NOT NULL,
    input_file_id TEXT,
    output_file_id TEXT,
    error_file_id TEXT,
    total INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    submitted_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_batch_jobs_stage_state ON batch_jobs(stage, state);

-- batch_job_members table: records carried by each job
CREATE TABLE IF NOT EXISTS batch_job_members (
    handle TEXT NOT NULL REFERENCES batch_jobs(handle) ON DELETE CASCADE,
    article_id INTEGER NOT NULL REFERENCES articles(id),
    PRIMARY KEY (handle, article_id)
);
"#;
