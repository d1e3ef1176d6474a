use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::ai::ChatModel;
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{
    Article, Stage, StageUpdate, MIN_SCRAPED_CHARS, STATUS_INVALID_URL, STATUS_NO_CONTENT,
};
use crate::services::{FetchedPage, PageFetcher};

use super::policies::StagePolicy;
use super::progress::{ProgressSink, StageCounters};

/// What a per-record operation decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(StageUpdate),
    /// Permanent rejection recorded as this status; output stays null.
    Rejected(&'static str),
    /// The call returned nothing usable; the update carries the error status.
    Failed(StageUpdate),
}

/// One external call applied to a single record.
#[async_trait]
pub trait StageOperation: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(&self, article: &Article) -> Result<Outcome>;
}

pub struct ScrapeOperation<F> {
    fetcher: F,
}

impl<F: PageFetcher> ScrapeOperation<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: PageFetcher> StageOperation for ScrapeOperation<F> {
    fn stage(&self) -> Stage {
        Stage::Scrape
    }

    async fn process(&self, article: &Article) -> Result<Outcome> {
        match self.fetcher.fetch_text(&article.url).await? {
            FetchedPage::InvalidUrl => Ok(Outcome::Rejected(STATUS_INVALID_URL)),
            FetchedPage::Text(text) if text.chars().count() <= MIN_SCRAPED_CHARS => {
                Ok(Outcome::Rejected(STATUS_NO_CONTENT))
            }
            FetchedPage::Text(text) => Ok(Outcome::Accepted(StageUpdate::success(
                Stage::Scrape,
                text,
                Utc::now(),
            ))),
        }
    }
}

/// Interactive summarization: one chat call per record.
pub struct SummarizeOperation<'a, P> {
    chat: &'a dyn ChatModel,
    policy: P,
}

impl<'a, P: StagePolicy> SummarizeOperation<'a, P> {
    pub fn new(chat: &'a dyn ChatModel, policy: P) -> Self {
        Self { chat, policy }
    }
}

#[async_trait]
impl<'a, P: StagePolicy> StageOperation for SummarizeOperation<'a, P> {
    fn stage(&self) -> Stage {
        self.policy.stage()
    }

    async fn process(&self, article: &Article) -> Result<Outcome> {
        let stage = self.policy.stage();
        let content = self.chat.complete(self.policy.request(article)).await?;
        let update = self.policy.on_content(&content, Utc::now());
        if update.writes(stage.output_column()) {
            Ok(Outcome::Accepted(update))
        } else {
            Ok(Outcome::Failed(update))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub delay: Duration,
    pub rate_limit_pause: Duration,
    pub attempt_timeout: Duration,
    pub progress_every: usize,
    /// Stop after this many records; the rest stay pending.
    pub limit: Option<usize>,
}

impl RunSettings {
    pub fn from_config(config: &Config, limit: Option<usize>) -> Self {
        Self {
            delay: config.request_delay(),
            rate_limit_pause: config.rate_limit_pause(),
            attempt_timeout: config.attempt_timeout(),
            progress_every: config.progress_every,
            limit,
        }
    }
}

/// Drives a [`StageOperation`] over the pending set, one record at a time in
/// insertion order, persisting each result before moving on.
pub struct StageRunner<'a> {
    repository: &'a Repository,
    settings: RunSettings,
    progress: &'a dyn ProgressSink,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        repository: &'a Repository,
        settings: RunSettings,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            repository,
            settings,
            progress,
        }
    }

    pub async fn run(&self, operation: &dyn StageOperation) -> Result<StageCounters> {
        let stage = operation.stage();
        let mut pending = self.repository.select_pending(stage).await?;
        if let Some(limit) = self.settings.limit {
            pending.truncate(limit);
        }

        let mut counters = StageCounters {
            total: pending.len(),
            ..Default::default()
        };
        tracing::info!(%stage, pending = counters.total, "starting stage");

        for (i, article) in pending.iter().enumerate() {
            if i > 0 && !self.settings.delay.is_zero() {
                tokio::time::sleep(self.settings.delay).await;
            }

            let attempt =
                tokio::time::timeout(self.settings.attempt_timeout, operation.process(article))
                    .await
                    .unwrap_or_else(|_| {
                        Err(AppError::Timeout(self.settings.attempt_timeout.as_secs()))
                    });

            let mut rate_limited = false;
            match attempt {
                Ok(Outcome::Accepted(update)) => {
                    self.repository.update_stage(article.id, &update).await?;
                    counters.succeeded += 1;
                    tracing::debug!(article_id = article.id, %stage, "stage succeeded");
                }
                Ok(Outcome::Rejected(status)) => {
                    self.repository
                        .update_stage(article.id, &StageUpdate::status(stage, status))
                        .await?;
                    counters.rejected += 1;
                    tracing::debug!(article_id = article.id, %stage, status, "record rejected");
                }
                Ok(Outcome::Failed(update)) => {
                    self.repository.update_stage(article.id, &update).await?;
                    counters.failed += 1;
                    tracing::warn!(article_id = article.id, %stage, "no usable output");
                }
                Err(e) => {
                    self.repository
                        .update_stage(article.id, &StageUpdate::failure(stage, &e.to_string()))
                        .await?;
                    counters.failed += 1;
                    rate_limited = e.is_rate_limit();
                    tracing::warn!(article_id = article.id, %stage, error = %e, "stage failed");
                }
            }
            counters.processed += 1;

            if self.settings.progress_every > 0
                && counters.processed % self.settings.progress_every == 0
            {
                self.progress.checkpoint(stage, &counters);
            }

            if rate_limited && counters.remaining() > 0 {
                tracing::warn!(
                    pause_secs = self.settings.rate_limit_pause.as_secs(),
                    "rate limited, pausing"
                );
                tokio::time::sleep(self.settings.rate_limit_pause).await;
            }
        }

        self.progress.checkpoint(stage, &counters);
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::db::test_support::{long_text, new_article, seed, test_repo};
    use crate::models::{ChatRequest, InsertOutcome, STATUS_SUCCESS};
    use crate::pipeline::policies::SummarizePolicy;

    #[derive(Default)]
    struct RecordingProgress {
        snapshots: Mutex<Vec<StageCounters>>,
    }

    impl ProgressSink for RecordingProgress {
        fn checkpoint(&self, _stage: Stage, counters: &StageCounters) {
            self.snapshots.lock().unwrap().push(*counters);
        }
    }

    fn settings(limit: Option<usize>) -> RunSettings {
        RunSettings {
            delay: Duration::ZERO,
            rate_limit_pause: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
            progress_every: 2,
            limit,
        }
    }

    async fn scrape_status(repo: &Repository, id: i64) -> String {
        repo.get_article(id)
            .await
            .unwrap()
            .unwrap()
            .scrape_status
            .unwrap_or_default()
    }

    /// Serves pages by URL suffix and remembers which URLs were requested.
    #[derive(Default)]
    struct FakePages {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageFetcher for FakePages {
        async fn fetch_text(&self, article_url: &str) -> Result<FetchedPage> {
            self.seen.lock().unwrap().push(article_url.to_string());
            if article_url.ends_with("/bad") {
                return Ok(FetchedPage::InvalidUrl);
            }
            if article_url.ends_with("/short") {
                return Ok(FetchedPage::Text("too short".into()));
            }
            if article_url.ends_with("/down") {
                return Err(AppError::Other(anyhow::anyhow!("connection reset")));
            }
            Ok(FetchedPage::Text(long_text(400)))
        }
    }

    #[tokio::test]
    async fn interrupted_run_resumes_with_the_rest() {
        let (repo, _dir) = test_repo().await;
        let ids = seed(&repo, 5).await;
        let progress = RecordingProgress::default();

        let first = ScrapeOperation::new(FakePages::default());
        let counters = StageRunner::new(&repo, settings(Some(2)), &progress)
            .run(&first)
            .await
            .unwrap();
        assert_eq!(counters.succeeded, 2);
        assert_eq!(repo.count_pending(Stage::Scrape).await.unwrap(), 3);

        let second = ScrapeOperation::new(FakePages::default());
        let counters = StageRunner::new(&repo, settings(None), &progress)
            .run(&second)
            .await
            .unwrap();
        assert_eq!(counters.total, 3);
        assert_eq!(counters.succeeded, 3);

        let seen = second.fetcher.seen.lock().unwrap().clone();
        let expected: Vec<String> = (2..5).map(|i| format!("https://example.com/{i}")).collect();
        assert_eq!(seen, expected);

        for id in ids {
            let article = repo.get_article(id).await.unwrap().unwrap();
            assert_eq!(article.scrape_status.as_deref(), Some(STATUS_SUCCESS));
            assert!(article.scraped_at.is_some());
        }
        assert_eq!(repo.count_pending(Stage::Scrape).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_never_abort() {
        let (repo, _dir) = test_repo().await;
        let urls = [
            "https://news.example/ok",
            "https://news.example/bad",
            "https://news.example/short",
            "https://news.example/down",
        ];
        let mut ids = Vec::new();
        for url in urls {
            match repo.insert_article(new_article(url)).await.unwrap() {
                InsertOutcome::Added(id) => ids.push(id),
                InsertOutcome::Duplicate => unreachable!(),
            }
        }

        let progress = RecordingProgress::default();
        let counters = StageRunner::new(&repo, settings(None), &progress)
            .run(&ScrapeOperation::new(FakePages::default()))
            .await
            .unwrap();

        assert_eq!(
            (counters.succeeded, counters.rejected, counters.failed),
            (1, 2, 1)
        );

        assert_eq!(scrape_status(&repo, ids[1]).await, STATUS_INVALID_URL);
        assert_eq!(scrape_status(&repo, ids[2]).await, STATUS_NO_CONTENT);
        assert_eq!(scrape_status(&repo, ids[3]).await, "error: connection reset");

        // Only the transient failure comes back.
        let pending = repo.select_pending(Stage::Scrape).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[3]);

        // Checkpoint after 2 and 4 records, plus the final one.
        let snapshots = progress.snapshots.lock().unwrap().clone();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].processed, 2);
        assert_eq!(snapshots.last().unwrap().processed, 4);
    }

    struct FlakyChat;

    #[async_trait]
    impl ChatModel for FlakyChat {
        async fn complete(&self, request: ChatRequest) -> Result<String> {
            if request.messages[1].content.contains("example.com/1") {
                return Err(AppError::RateLimited {
                    provider: "OpenAI",
                    message: "rate_limit_exceeded".into(),
                });
            }
            Ok("Discoverability summary.".to_string())
        }
    }

    #[tokio::test]
    async fn summarize_records_rate_limit_as_error() {
        let (repo, _dir) = test_repo().await;
        let ids = seed(&repo, 3).await;
        let now = Utc::now();
        for id in &ids {
            repo.update_stage(*id, &StageUpdate::success(Stage::Scrape, long_text(300), now))
                .await
                .unwrap();
        }

        let progress = RecordingProgress::default();
        let op = SummarizeOperation::new(&FlakyChat, SummarizePolicy::interactive("fake"));
        let counters = StageRunner::new(&repo, settings(None), &progress)
            .run(&op)
            .await
            .unwrap();
        assert_eq!((counters.succeeded, counters.failed), (2, 1));

        let limited = repo.get_article(ids[1]).await.unwrap().unwrap();
        assert!(limited.summary.is_none());
        assert!(limited
            .summary_status
            .unwrap()
            .starts_with("error: OpenAI rate limit"));

        let done = repo.get_article(ids[0]).await.unwrap().unwrap();
        assert_eq!(done.summary.as_deref(), Some("Discoverability summary."));

        let pending = repo.select_pending(Stage::Summarize).await.unwrap();
        assert_eq!(pending.iter().map(|a| a.id).collect::<Vec<_>>(), vec![ids[1]]);
    }

    struct BlankChat;

    #[async_trait]
    impl ChatModel for BlankChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String> {
            Ok("   \n".to_string())
        }
    }

    #[tokio::test]
    async fn blank_summary_counts_as_failed() {
        let (repo, _dir) = test_repo().await;
        let ids = seed(&repo, 1).await;
        let now = Utc::now();
        repo.update_stage(ids[0], &StageUpdate::success(Stage::Scrape, long_text(300), now))
            .await
            .unwrap();

        let progress = RecordingProgress::default();
        let op = SummarizeOperation::new(&BlankChat, SummarizePolicy::interactive("fake"));
        let counters = StageRunner::new(&repo, settings(None), &progress)
            .run(&op)
            .await
            .unwrap();
        assert_eq!((counters.succeeded, counters.failed), (0, 1));

        let article = repo.get_article(ids[0]).await.unwrap().unwrap();
        assert!(article.summary.is_none());
        assert_eq!(article.summary_status.as_deref(), Some("error: empty summary"));
        assert_eq!(repo.count_pending(Stage::Summarize).await.unwrap(), 1);
    }

    struct StuckOperation;

    #[async_trait]
    impl StageOperation for StuckOperation {
        fn stage(&self) -> Stage {
            Stage::Scrape
        }

        async fn process(&self, _article: &Article) -> Result<Outcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Outcome::Rejected(STATUS_NO_CONTENT))
        }
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let (repo, _dir) = test_repo().await;
        let ids = seed(&repo, 1).await;
        let progress = RecordingProgress::default();

        let mut run = settings(None);
        run.attempt_timeout = Duration::from_millis(20);
        let counters = StageRunner::new(&repo, run, &progress)
            .run(&StuckOperation)
            .await
            .unwrap();
        assert_eq!(counters.failed, 1);

        let article = repo.get_article(ids[0]).await.unwrap().unwrap();
        assert!(article.scrape_status.unwrap().starts_with("error: timed out"));
    }
}
