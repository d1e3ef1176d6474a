use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::ai::BatchBackend;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{
    BatchJob, BatchRequestLine, BatchResultLine, BatchState, BatchStatus, ItemOutcome, Stage,
};

use super::policies::StagePolicy;

const MISSING_RESULT: &str = "missing from batch results";

/// Side files of one batch stage, all under the data directory.
#[derive(Debug, Clone)]
pub struct BatchFiles {
    pub requests: PathBuf,
    /// Where `requests` is moved once its job is recorded.
    pub submitted: PathBuf,
    pub receipt: PathBuf,
    pub results: PathBuf,
}

impl BatchFiles {
    pub fn new(data_dir: &Path, stage: Stage) -> Self {
        Self {
            requests: data_dir.join(format!("{stage}_batch_requests.jsonl")),
            submitted: data_dir.join(format!("{stage}_batch_requests.submitted.jsonl")),
            receipt: data_dir.join(format!("{stage}_batch_info.txt")),
            results: data_dir.join(format!("{stage}_batch_results.jsonl")),
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Running(BatchStatus),
    Reconciled(ReconcileReport),
    /// Failed, cancelled or expired. No record was touched.
    Failed(BatchStatus),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub entries: usize,
    pub succeeded: usize,
    pub item_errors: usize,
    /// Members with no entry in the bundle.
    pub missing: usize,
    /// Writes that changed a record.
    pub applied: usize,
    /// Writes skipped because the record already had its output.
    pub unchanged: usize,
    pub unknown: usize,
    pub malformed: usize,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries: {} succeeded, {} item errors, {} missing, {} applied, {} already done, {} unknown, {} malformed",
            self.entries,
            self.succeeded,
            self.item_errors,
            self.missing,
            self.applied,
            self.unchanged,
            self.unknown,
            self.malformed
        )
    }
}

/// Runs an LLM stage as a provider-side bulk job across several invocations:
/// prepare, submit, then poll until the results can be reconciled.
pub struct BatchStageRunner<'a> {
    repository: &'a Repository,
    backend: &'a dyn BatchBackend,
    policy: &'a dyn StagePolicy,
    files: BatchFiles,
    poll_interval: Duration,
}

impl<'a> BatchStageRunner<'a> {
    pub fn new(
        repository: &'a Repository,
        backend: &'a dyn BatchBackend,
        policy: &'a dyn StagePolicy,
        data_dir: &Path,
        poll_interval: Duration,
    ) -> Self {
        Self {
            repository,
            backend,
            policy,
            files: BatchFiles::new(data_dir, policy.stage()),
            poll_interval,
        }
    }

    pub fn files(&self) -> &BatchFiles {
        &self.files
    }

    fn stage(&self) -> Stage {
        self.policy.stage()
    }

    /// Writes one request line per pending record. Returns how many.
    pub async fn prepare(&self, limit: Option<usize>) -> Result<usize> {
        let stage = self.stage();
        let mut pending = self.repository.select_pending(stage).await?;
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        if pending.is_empty() {
            tracing::info!(%stage, "nothing pending for batch");
            return Ok(0);
        }

        let mut jsonl = String::new();
        for article in &pending {
            let line = BatchRequestLine::chat(article.id, self.policy.request(article));
            jsonl.push_str(&serde_json::to_string(&line)?);
            jsonl.push('\n');
        }

        if let Some(parent) = self.files.requests.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.files.requests, jsonl)?;

        tracing::info!(
            %stage,
            requests = pending.len(),
            path = %self.files.requests.display(),
            "prepared batch requests"
        );
        Ok(pending.len())
    }

    /// Uploads the prepared requests and records the job, its members and
    /// the handle on every member record.
    pub async fn submit(&self, description: &str) -> Result<BatchJob> {
        let stage = self.stage();
        if !self.files.requests.exists() {
            return Err(AppError::Config(format!(
                "no prepared requests at {}; run `batch prepare --stage {stage}` first",
                self.files.requests.display()
            )));
        }

        let contents = std::fs::read(&self.files.requests)?;
        let member_ids = request_ids(&contents)?;
        if member_ids.is_empty() {
            return Err(AppError::Batch(format!(
                "{} holds no requests",
                self.files.requests.display()
            )));
        }

        self.check_still_pending(&member_ids).await?;

        let file_name = self
            .files
            .requests
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "batch_requests.jsonl".to_string());
        let input_file_id = self.backend.upload(&file_name, contents).await?;
        let status = self.backend.create(&input_file_id, description).await?;

        self.repository
            .record_batch_submission(stage, &status, description, &member_ids)
            .await?;
        self.write_receipt(&status, member_ids.len())?;

        // A recorded submission consumes the request file; a rerun of
        // `submit` then finds nothing to upload.
        if self.files.submitted.exists() {
            std::fs::remove_file(&self.files.submitted)?;
        }
        std::fs::rename(&self.files.requests, &self.files.submitted)?;

        tracing::info!(
            %stage,
            handle = %status.handle,
            members = member_ids.len(),
            state = %status.state,
            "batch submitted"
        );

        self.repository
            .get_batch_job(&status.handle)
            .await?
            .ok_or_else(|| AppError::Batch(format!("job {} was not recorded", status.handle)))
    }

    /// Refuses prepared ids that sit in any unfinished job of the stage or
    /// already have their output.
    async fn check_still_pending(&self, member_ids: &[i64]) -> Result<()> {
        let stage = self.stage();

        let in_flight = self.repository.active_batch_members(stage).await?;
        if let Some((id, handle)) = member_ids
            .iter()
            .find_map(|id| in_flight.get(id).map(|handle| (*id, handle)))
        {
            return Err(AppError::Batch(format!(
                "record {id} is already in flight as {handle}"
            )));
        }

        let pending: BTreeSet<i64> = self
            .repository
            .select_pending(stage)
            .await?
            .iter()
            .map(|article| article.id)
            .collect();
        let stale: Vec<i64> = member_ids
            .iter()
            .copied()
            .filter(|id| !pending.contains(id))
            .collect();
        if let Some(first) = stale.first() {
            return Err(AppError::Batch(format!(
                "{} prepared requests are no longer pending (first: {first}); \
                 run `batch prepare --stage {stage}` again",
                stale.len()
            )));
        }
        Ok(())
    }

    /// Polls the job once. A finished job is downloaded and reconciled.
    pub async fn check(&self, handle: Option<&str>) -> Result<PollOutcome> {
        let handle = self.resolve_handle(handle, false).await?;
        self.poll(&handle).await
    }

    /// Polls until the job is terminal. Ctrl-C stops polling; the job and
    /// its members are left as they are for a later resume.
    pub async fn wait(&self, handle: Option<&str>) -> Result<PollOutcome> {
        let handle = self.resolve_handle(handle, false).await?;
        loop {
            match self.poll(&handle).await? {
                PollOutcome::Running(status) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!(
                                handle = %handle,
                                "polling interrupted; the job keeps running"
                            );
                            return Ok(PollOutcome::Running(status));
                        }
                    }
                }
                done => return Ok(done),
            }
        }
    }

    async fn poll(&self, handle: &str) -> Result<PollOutcome> {
        let stage = self.stage();
        let status = self.backend.retrieve(handle).await?;
        self.repository.update_batch_status(&status).await?;

        if status.state.is_running() {
            tracing::info!(
                %stage,
                handle,
                state = %status.state,
                completed = status.completed,
                failed = status.failed,
                total = status.total,
                "batch still running"
            );
            return Ok(PollOutcome::Running(status));
        }

        if status.state.is_failure() {
            tracing::warn!(
                %stage,
                handle,
                state = %status.state,
                errors = status.errors.as_deref().unwrap_or("none reported"),
                "batch ended without results; members released for resubmission"
            );
            return Ok(PollOutcome::Failed(status));
        }

        let bundle = self.fetch_bundle(&status).await?;
        let report = self.reconcile_bundle(handle, &bundle).await?;
        Ok(PollOutcome::Reconciled(report))
    }

    /// Downloads output and error files into one bundle and saves it.
    async fn fetch_bundle(&self, status: &BatchStatus) -> Result<String> {
        let mut bundle = String::new();
        for file_id in [&status.output_file_id, &status.error_file_id]
            .into_iter()
            .flatten()
        {
            let contents = self.backend.download(file_id).await?;
            bundle.push_str(&contents);
            if !bundle.is_empty() && !bundle.ends_with('\n') {
                bundle.push('\n');
            }
        }

        if let Some(parent) = self.files.results.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.files.results, &bundle)?;
        tracing::info!(path = %self.files.results.display(), "saved batch results");
        Ok(bundle)
    }

    /// Re-applies a saved result bundle.
    pub async fn reconcile_file(
        &self,
        path: &Path,
        handle: Option<&str>,
    ) -> Result<ReconcileReport> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "result bundle not found: {}",
                path.display()
            )));
        }
        let handle = self.resolve_handle(handle, true).await?;
        let bundle = std::fs::read_to_string(path)?;
        self.reconcile_bundle(&handle, &bundle).await
    }

    /// Applies every bundle entry to its record, then gives members without
    /// an entry the stage's error fallback. Writes only fill missing outputs,
    /// so running this twice leaves the store as running it once.
    pub async fn reconcile_bundle(&self, handle: &str, bundle: &str) -> Result<ReconcileReport> {
        let stage = self.stage();
        let members: BTreeSet<i64> = self
            .repository
            .get_batch_job(handle)
            .await?
            .map(|job| job.member_ids.into_iter().collect())
            .unwrap_or_default();
        if members.is_empty() {
            tracing::warn!(handle, "job has no recorded members; applying bundle as is");
        }

        let now = Utc::now();
        let mut seen = BTreeSet::new();
        let mut report = ReconcileReport::default();

        for line in bundle.lines().filter(|l| !l.trim().is_empty()) {
            report.entries += 1;

            let entry: BatchResultLine = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(handle, error = %e, "malformed result line");
                    report.malformed += 1;
                    continue;
                }
            };

            let Some(article_id) = entry.article_id() else {
                tracing::warn!(handle, custom_id = %entry.custom_id, "unparseable correlation id");
                report.unknown += 1;
                continue;
            };
            if !members.is_empty() && !members.contains(&article_id) {
                tracing::warn!(handle, article_id, "result for a record outside this job");
                report.unknown += 1;
                continue;
            }
            if !seen.insert(article_id) {
                continue;
            }

            let update = match entry.outcome() {
                ItemOutcome::Content(content) => {
                    let update = self.policy.on_content(&content, now);
                    if update.writes(stage.output_column()) {
                        report.succeeded += 1;
                    } else {
                        tracing::warn!(handle, article_id, "batch item had no usable output");
                        report.item_errors += 1;
                    }
                    update
                }
                ItemOutcome::Error(message) => {
                    tracing::warn!(handle, article_id, %message, "batch item failed");
                    report.item_errors += 1;
                    self.policy.on_error(&message, now)
                }
            };

            if self
                .repository
                .update_stage_if_pending(article_id, stage, &update)
                .await?
            {
                report.applied += 1;
            } else {
                report.unchanged += 1;
            }
        }

        for article_id in members.difference(&seen) {
            report.missing += 1;
            let update = self.policy.on_error(MISSING_RESULT, now);
            if self
                .repository
                .update_stage_if_pending(*article_id, stage, &update)
                .await?
            {
                report.applied += 1;
            } else {
                report.unchanged += 1;
            }
        }

        if !members.is_empty() {
            self.repository
                .set_batch_state(handle, BatchState::Reconciled)
                .await?;
        }

        tracing::info!(%stage, handle, %report, "batch reconciled");
        Ok(report)
    }

    /// Explicit handle, else the stage's active job, else the receipt file.
    /// With `include_final`, the receipt's job is used even when finished.
    async fn resolve_handle(&self, explicit: Option<&str>, include_final: bool) -> Result<String> {
        if let Some(handle) = explicit {
            return Ok(handle.to_string());
        }
        let stage = self.stage();
        if let Some(job) = self.repository.latest_active_batch(stage).await? {
            return Ok(job.handle);
        }
        if let Some(handle) = read_receipt(&self.files.receipt)? {
            let finished = self
                .repository
                .get_batch_job(&handle)
                .await?
                .map(|job| job.state.is_final())
                .unwrap_or(false);
            if include_final || !finished {
                return Ok(handle);
            }
        }
        Err(AppError::Batch(format!("no active {stage} batch job")))
    }

    fn write_receipt(&self, status: &BatchStatus, requests: usize) -> Result<()> {
        let receipt = format!(
            "handle: {}\nstage: {}\nstate: {}\ninput_file_id: {}\nrequests: {}\nsubmitted_at: {}\n",
            status.handle,
            self.stage(),
            status.state,
            status.input_file_id.as_deref().unwrap_or(""),
            requests,
            Utc::now().to_rfc3339()
        );
        if let Some(parent) = self.files.receipt.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.files.receipt, receipt)?;
        Ok(())
    }
}

/// Correlation ids of a request file, in file order.
fn request_ids(contents: &[u8]) -> Result<Vec<i64>> {
    let text = std::str::from_utf8(contents)
        .map_err(|e| AppError::Batch(format!("request file is not UTF-8: {e}")))?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let request: BatchRequestLine = serde_json::from_str(line)?;
            request
                .custom_id
                .parse::<i64>()
                .map_err(|_| AppError::Batch(format!("bad custom_id {:?}", request.custom_id)))
        })
        .collect()
}

fn read_receipt(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix("handle:"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty()))
}
