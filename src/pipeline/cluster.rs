use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Article, StageColumn, StageUpdate, OUTLIER_CLUSTER};

/// Environment variable pointing the clustering program at cached embeddings.
pub const EMBEDDINGS_ENV: &str = "RADAR_EMBEDDINGS";

/// One document handed to the clustering program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDocument {
    pub id: i64,
    pub text: String,
}

impl ClusterDocument {
    pub fn from_article(article: &Article) -> Self {
        Self {
            id: article.id,
            text: article.summary.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub cluster_id: i64,
}

/// Fits documents to clusters. Implementations return one assignment per
/// input document, matched by id.
#[async_trait]
pub trait Clusterer: Send + Sync {
    async fn assign(&self, documents: &[ClusterDocument]) -> Result<Vec<Assignment>>;
}

/// Runs an external program: documents as JSON lines on stdin, assignments
/// as JSON lines on stdout.
pub struct CommandClusterer {
    argv: Vec<String>,
    embeddings: Option<PathBuf>,
}

impl CommandClusterer {
    pub fn new(argv: Vec<String>, embeddings: Option<PathBuf>) -> Result<Self> {
        if argv.is_empty() {
            return Err(AppError::Config(
                "cluster_command is empty; set it in the config file or pass --assignments"
                    .to_string(),
            ));
        }
        Ok(Self { argv, embeddings })
    }
}

#[async_trait]
impl Clusterer for CommandClusterer {
    async fn assign(&self, documents: &[ClusterDocument]) -> Result<Vec<Assignment>> {
        let mut payload = String::new();
        for document in documents {
            payload.push_str(&serde_json::to_string(document)?);
            payload.push('\n');
        }

        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.embeddings {
            command.env(EMBEDDINGS_ENV, path);
        }

        tracing::info!(
            command = ?self.argv,
            documents = documents.len(),
            "running clustering program"
        );
        let mut child = command.spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Other(anyhow::anyhow!("clustering program has no stdin")))?;
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(payload.as_bytes()).await;
            drop(stdin);
            result
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => return Err(AppError::Other(anyhow::anyhow!("stdin writer failed: {e}"))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Other(anyhow::anyhow!(
                "clustering program exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_assignments(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Assignments computed earlier and saved as JSON lines.
pub struct AssignmentFile {
    path: PathBuf,
}

impl AssignmentFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Clusterer for AssignmentFile {
    async fn assign(&self, _documents: &[ClusterDocument]) -> Result<Vec<Assignment>> {
        if !self.path.exists() {
            return Err(AppError::Config(format!(
                "assignments file not found: {}",
                self.path.display()
            )));
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        parse_assignments(&content)
    }
}

pub fn parse_assignments(text: &str) -> Result<Vec<Assignment>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| Ok(serde_json::from_str::<Assignment>(line)?))
        .collect()
}

/// The output must cover exactly the input ids, once each, with cluster ids
/// no lower than the outlier id.
pub fn validate_assignments(
    documents: &[ClusterDocument],
    assignments: &[Assignment],
) -> Result<()> {
    let expected: BTreeSet<i64> = documents.iter().map(|d| d.id).collect();
    let mut seen = BTreeSet::new();

    for assignment in assignments {
        if assignment.cluster_id < OUTLIER_CLUSTER {
            return Err(AppError::ClusterMismatch(format!(
                "record {} has cluster id {}",
                assignment.id, assignment.cluster_id
            )));
        }
        if !expected.contains(&assignment.id) {
            return Err(AppError::ClusterMismatch(format!(
                "record {} was not in the input",
                assignment.id
            )));
        }
        if !seen.insert(assignment.id) {
            return Err(AppError::ClusterMismatch(format!(
                "record {} assigned more than once",
                assignment.id
            )));
        }
    }

    let missing: Vec<i64> = expected.difference(&seen).copied().collect();
    if !missing.is_empty() {
        return Err(AppError::ClusterMismatch(format!(
            "{} input records have no assignment (first: {})",
            missing.len(),
            missing[0]
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterReport {
    pub documents: usize,
    pub updated: usize,
    /// Article count per cluster id.
    pub sizes: BTreeMap<i64, usize>,
    pub assignments: Vec<Assignment>,
}

impl ClusterReport {
    pub fn outliers(&self) -> usize {
        self.sizes.get(&OUTLIER_CLUSTER).copied().unwrap_or(0)
    }

    pub fn topics(&self) -> usize {
        self.sizes.keys().filter(|id| **id != OUTLIER_CLUSTER).count()
    }
}

/// Hands the whole clustering corpus to `clusterer` and writes the cluster
/// id back to every record. Nothing is written unless the output validates.
pub async fn run_clustering(
    repository: &Repository,
    clusterer: &dyn Clusterer,
) -> Result<ClusterReport> {
    let corpus = repository.select_cluster_corpus().await?;
    let documents: Vec<ClusterDocument> =
        corpus.iter().map(ClusterDocument::from_article).collect();
    if documents.is_empty() {
        tracing::info!("no summarized, relevant articles to cluster");
        return Ok(ClusterReport::default());
    }

    let assignments = clusterer.assign(&documents).await?;
    validate_assignments(&documents, &assignments)?;

    let mut report = ClusterReport {
        documents: documents.len(),
        ..Default::default()
    };
    for assignment in &assignments {
        let update = StageUpdate::new().set(StageColumn::ClusterId, assignment.cluster_id);
        if repository.update_stage(assignment.id, &update).await? {
            report.updated += 1;
        }
        *report.sizes.entry(assignment.cluster_id).or_default() += 1;
    }

    tracing::info!(
        documents = report.documents,
        topics = report.topics(),
        outliers = report.outliers(),
        "clusters written"
    );
    report.assignments = assignments;
    Ok(report)
}

/// Writes assignments as JSON lines, the format [`AssignmentFile`] reads.
pub fn save_assignments(path: &Path, assignments: &[Assignment]) -> Result<()> {
    let mut out = String::new();
    for assignment in assignments {
        out.push_str(&serde_json::to_string(assignment)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::db::test_support::{long_text, seed, test_repo};
    use crate::models::Stage;

    struct FixedClusterer(Vec<Assignment>);

    #[async_trait]
    impl Clusterer for FixedClusterer {
        async fn assign(&self, _documents: &[ClusterDocument]) -> Result<Vec<Assignment>> {
            Ok(self.0.clone())
        }
    }

    async fn clusterable(repo: &Repository, n: usize) -> Vec<i64> {
        let ids = seed(repo, n).await;
        for id in &ids {
            let update = StageUpdate::success(Stage::Summarize, long_text(100), Utc::now());
            repo.update_stage(*id, &update).await.unwrap();
        }
        ids
    }

    fn docs(ids: &[i64]) -> Vec<ClusterDocument> {
        ids.iter()
            .map(|id| ClusterDocument {
                id: *id,
                text: "summary".into(),
            })
            .collect()
    }

    fn assign(id: i64, cluster_id: i64) -> Assignment {
        Assignment { id, cluster_id }
    }

    #[test]
    fn validation_rejects_mismatched_output() {
        let documents = docs(&[1, 2, 3]);

        tokio_test::assert_ok!(validate_assignments(
            &documents,
            &[assign(3, 0), assign(1, -1), assign(2, 4)]
        ));

        let missing = validate_assignments(&documents, &[assign(1, 0), assign(2, 0)]);
        assert!(matches!(missing, Err(AppError::ClusterMismatch(_))));

        let duplicate =
            validate_assignments(
                &documents,
                &[assign(1, 0), assign(1, 1), assign(2, 0), assign(3, 0)],
            );
        assert!(matches!(duplicate, Err(AppError::ClusterMismatch(_))));

        let stranger =
            validate_assignments(&documents, &[assign(1, 0), assign(2, 0), assign(9, 0)]);
        assert!(matches!(stranger, Err(AppError::ClusterMismatch(_))));

        let below_outlier =
            validate_assignments(&documents, &[assign(1, -2), assign(2, 0), assign(3, 0)]);
        assert!(matches!(below_outlier, Err(AppError::ClusterMismatch(_))));
    }

    #[tokio::test]
    async fn assignments_are_written_back_by_id() {
        let (repo, _dir) = test_repo().await;
        let ids = clusterable(&repo, 3).await;

        // Out of order on purpose: matching is by id, not position.
        let clusterer = FixedClusterer(vec![
            assign(ids[2], 1),
            assign(ids[0], 0),
            assign(ids[1], OUTLIER_CLUSTER),
        ]);
        let report = run_clustering(&repo, &clusterer).await.unwrap();
        assert_eq!(report.documents, 3);
        assert_eq!(report.updated, 3);
        assert_eq!(report.topics(), 2);
        assert_eq!(report.outliers(), 1);

        let cluster_of = |article: Option<Article>| article.unwrap().cluster_id;
        assert_eq!(cluster_of(repo.get_article(ids[0]).await.unwrap()), Some(0));
        assert_eq!(cluster_of(repo.get_article(ids[1]).await.unwrap()), Some(OUTLIER_CLUSTER));
        assert_eq!(cluster_of(repo.get_article(ids[2]).await.unwrap()), Some(1));
        assert_eq!(repo.count_pending(Stage::Cluster).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatched_output_writes_nothing() {
        let (repo, _dir) = test_repo().await;
        let ids = clusterable(&repo, 3).await;

        let clusterer = FixedClusterer(vec![assign(ids[0], 0), assign(ids[1], 0)]);
        let err = run_clustering(&repo, &clusterer).await.unwrap_err();
        assert!(matches!(err, AppError::ClusterMismatch(_)));

        for id in ids {
            assert_eq!(repo.get_article(id).await.unwrap().unwrap().cluster_id, None);
        }
    }

    #[tokio::test]
    async fn assignment_file_round_trips() {
        let (repo, dir) = test_repo().await;
        let ids = clusterable(&repo, 2).await;

        let path = dir.path().join("assignments.jsonl");
        save_assignments(&path, &[assign(ids[0], 3), assign(ids[1], 3)]).unwrap();

        let report = run_clustering(&repo, &AssignmentFile::new(&path)).await.unwrap();
        assert_eq!(report.sizes.get(&3), Some(&2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_clusterer_speaks_json_lines() {
        let script = r#"while IFS= read -r line; do
            id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
            printf '{"id":%s,"cluster_id":0}\n' "$id"
        done"#;
        let clusterer = CommandClusterer::new(
            vec!["sh".into(), "-c".into(), script.into()],
            None,
        )
        .unwrap();

        let documents = docs(&[4, 7]);
        let assignments = clusterer.assign(&documents).await.unwrap();
        assert_eq!(assignments, vec![assign(4, 0), assign(7, 0)]);
    }
}
