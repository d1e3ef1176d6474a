//! Stage runners over the article store.

mod batch;
mod cluster;
mod policies;
mod progress;
mod runner;

pub use batch::{BatchStageRunner, PollOutcome, ReconcileReport};
pub use cluster::{
    run_clustering, save_assignments, AssignmentFile, ClusterDocument, ClusterReport, Clusterer,
    CommandClusterer,
};
pub use policies::{RelevancePolicy, StagePolicy, SummarizePolicy};
pub use progress::{ProgressSink, StageCounters, TracingProgress};
pub use runner::{RunSettings, ScrapeOperation, StageRunner, SummarizeOperation};
