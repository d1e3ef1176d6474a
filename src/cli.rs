//! Command-line interface for `radar`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::models::Stage;

#[derive(Parser, Debug)]
#[command(author, version, about = "Incremental article pipeline: collect, scrape, summarize, filter, cluster")]
pub struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(short, long, global = true, env = "RADAR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the configured search query and import the results
    Search {
        #[arg(long, value_enum, default_value_t = SearchMode::Both)]
        mode: SearchMode,
    },

    /// Import a Media Cloud CSV export
    ImportCsv { file: PathBuf },

    /// Import one or more RSS/Atom feeds
    ImportRss {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Fetch full text for articles that have none yet
    Scrape {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarize scraped articles one request at a time
    Summarize {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run summarization or relevance filtering as a provider batch job
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },

    /// Embed the clustering corpus (cached by corpus size)
    Embed,

    /// Hand the corpus to the clustering program and store cluster ids
    Cluster {
        /// Read assignments from this JSONL file instead of running the program
        #[arg(long)]
        assignments: Option<PathBuf>,
    },

    /// Name each cluster and write topic_info.json
    Label {
        /// JSON map of cluster id to keywords
        #[arg(long)]
        keywords: Option<PathBuf>,
    },

    /// Per-origin counts and per-stage status breakdown
    Status,

    /// Write every article and stage column to a CSV file
    Export { file: PathBuf },

    /// Browse clustered articles (read-only)
    Dashboard,
}

#[derive(Subcommand, Debug)]
pub enum BatchAction {
    /// Write the request file for every pending article
    Prepare {
        #[arg(long, value_enum)]
        stage: BatchStage,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Upload the prepared requests and start the job
    Submit {
        #[arg(long, value_enum)]
        stage: BatchStage,
        #[arg(long)]
        description: Option<String>,
    },
    /// Poll the job once; reconcile if it has finished
    Check {
        #[arg(long, value_enum)]
        stage: BatchStage,
        #[arg(long)]
        handle: Option<String>,
    },
    /// Poll until the job finishes (Ctrl-C stops polling, not the job)
    Wait {
        #[arg(long, value_enum)]
        stage: BatchStage,
        #[arg(long)]
        handle: Option<String>,
    },
    /// Re-apply a saved result bundle
    Reconcile {
        #[arg(long, value_enum)]
        stage: BatchStage,
        #[arg(long)]
        handle: Option<String>,
        /// Defaults to the stage's saved results file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

impl BatchAction {
    pub fn stage(&self) -> BatchStage {
        match self {
            BatchAction::Prepare { stage, .. }
            | BatchAction::Submit { stage, .. }
            | BatchAction::Check { stage, .. }
            | BatchAction::Wait { stage, .. }
            | BatchAction::Reconcile { stage, .. } => *stage,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStage {
    Summarize,
    Filter,
}

impl From<BatchStage> for Stage {
    fn from(stage: BatchStage) -> Self {
        match stage {
            BatchStage::Summarize => Stage::Summarize,
            BatchStage::Filter => Stage::Filter,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    News,
    All,
    Both,
}

impl Command {
    /// The dashboard owns the terminal, so it logs quietly.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Command::Dashboard)
    }
}
