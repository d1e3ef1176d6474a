use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use crossterm::event::KeyEventKind;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use tracing_subscriber::EnvFilter;

mod ai;
mod app;
mod cli;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod pipeline;
mod services;
mod tui;

use ai::{
    ensure_embeddings, load_keywords, ChatClient, EmbeddingCache, KeywordMap, OpenAiBatchClient,
    TopicLabeler, VoyageEmbedder,
};
use app::{App, TOPIC_INFO_FILE};
use cli::{BatchAction, Cli, Command, SearchMode};
use config::Config;
use db::Repository;
use error::{AppError, Result};
use feed::{media_cloud, FeedFetcher, ImportReport, Importer};
use models::{save_topics, Stage};
use pipeline::{
    run_clustering, save_assignments, AssignmentFile, BatchStageRunner, ClusterDocument, Clusterer,
    CommandClusterer, PollOutcome, RelevancePolicy, RunSettings, ScrapeOperation, StagePolicy,
    StageRunner, SummarizeOperation, SummarizePolicy, TracingProgress,
};
use services::{search_all, ContentFetcher, SearchClient, SearchKind};
use tui::{draw, handle_key_event};

const EMBEDDINGS_FILE: &str = "embeddings.json";
const ASSIGNMENTS_FILE: &str = "cluster_assignments.jsonl";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Pipeline commands log progress at info; the dashboard owns the
    // terminal, so it only reports warnings and errors.
    let default_level = if cli.command.is_interactive() { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "radar failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if let Command::Dashboard = cli.command {
        return run_dashboard(&config).await;
    }

    let repository = Repository::new(&config.db_path).await?;

    match cli.command {
        Command::Search { mode } => search(&config, &repository, mode).await,
        Command::ImportCsv { file } => {
            let rows = media_cloud::read_csv(&file)?;
            let report = Importer::new(&repository, Utc::now())
                .import("media_cloud", rows)
                .await?;
            println!("{report}");
            Ok(())
        }
        Command::ImportRss { urls } => import_rss(&repository, &urls).await,
        Command::Scrape { limit } => {
            let operation = ScrapeOperation::new(ContentFetcher::new()?);
            let settings = RunSettings::from_config(&config, limit);
            let counters = StageRunner::new(&repository, settings, &TracingProgress)
                .run(&operation)
                .await?;
            println!(
                "scrape: {} processed, {} succeeded, {} rejected, {} failed, {} left",
                counters.processed,
                counters.succeeded,
                counters.rejected,
                counters.failed,
                counters.remaining()
            );
            Ok(())
        }
        Command::Summarize { limit } => {
            let chat = ChatClient::new(config.openai_key()?.to_string())?;
            let operation =
                SummarizeOperation::new(&chat, SummarizePolicy::interactive(&config.summary_model));
            let settings = RunSettings::from_config(&config, limit);
            let counters = StageRunner::new(&repository, settings, &TracingProgress)
                .run(&operation)
                .await?;
            println!(
                "summarize: {} processed, {} succeeded, {} failed, {} left",
                counters.processed,
                counters.succeeded,
                counters.failed,
                counters.remaining()
            );
            Ok(())
        }
        Command::Batch { action } => batch(&config, &repository, action).await,
        Command::Embed => embed(&config, &repository).await,
        Command::Cluster { assignments } => cluster(&config, &repository, assignments).await,
        Command::Label { keywords } => label(&config, &repository, keywords.as_deref()).await,
        Command::Status => status(&repository).await,
        Command::Export { file } => export(&repository, &file).await,
        // Opened read-only above.
        Command::Dashboard => Ok(()),
    }
}

async fn search(config: &Config, repository: &Repository, mode: SearchMode) -> Result<()> {
    let client = SearchClient::new(config.serpapi_key()?.to_string(), config.search.clone())?;
    let kinds: &[SearchKind] = match mode {
        SearchMode::News => &[SearchKind::News],
        SearchMode::All => &[SearchKind::All],
        SearchMode::Both => &[SearchKind::News, SearchKind::All],
    };

    let importer = Importer::new(repository, Utc::now());
    let mut report = ImportReport::default();
    for kind in kinds {
        let rows = search_all(&client, *kind).await;
        report.merge(importer.import(kind.origin_tag(), rows).await?);
    }
    println!("{report}");
    Ok(())
}

async fn import_rss(repository: &Repository, urls: &[String]) -> Result<()> {
    let fetcher = FeedFetcher::new()?;
    let importer = Importer::new(repository, Utc::now());
    let mut report = ImportReport::default();

    for url in urls {
        // One broken feed does not stop the others.
        match fetcher.fetch_feed(url).await {
            Ok(rows) => report.merge(importer.import("rss", rows).await?),
            Err(e) => tracing::warn!(%url, error = %e, "could not fetch feed"),
        }
    }
    println!("{report}");
    Ok(())
}

async fn batch(config: &Config, repository: &Repository, action: BatchAction) -> Result<()> {
    let stage = Stage::from(action.stage());
    let policy: Box<dyn StagePolicy> = match stage {
        Stage::Filter => Box::new(RelevancePolicy::new(&config.filter_model)),
        _ => Box::new(SummarizePolicy::batch(&config.batch_model)),
    };
    let data_dir = PathBuf::from(&config.data_dir);

    // Prepare and reconcile work from local files only.
    let backend = match &action {
        BatchAction::Prepare { .. } | BatchAction::Reconcile { .. } => {
            OpenAiBatchClient::new(config.openai_api_key.clone().unwrap_or_default())?
        }
        _ => OpenAiBatchClient::new(config.openai_key()?.to_string())?,
    };
    let runner = BatchStageRunner::new(
        repository,
        &backend,
        policy.as_ref(),
        &data_dir,
        config.poll_interval(),
    );

    match action {
        BatchAction::Prepare { limit, .. } => {
            let count = runner.prepare(limit).await?;
            println!(
                "{stage}: wrote {count} requests to {}",
                runner.files().requests.display()
            );
        }
        BatchAction::Submit { description, .. } => {
            let description = description.unwrap_or_else(|| format!("news-radar {stage}"));
            let job = runner.submit(&description).await?;
            println!(
                "{stage}: submitted {} with {} records ({})",
                job.handle,
                job.member_ids.len(),
                job.state
            );
        }
        BatchAction::Check { handle, .. } => {
            report_poll(stage, runner.check(handle.as_deref()).await?)?;
        }
        BatchAction::Wait { handle, .. } => {
            report_poll(stage, runner.wait(handle.as_deref()).await?)?;
        }
        BatchAction::Reconcile { handle, file, .. } => {
            let path = file.unwrap_or_else(|| runner.files().results.clone());
            let report = runner.reconcile_file(&path, handle.as_deref()).await?;
            println!("{stage}: {report}");
        }
    }
    Ok(())
}

fn report_poll(stage: Stage, outcome: PollOutcome) -> Result<()> {
    match outcome {
        PollOutcome::Running(status) => {
            println!(
                "{stage}: {} is {} ({}/{} completed, {} failed)",
                status.handle, status.state, status.completed, status.total, status.failed
            );
            Ok(())
        }
        PollOutcome::Reconciled(report) => {
            println!("{stage}: {report}");
            Ok(())
        }
        PollOutcome::Failed(status) => Err(AppError::Batch(format!(
            "{} ended as {}: {}; its records are pending again",
            status.handle,
            status.state,
            status.errors.as_deref().unwrap_or("no error details")
        ))),
    }
}

fn corpus_documents(corpus: &[models::Article]) -> Vec<(i64, String)> {
    corpus
        .iter()
        .map(ClusterDocument::from_article)
        .map(|doc| (doc.id, doc.text))
        .collect()
}

async fn embed(config: &Config, repository: &Repository) -> Result<()> {
    let corpus = repository.select_cluster_corpus().await?;
    if corpus.is_empty() {
        println!("embed: no summarized, relevant articles yet");
        return Ok(());
    }

    let embedder = VoyageEmbedder::new(
        config.voyage_key()?.to_string(),
        config.embedding_model.clone(),
    )?;
    let cache = EmbeddingCache::new(config.data_path(EMBEDDINGS_FILE));
    let set = ensure_embeddings(&embedder, &cache, &corpus_documents(&corpus)).await?;
    println!(
        "embed: {} vectors of {} dimensions in {}",
        set.len(),
        set.dimensions(),
        cache.path().display()
    );
    Ok(())
}

async fn cluster(
    config: &Config,
    repository: &Repository,
    assignments: Option<PathBuf>,
) -> Result<()> {
    let clusterer: Box<dyn Clusterer> = match assignments {
        Some(path) => Box::new(AssignmentFile::new(path)),
        None => {
            let embeddings = config.data_path(EMBEDDINGS_FILE);
            let embeddings = embeddings.exists().then_some(embeddings);
            Box::new(CommandClusterer::new(config.cluster_command.clone(), embeddings)?)
        }
    };

    let report = run_clustering(repository, clusterer.as_ref()).await?;
    if report.documents == 0 {
        println!("cluster: no summarized, relevant articles yet");
        return Ok(());
    }

    let saved = config.data_path(ASSIGNMENTS_FILE);
    save_assignments(&saved, &report.assignments)?;
    println!(
        "cluster: {} documents in {} topics, {} outliers; assignments saved to {}",
        report.documents,
        report.topics(),
        report.outliers(),
        saved.display()
    );
    Ok(())
}

async fn label(config: &Config, repository: &Repository, keywords: Option<&Path>) -> Result<()> {
    let keywords = match keywords {
        Some(path) => load_keywords(path)?,
        None => KeywordMap::new(),
    };

    let chat = ChatClient::new(config.openai_key()?.to_string())?;
    let topics = TopicLabeler::new(&chat, &config.label_model)
        .label_all(repository, &keywords)
        .await?;

    let path = config.data_path(TOPIC_INFO_FILE);
    save_topics(&path, &topics)?;

    for (cluster_id, info) in &topics {
        println!("{cluster_id:>4}  {:<40} {:>5}", info.name, info.count);
        if !info.keywords.is_empty() {
            let options = textwrap::Options::new(72)
                .initial_indent("      ")
                .subsequent_indent("      ");
            println!("{}", textwrap::fill(&info.keywords.join(", "), options));
        }
    }
    println!("label: {} topics written to {}", topics.len(), path.display());
    Ok(())
}

async fn status(repository: &Repository) -> Result<()> {
    println!("{:<20} {:>8}", "origin", "articles");
    let mut total = 0;
    for (origin, count) in repository.origin_counts().await? {
        total += count;
        println!("{origin:<20} {count:>8}");
    }
    println!("{:<20} {total:>8}", "total");

    for stage in Stage::ALL {
        println!();
        println!("{stage} (pending: {})", repository.count_pending(stage).await?);
        for (status, count) in repository.status_breakdown(stage).await? {
            println!("  {status:<40} {count:>8}");
        }
    }
    Ok(())
}

async fn export(repository: &Repository, file: &Path) -> Result<()> {
    let articles = repository.all_articles().await?;
    let mut writer = csv::Writer::from_path(file)?;
    for article in &articles {
        writer.serialize(article)?;
    }
    writer.flush()?;
    println!("export: {} articles written to {}", articles.len(), file.display());
    Ok(())
}

async fn run_dashboard(config: &Config) -> Result<()> {
    let mut app = App::new(config).await?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|frame| draw(frame, app))?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(action) = handle_key_event(key, app.show_help) {
                        if app.handle_action(action).await? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
