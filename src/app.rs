use std::path::Path;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{load_topics, topic_name, Article, TopicMap};
use crate::tui::AppAction;

pub const TOPIC_INFO_FILE: &str = "topic_info.json";

/// One row of the topics pane.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEntry {
    pub cluster_id: i64,
    pub name: String,
    pub count: usize,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Topics,
    Articles,
}

/// Dashboard state. Never writes to the store.
pub struct App {
    // Data
    pub topics: Vec<TopicEntry>,
    pub articles: Vec<Article>,

    // UI State
    pub topic_index: usize,
    pub article_index: usize,
    pub focus: Focus,
    pub show_help: bool,
    pub status_message: Option<String>,

    repository: Repository,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        if !Path::new(&config.db_path).exists() {
            return Err(AppError::Config(format!(
                "no article store at {}; run an import first",
                config.db_path
            )));
        }
        let repository = Repository::open_read_only(&config.db_path).await?;
        let labels = load_topics(&config.data_path(TOPIC_INFO_FILE))?;
        Self::load(repository, &labels).await
    }

    async fn load(repository: Repository, labels: &TopicMap) -> Result<Self> {
        let topics = repository
            .cluster_counts()
            .await?
            .into_iter()
            .map(|(cluster_id, count)| TopicEntry {
                cluster_id,
                name: topic_name(labels, cluster_id),
                count: usize::try_from(count).unwrap_or_default(),
                keywords: labels
                    .get(&cluster_id)
                    .map(|info| info.keywords.clone())
                    .unwrap_or_default(),
            })
            .collect();

        let mut app = Self {
            topics,
            articles: Vec::new(),
            topic_index: 0,
            article_index: 0,
            focus: Focus::Topics,
            show_help: false,
            status_message: None,
            repository,
        };
        app.reload_articles().await?;
        Ok(app)
    }

    pub fn selected_topic(&self) -> Option<&TopicEntry> {
        self.topics.get(self.topic_index)
    }

    pub fn selected_article(&self) -> Option<&Article> {
        self.articles.get(self.article_index)
    }

    /// Returns true when the dashboard should exit.
    pub async fn handle_action(&mut self, action: AppAction) -> Result<bool> {
        self.status_message = None;

        match action {
            AppAction::Quit => return Ok(true),

            AppAction::MoveUp => self.move_by(-1).await?,
            AppAction::MoveDown => self.move_by(1).await?,
            AppAction::MoveToTop => self.move_to(0).await?,
            AppAction::MoveToBottom => self.move_to(usize::MAX).await?,

            AppAction::FocusTopics => self.focus = Focus::Topics,
            AppAction::FocusArticles => {
                if !self.articles.is_empty() {
                    self.focus = Focus::Articles;
                }
            }
            AppAction::ToggleFocus => {
                self.focus = match self.focus {
                    Focus::Topics if !self.articles.is_empty() => Focus::Articles,
                    _ => Focus::Topics,
                };
            }

            AppAction::OpenInBrowser => {
                if let Some(article) = self.selected_article() {
                    let url = article.url.clone();
                    if let Err(e) = open::that(&url) {
                        tracing::warn!(%url, error = %e, "could not open browser");
                        self.status_message = Some(format!("Could not open {url}"));
                    }
                }
            }

            AppAction::ShowHelp => self.show_help = true,
            AppAction::HideHelp => self.show_help = false,
        }

        Ok(false)
    }

    async fn move_by(&mut self, delta: isize) -> Result<()> {
        let current = match self.focus {
            Focus::Topics => self.topic_index,
            Focus::Articles => self.article_index,
        };
        let target = current.saturating_add_signed(delta);
        self.move_to(target).await
    }

    async fn move_to(&mut self, target: usize) -> Result<()> {
        match self.focus {
            Focus::Topics => {
                if self.topics.is_empty() {
                    return Ok(());
                }
                let target = target.min(self.topics.len() - 1);
                if target != self.topic_index {
                    self.topic_index = target;
                    self.reload_articles().await?;
                }
            }
            Focus::Articles => {
                if !self.articles.is_empty() {
                    self.article_index = target.min(self.articles.len() - 1);
                }
            }
        }
        Ok(())
    }

    async fn reload_articles(&mut self) -> Result<()> {
        self.article_index = 0;
        self.articles = match self.selected_topic() {
            Some(topic) => self.repository.articles_in_cluster(topic.cluster_id).await?,
            None => Vec::new(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::db::test_support::{long_text, seed, test_repo};
    use crate::models::{Stage, StageColumn, StageUpdate, TopicInfo, OUTLIER_CLUSTER};

    async fn dashboard() -> (App, tempfile::TempDir) {
        let (repo, dir) = test_repo().await;
        let ids = seed(&repo, 4).await;
        for (id, cluster) in ids.iter().zip([0, 0, 1, OUTLIER_CLUSTER]) {
            let update = StageUpdate::success(Stage::Summarize, long_text(80), Utc::now())
                .set(StageColumn::ClusterId, cluster);
            repo.update_stage(*id, &update).await.unwrap();
        }
        drop(repo);

        let path = dir.path().join("radar.db");
        let read_only = Repository::open_read_only(path.to_str().unwrap()).await.unwrap();

        let mut labels = TopicMap::new();
        labels.insert(
            0,
            TopicInfo {
                name: "Algorithmic Curation".into(),
                count: 2,
                keywords: vec!["algorithm".into()],
            },
        );
        let app = App::load(read_only, &labels).await.unwrap();
        (app, dir)
    }

    #[tokio::test]
    async fn topics_are_listed_largest_first_outliers_last() {
        let (app, _dir) = dashboard().await;

        let names: Vec<&str> = app.topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Algorithmic Curation", "Topic 1", "Outliers"]);
        assert_eq!(app.topics[0].count, 2);
        assert_eq!(app.topics[0].keywords, vec!["algorithm".to_string()]);
        assert_eq!(app.articles.len(), 2);
    }

    #[tokio::test]
    async fn navigation_reloads_articles_per_topic() {
        let (mut app, _dir) = dashboard().await;

        app.handle_action(AppAction::MoveDown).await.unwrap();
        assert_eq!(app.topic_index, 1);
        assert_eq!(app.articles.len(), 1);

        app.handle_action(AppAction::MoveToBottom).await.unwrap();
        assert_eq!(app.selected_topic().unwrap().cluster_id, OUTLIER_CLUSTER);

        app.handle_action(AppAction::MoveToTop).await.unwrap();
        app.handle_action(AppAction::FocusArticles).await.unwrap();
        assert_eq!(app.focus, Focus::Articles);
        app.handle_action(AppAction::MoveDown).await.unwrap();
        app.handle_action(AppAction::MoveDown).await.unwrap();
        assert_eq!(app.article_index, 1);
        // Moving within articles never changes the topic.
        assert_eq!(app.topic_index, 0);

        assert!(app.handle_action(AppAction::Quit).await.unwrap());
    }
}
