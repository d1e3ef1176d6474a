use std::collections::BTreeMap;
use std::path::Path;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{ChatMessage, ChatRequest, TopicInfo, TopicMap, OUTLIER_CLUSTER};

use super::chat::ChatModel;
use super::prompts::{label_user_prompt, LABEL_SYSTEM_PROMPT};

/// Summaries sampled per cluster for the label prompt.
pub const LABEL_SAMPLE_SIZE: usize = 30;

pub type KeywordMap = BTreeMap<i64, Vec<String>>;

/// Reads `{cluster_id: [keyword, ..]}` as written by the clustering program.
pub fn load_keywords(path: &Path) -> Result<KeywordMap> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub struct TopicLabeler<'a> {
    chat: &'a dyn ChatModel,
    model: String,
}

impl<'a> TopicLabeler<'a> {
    pub fn new(chat: &'a dyn ChatModel, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    /// Names every cluster currently in the store. A failed label call falls
    /// back to a numbered name so one cluster never blocks the rest.
    pub async fn label_all(
        &self,
        repository: &Repository,
        keywords: &KeywordMap,
    ) -> Result<TopicMap> {
        let mut topics = TopicMap::new();

        for (cluster_id, count) in repository.cluster_counts().await? {
            let cluster_keywords = keywords.get(&cluster_id).cloned().unwrap_or_default();

            let name = if cluster_id == OUTLIER_CLUSTER {
                "Outliers".to_string()
            } else {
                let articles = repository.articles_in_cluster(cluster_id).await?;
                let summaries: Vec<&str> = articles
                    .iter()
                    .filter_map(|a| a.summary.as_deref())
                    .take(LABEL_SAMPLE_SIZE)
                    .collect();

                match self.label(&summaries, &cluster_keywords).await {
                    Ok(label) => label,
                    Err(e) => {
                        tracing::warn!(cluster_id, error = %e, "topic label failed");
                        format!("Topic {cluster_id}")
                    }
                }
            };

            tracing::info!(cluster_id, count, %name, "labelled topic");
            topics.insert(
                cluster_id,
                TopicInfo {
                    name,
                    count: usize::try_from(count).unwrap_or_default(),
                    keywords: cluster_keywords,
                },
            );
        }

        Ok(topics)
    }

    async fn label(&self, summaries: &[&str], keywords: &[String]) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(LABEL_SYSTEM_PROMPT),
                ChatMessage::user(label_user_prompt(summaries, keywords)),
            ],
            temperature: None,
            max_tokens: None,
        };
        let raw = self.chat.complete(request).await?;
        Ok(clean_label(&raw))
    }
}

/// First non-empty line, without a "Topic label:" prefix or wrapping quotes.
fn clean_label(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = line
        .strip_prefix("Topic label:")
        .map(str::trim)
        .unwrap_or(line);
    line.trim_matches(|c| c == '"' || c == '\'' || c == '*').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{long_text, seed, test_repo};
    use crate::error::AppError;
    use crate::models::{Stage, StageColumn, StageUpdate};
    use async_trait::async_trait;
    use chrono::Utc;

    struct ScriptedChat;

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, request: ChatRequest) -> Result<String> {
            let prompt = &request.messages[1].content;
            if prompt.contains("podcast") {
                return Err(AppError::Api {
                    provider: "OpenAI",
                    message: "overloaded".into(),
                });
            }
            Ok("Topic label: \"Streaming Discovery\"\n".to_string())
        }
    }

    #[test]
    fn labels_are_cleaned() {
        assert_eq!(clean_label("\n  \"Museum Digitization\"  \n"), "Museum Digitization");
        assert_eq!(clean_label("**Playlist Curation**"), "Playlist Curation");
    }

    #[tokio::test]
    async fn labels_each_cluster_with_fallbacks() {
        let (repo, _dir) = test_repo().await;
        let ids = seed(&repo, 4).await;
        let now = Utc::now();

        let plan = [
            (ids[0], 0, "streaming recommendation"),
            (ids[1], 0, "streaming catalogues"),
            (ids[2], 1, "podcast charts"),
            (ids[3], OUTLIER_CLUSTER, "unrelated"),
        ];
        for (id, cluster, topic) in plan {
            let summary = format!("{topic} {}", long_text(60));
            let update = StageUpdate::success(Stage::Summarize, summary, now)
                .set(StageColumn::ClusterId, cluster);
            repo.update_stage(id, &update).await.unwrap();
        }

        let mut keywords = KeywordMap::new();
        keywords.insert(0, vec!["streaming".into()]);

        let labeler = TopicLabeler::new(&ScriptedChat, "fake-model");
        let topics = labeler.label_all(&repo, &keywords).await.unwrap();

        assert_eq!(topics.len(), 3);
        assert_eq!(topics[&0].name, "Streaming Discovery");
        assert_eq!(topics[&0].count, 2);
        assert_eq!(topics[&0].keywords, vec!["streaming".to_string()]);
        assert_eq!(topics[&1].name, "Topic 1");
        assert_eq!(topics[&OUTLIER_CLUSTER].name, "Outliers");
    }
}
