//! How an LLM-backed stage builds its request and turns an answer, or an item
//! error, into a record update.

use chrono::{DateTime, Utc};

use crate::ai::prompts::{
    relevance_user_prompt, summary_user_prompt, RELEVANCE_SYSTEM_PROMPT, SUMMARY_SYSTEM_PROMPT,
};
use crate::models::{Article, ChatMessage, ChatRequest, Stage, StageColumn, StageUpdate};

pub trait StagePolicy: Send + Sync {
    fn stage(&self) -> Stage;

    fn request(&self, article: &Article) -> ChatRequest;

    fn on_content(&self, content: &str, at: DateTime<Utc>) -> StageUpdate;

    /// Applied to provider item errors and to members missing from a result
    /// bundle. Never leaves a submitted record unresolved.
    fn on_error(&self, message: &str, at: DateTime<Utc>) -> StageUpdate;
}

pub struct SummarizePolicy {
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl SummarizePolicy {
    /// Interactive calls use the model's default sampling.
    pub fn interactive(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn batch(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: Some(0.3),
            max_tokens: Some(1000),
        }
    }
}

impl StagePolicy for SummarizePolicy {
    fn stage(&self) -> Stage {
        Stage::Summarize
    }

    fn request(&self, article: &Article) -> ChatRequest {
        let text = article.scraped_text.as_deref().unwrap_or_default();
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                ChatMessage::user(summary_user_prompt(&article.title, &article.url, text)),
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn on_content(&self, content: &str, at: DateTime<Utc>) -> StageUpdate {
        let summary = content.trim();
        if summary.is_empty() {
            return StageUpdate::failure(Stage::Summarize, "empty summary");
        }
        StageUpdate::success(Stage::Summarize, summary, at)
    }

    // Record the error; the summary stays null so the record is retried later.
    fn on_error(&self, message: &str, _at: DateTime<Utc>) -> StageUpdate {
        StageUpdate::failure(Stage::Summarize, message)
    }
}

pub struct RelevancePolicy {
    model: String,
}

impl RelevancePolicy {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl StagePolicy for RelevancePolicy {
    fn stage(&self) -> Stage {
        Stage::Filter
    }

    fn request(&self, article: &Article) -> ChatRequest {
        let summary = article.summary.as_deref().unwrap_or_default();
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(RELEVANCE_SYSTEM_PROMPT),
                ChatMessage::user(relevance_user_prompt(&article.title, summary)),
            ],
            temperature: Some(0.1),
            max_tokens: Some(10),
        }
    }

    fn on_content(&self, content: &str, _at: DateTime<Utc>) -> StageUpdate {
        let relevant = content.to_uppercase().contains("YES");
        StageUpdate::new().set(StageColumn::RelevanceFlag, relevant)
    }

    // Include by default: a lost classification must not drop an article.
    fn on_error(&self, _message: &str, _at: DateTime<Utc>) -> StageUpdate {
        StageUpdate::new().set(StageColumn::RelevanceFlag, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    fn article() -> Article {
        Article {
            id: 9,
            title: "Algorithms and indie film".into(),
            url: "https://film.example/a".into(),
            source: None,
            published_date: None,
            origin_tag: "rss".into(),
            snippet: None,
            scraped_text: Some("body text".into()),
            scrape_status: Some("success".into()),
            scraped_at: None,
            summary: Some("Recommendation systems hide indie film.".into()),
            summary_status: Some("success".into()),
            summarized_at: None,
            pending_batch_handle: None,
            relevance_flag: None,
            filter_batch_handle: None,
            cluster_id: None,
            created_at: None,
        }
    }

    #[test]
    fn relevance_answers() {
        let policy = RelevancePolicy::new("gpt-4o-mini");
        let at = Utc::now();
        assert_eq!(
            policy.on_content("YES", at).fields,
            vec![(StageColumn::RelevanceFlag, FieldValue::Integer(1))]
        );
        assert_eq!(
            policy.on_content("No.", at).fields,
            vec![(StageColumn::RelevanceFlag, FieldValue::Integer(0))]
        );
        assert_eq!(
            policy.on_error("server_error", at).fields,
            vec![(StageColumn::RelevanceFlag, FieldValue::Integer(1))]
        );
    }

    #[test]
    fn summarize_errors_leave_output_null() {
        let policy = SummarizePolicy::batch("gpt-4o-mini");
        let update = policy.on_error("context length exceeded", Utc::now());
        assert!(update
            .fields
            .iter()
            .all(|(column, _)| *column != StageColumn::Summary));
        assert_eq!(
            update.fields,
            vec![(
                StageColumn::SummaryStatus,
                FieldValue::Text("error: context length exceeded".into())
            )]
        );
    }

    #[test]
    fn requests_carry_prompts_and_sampling() {
        let batch = SummarizePolicy::batch("gpt-4o-mini").request(&article());
        assert_eq!(batch.temperature, Some(0.3));
        assert_eq!(batch.max_tokens, Some(1000));
        assert!(batch.messages[1].content.contains("https://film.example/a"));

        let interactive = SummarizePolicy::interactive("gpt-5-nano").request(&article());
        assert!(interactive.temperature.is_none());

        let filter = RelevancePolicy::new("gpt-4o-mini").request(&article());
        assert!(filter.messages[1]
            .content
            .contains("Recommendation systems hide indie film."));
        assert_eq!(filter.max_tokens, Some(10));
    }
}
