use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// Lifecycle of an asynchronous batch job as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Validating,
    InProgress,
    Finalizing,
    Cancelling,
    /// The provider finished; results not applied yet.
    Completed,
    /// Results applied to every member record.
    Reconciled,
    Failed,
    Cancelled,
    Expired,
}

impl BatchState {
    const FINAL: [BatchState; 4] = [
        BatchState::Reconciled,
        BatchState::Failed,
        BatchState::Cancelled,
        BatchState::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Validating => "validating",
            BatchState::InProgress => "in_progress",
            BatchState::Finalizing => "finalizing",
            BatchState::Cancelling => "cancelling",
            BatchState::Completed => "completed",
            BatchState::Reconciled => "reconciled",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
            BatchState::Expired => "expired",
        }
    }

    /// No further transition will happen; members are released.
    pub fn is_final(self) -> bool {
        Self::FINAL.contains(&self)
    }

    /// Job ended without results; nothing may be written to members.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            BatchState::Failed | BatchState::Cancelled | BatchState::Expired
        )
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            BatchState::Validating
                | BatchState::InProgress
                | BatchState::Finalizing
                | BatchState::Cancelling
        )
    }

    pub(crate) fn final_states_sql() -> String {
        Self::FINAL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "validating" => BatchState::Validating,
            "in_progress" => BatchState::InProgress,
            "finalizing" => BatchState::Finalizing,
            "cancelling" => BatchState::Cancelling,
            "completed" => BatchState::Completed,
            "reconciled" => BatchState::Reconciled,
            "failed" => BatchState::Failed,
            "cancelled" => BatchState::Cancelled,
            "expired" => BatchState::Expired,
            other => return Err(format!("unknown batch state: {other}")),
        })
    }
}

/// A submitted batch job and the records it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub handle: String,
    pub stage: Stage,
    pub state: BatchState,
    pub input_file_id: Option<String>,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub description: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub member_ids: Vec<i64>,
}

/// Provider-side view of a job, returned by submit and poll calls.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatus {
    pub handle: String,
    pub state: BatchState,
    pub input_file_id: Option<String>,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub errors: Option<String>,
}

// JSONL request/result shapes of the OpenAI Batch API.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestLine {
    /// Correlation token: the article id as a string.
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

impl BatchRequestLine {
    pub fn chat(article_id: i64, body: ChatRequest) -> Self {
        Self {
            custom_id: article_id.to_string(),
            method: "POST".to_string(),
            url: "/v1/chat/completions".to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResultLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<BatchResponse>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// What a single bundle entry means for its record.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Content(String),
    Error(String),
}

impl BatchResultLine {
    pub fn article_id(&self) -> Option<i64> {
        self.custom_id.trim().parse().ok()
    }

    pub fn outcome(&self) -> ItemOutcome {
        if let Some(error) = self.error.as_ref().filter(|e| !e.is_null()) {
            return ItemOutcome::Error(error_text(error));
        }

        let Some(response) = &self.response else {
            return ItemOutcome::Error("no response in batch result".to_string());
        };

        if let Some(code) = response.status_code.filter(|c| *c != 200) {
            let detail = response
                .body
                .get("error")
                .map(error_text)
                .unwrap_or_else(|| response.body.to_string());
            return ItemOutcome::Error(format!("HTTP {code}: {detail}"));
        }

        match response
            .body
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
        {
            Some(content) => ItemOutcome::Content(content.to_string()),
            None => ItemOutcome::Error("no message content in batch result".to_string()),
        }
    }
}

fn error_text(value: &serde_json::Value) -> String {
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(json: &str) -> BatchResultLine {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn success_line_yields_content() {
        let l = line(
            r#"{"id":"r1","custom_id":"42","response":{"status_code":200,"body":{"choices":[{"message":{"content":"YES"}}],"usage":{"total_tokens":12}}},"error":null}"#,
        );
        assert_eq!(l.article_id(), Some(42));
        assert_eq!(l.outcome(), ItemOutcome::Content("YES".into()));
    }

    #[test]
    fn error_field_wins() {
        let l = line(
            r#"{"custom_id":"7","response":null,"error":{"code":"server_error","message":"boom"}}"#,
        );
        assert_eq!(l.outcome(), ItemOutcome::Error("boom".into()));
    }

    #[test]
    fn non_200_response_is_an_item_error() {
        let l = line(
            r#"{"custom_id":"7","response":{"status_code":400,"body":{"error":{"message":"context length exceeded"}}}}"#,
        );
        assert_eq!(
            l.outcome(),
            ItemOutcome::Error("HTTP 400: context length exceeded".into())
        );
    }

    #[test]
    fn final_states() {
        assert!(BatchState::Reconciled.is_final());
        assert!(BatchState::Expired.is_failure());
        assert!(!BatchState::Completed.is_final());
        assert!(BatchState::InProgress.is_running());
        assert_eq!(
            "in_progress".parse::<BatchState>().unwrap(),
            BatchState::InProgress
        );
    }
}
