use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{BatchState, BatchStatus};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const BATCH_ENDPOINT: &str = "/v1/chat/completions";
const COMPLETION_WINDOW: &str = "24h";

/// Bulk job endpoint: upload a request file, create a job, poll it, and
/// download its result files.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Uploads a JSONL request file and returns its file id.
    async fn upload(&self, file_name: &str, contents: Vec<u8>) -> Result<String>;

    async fn create(&self, input_file_id: &str, description: &str) -> Result<BatchStatus>;

    async fn retrieve(&self, handle: &str) -> Result<BatchStatus>;

    /// Raw contents of an output or error file.
    async fn download(&self, file_id: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    input_file_id: Option<String>,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    request_counts: Option<RequestCounts>,
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Default, Deserialize)]
struct RequestCounts {
    #[serde(default)]
    total: i64,
    #[serde(default)]
    completed: i64,
    #[serde(default)]
    failed: i64,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    data: Vec<BatchErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorEntry {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

impl TryFrom<BatchObject> for BatchStatus {
    type Error = AppError;

    fn try_from(object: BatchObject) -> Result<Self> {
        let state = object
            .status
            .parse::<BatchState>()
            .map_err(AppError::Batch)?;
        let counts = object.request_counts.unwrap_or_default();
        let errors = object
            .errors
            .map(|e| {
                e.data
                    .into_iter()
                    .filter_map(|entry| entry.message)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|e| !e.is_empty());

        Ok(BatchStatus {
            handle: object.id,
            state,
            input_file_id: object.input_file_id,
            output_file_id: object.output_file_id,
            error_file_id: object.error_file_id,
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            errors,
        })
    }
}

pub fn parse_batch_object(body: &str) -> Result<BatchStatus> {
    let object: BatchObject = serde_json::from_str(body)?;
    object.try_into()
}

pub struct OpenAiBatchClient {
    client: Client,
    api_key: String,
}

impl OpenAiBatchClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client, api_key })
    }

    async fn checked(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message = response.text().await?;
        if status.as_u16() == 429 {
            return Err(AppError::RateLimited {
                provider: "OpenAI",
                message,
            });
        }
        Err(AppError::Api {
            provider: "OpenAI",
            message: format!("HTTP {status}: {message}"),
        })
    }
}

#[async_trait]
impl BatchBackend for OpenAiBatchClient {
    async fn upload(&self, file_name: &str, contents: Vec<u8>) -> Result<String> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(format!("{OPENAI_BASE_URL}/files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = Self::checked(response).await?.json().await?;
        tracing::info!(file_id = %file.id, "uploaded batch input file");
        Ok(file.id)
    }

    async fn create(&self, input_file_id: &str, description: &str) -> Result<BatchStatus> {
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": BATCH_ENDPOINT,
            "completion_window": COMPLETION_WINDOW,
            "metadata": { "description": description },
        });

        let response = self
            .client
            .post(format!("{OPENAI_BASE_URL}/batches"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let text = Self::checked(response).await?.text().await?;
        parse_batch_object(&text)
    }

    async fn retrieve(&self, handle: &str) -> Result<BatchStatus> {
        let response = self
            .client
            .get(format!("{OPENAI_BASE_URL}/batches/{handle}"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let text = Self::checked(response).await?.text().await?;
        parse_batch_object(&text)
    }

    async fn download(&self, file_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{OPENAI_BASE_URL}/files/{file_id}/content"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::checked(response).await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_batch() {
        let status = parse_batch_object(
            r#"{"id":"batch_abc","object":"batch","status":"in_progress",
                "input_file_id":"file-in","output_file_id":null,"error_file_id":null,
                "request_counts":{"total":40,"completed":12,"failed":1}}"#,
        )
        .unwrap();

        assert_eq!(status.handle, "batch_abc");
        assert_eq!(status.state, BatchState::InProgress);
        assert_eq!(status.input_file_id.as_deref(), Some("file-in"));
        assert_eq!((status.total, status.completed, status.failed), (40, 12, 1));
        assert!(status.errors.is_none());
    }

    #[test]
    fn collects_job_errors() {
        let status = parse_batch_object(
            r#"{"id":"batch_x","status":"failed",
                "errors":{"object":"list","data":[{"code":"invalid_json","message":"line 3 is not JSON","line":3}]}}"#,
        )
        .unwrap();
        assert_eq!(status.state, BatchState::Failed);
        assert_eq!(status.errors.as_deref(), Some("line 3 is not JSON"));
        assert_eq!(status.total, 0);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = parse_batch_object(r#"{"id":"batch_x","status":"paused"}"#).unwrap_err();
        assert!(matches!(err, AppError::Batch(_)));
    }
}
