use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    AsyncDatabase(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("feed parse error: {0}")]
    Feed(#[from] feed_rs::parser::ParseFeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{provider} API error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rate limit: {message}")]
    RateLimited {
        provider: &'static str,
        message: String,
    },

    #[error("batch error: {0}")]
    Batch(String),

    #[error("cluster assignments rejected: {0}")]
    ClusterMismatch(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn missing_key(name: &str, env: &str) -> Self {
        AppError::Config(format!(
            "{name} is not configured (set it in the config file or the {env} environment variable)"
        ))
    }

    /// Rate-limit-class failures get a longer pause before the next record.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            AppError::RateLimited { .. } => true,
            AppError::Api { message, .. } => message.to_lowercase().contains("rate_limit"),
            AppError::Http(e) => e.status().map(|s| s.as_u16() == 429).unwrap_or(false),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classification() {
        let limited = AppError::RateLimited {
            provider: "OpenAI",
            message: "slow down".into(),
        };
        assert!(limited.is_rate_limit());

        let body = AppError::Api {
            provider: "OpenAI",
            message: "{\"code\":\"rate_limit_exceeded\"}".into(),
        };
        assert!(body.is_rate_limit());

        assert!(!AppError::Config("missing".into()).is_rate_limit());
        assert!(!AppError::Timeout(30).is_rate_limit());
    }
}
