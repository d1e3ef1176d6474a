use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory for batch files, receipts, result bundles and topic side files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    pub openai_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub serpapi_key: Option<String>,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_batch_model")]
    pub batch_model: String,
    #[serde(default = "default_batch_model")]
    pub filter_model: String,
    #[serde(default = "default_label_model")]
    pub label_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_rate_limit_pause_secs")]
    pub rate_limit_pause_secs: u64,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Argv of the external clustering program, e.g. `["python", "fit_topics.py"]`.
    #[serde(default)]
    pub cluster_command: Vec<String>,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub query: String,
    pub location: Option<String>,
    pub google_domain: String,
    pub gl: String,
    pub hl: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: "(discoverability AND culture) OR (discoverability AND creative) OR (discoverability AND content)".to_string(),
            location: None,
            google_domain: "google.com".to_string(),
            gl: "us".to_string(),
            hl: "en".to_string(),
        }
    }
}

fn app_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("news-radar");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
}

fn default_db_path() -> String {
    app_data_dir().join("radar.db").to_string_lossy().to_string()
}

fn default_data_dir() -> String {
    app_data_dir().to_string_lossy().to_string()
}

fn default_summary_model() -> String {
    "gpt-5-nano".to_string()
}

fn default_batch_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_label_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_embedding_model() -> String {
    "voyage-3.5-lite".to_string()
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_rate_limit_pause_secs() -> u64 {
    60
}

fn default_progress_every() -> usize {
    25
}

fn default_attempt_timeout_secs() -> u64 {
    90
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            data_dir: default_data_dir(),
            openai_api_key: None,
            voyage_api_key: None,
            serpapi_key: None,
            summary_model: default_summary_model(),
            batch_model: default_batch_model(),
            filter_model: default_batch_model(),
            label_model: default_label_model(),
            embedding_model: default_embedding_model(),
            request_delay_ms: default_request_delay_ms(),
            rate_limit_pause_secs: default_rate_limit_pause_secs(),
            progress_every: default_progress_every(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            cluster_command: Vec::new(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), writing defaults on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("news-radar")
            .join("config.toml")
    }

    fn apply_env(&mut self) {
        fn fill(slot: &mut Option<String>, var: &str) {
            if slot.as_deref().map(str::is_empty).unwrap_or(true) {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        *slot = Some(value);
                    }
                }
            }
        }
        fill(&mut self.openai_api_key, "OPENAI_API_KEY");
        fill(&mut self.voyage_api_key, "VOYAGE_API_KEY");
        fill(&mut self.serpapi_key, "SERPAPI_KEY");
    }

    pub fn openai_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| AppError::missing_key("openai_api_key", "OPENAI_API_KEY"))
    }

    pub fn voyage_key(&self) -> Result<&str> {
        self.voyage_api_key
            .as_deref()
            .ok_or_else(|| AppError::missing_key("voyage_api_key", "VOYAGE_API_KEY"))
    }

    pub fn serpapi_key(&self) -> Result<&str> {
        self.serpapi_key
            .as_deref()
            .ok_or_else(|| AppError::missing_key("serpapi_key", "SERPAPI_KEY"))
    }

    pub fn data_path(&self, file_name: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(file_name)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_secs(self.rate_limit_pause_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/radar.db"
            data_dir = "/tmp/radar"
            cluster_command = ["python", "fit.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, "/tmp/radar.db");
        assert_eq!(config.request_delay(), Duration::from_millis(500));
        assert_eq!(config.rate_limit_pause(), Duration::from_secs(60));
        assert_eq!(config.progress_every, 25);
        assert_eq!(config.cluster_command, vec!["python", "fit.py"]);
        assert_eq!(config.search.hl, "en");
        assert_eq!(
            config.data_path("topic_info.json"),
            PathBuf::from("/tmp/radar/topic_info.json")
        );
    }

    #[test]
    fn load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.summary_model, "gpt-5-nano");

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.db_path, config.db_path);
    }
}
