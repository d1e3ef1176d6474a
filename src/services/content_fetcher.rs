use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Result of fetching an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedPage {
    Text(String),
    /// The URL cannot be fetched at all; retrying will not help.
    InvalidUrl,
}

/// Fetches an article URL as plain text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, article_url: &str) -> Result<FetchedPage>;
}

pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for ContentFetcher {
    /// Fetches the page and converts it to readable plain text.
    async fn fetch_text(&self, article_url: &str) -> Result<FetchedPage> {
        let url = match Url::parse(article_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => u,
            _ => return Ok(FetchedPage::InvalidUrl),
        };

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", article_url, response.status());
            return Err(AppError::Other(anyhow::anyhow!(
                "HTTP {} fetching article",
                response.status()
            )));
        }

        let html = response.text().await?;
        Ok(FetchedPage::Text(extract_content(&html)?))
    }
}

/// Extract readable content from HTML using html2text
pub fn extract_content(html: &str) -> Result<String> {
    let text = html2text::from_read(html.as_bytes(), 100)
        .map_err(|e| AppError::Other(anyhow::anyhow!("Failed to convert HTML to text: {e}")))?;

    // Clean up the text - remove excessive whitespace
    let cleaned = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_drops_blank_lines() {
        let html = "<html><body><h1>Headline</h1>\n\n<p>  First paragraph.  </p><p></p><p>Second.</p></body></html>";
        let text = extract_content(html).unwrap();
        assert!(text.contains("Headline"));
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second."));
        assert!(!text.contains("\n\n"));
    }

    #[tokio::test]
    async fn non_http_urls_are_invalid() {
        let fetcher = ContentFetcher::new().unwrap();
        assert_eq!(
            fetcher.fetch_text("not a url").await.unwrap(),
            FetchedPage::InvalidUrl
        );
        assert_eq!(
            fetcher.fetch_text("mailto:desk@news.example").await.unwrap(),
            FetchedPage::InvalidUrl
        );
    }
}
