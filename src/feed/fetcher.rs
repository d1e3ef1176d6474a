use std::time::Duration;

use feed_rs::parser;
use reqwest::Client;

use crate::error::{AppError, Result};

use super::importer::{FeedItem, FeedRow};

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("news-radar/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Fetches an RSS/Atom feed and maps its entries to feed rows.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedRow>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Other(anyhow::anyhow!(
                "Failed to fetch feed {url}: HTTP {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        parse_feed(&bytes)
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedRow>> {
    let feed = parser::parse(bytes)?;
    let feed_title = feed.title.map(|t| t.content).unwrap_or_default();

    let rows = feed
        .entries
        .into_iter()
        .map(|entry| {
            let snippet = entry
                .summary
                .as_ref()
                .and_then(|s| html2text::from_read(s.content.as_bytes(), 120).ok())
                .map(|s| s.trim().to_string());

            Ok(FeedItem {
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                url: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                source: feed_title.clone(),
                date: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
                snippet,
            })
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Culture Desk</title>
    <link>https://culture.example</link>
    <description>Arts coverage</description>
    <item>
      <title>Museums go digital</title>
      <link>https://culture.example/museums</link>
      <description>&lt;p&gt;Collections online.&lt;/p&gt;</description>
      <pubDate>Mon, 03 Nov 2025 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn entries_map_to_feed_items() {
        let rows = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.title, "Museums go digital");
        assert_eq!(first.url, "https://culture.example/museums");
        assert_eq!(first.source, "Culture Desk");
        assert!(first.date.starts_with("2025-11-03T08:00:00"));
        assert_eq!(first.snippet.as_deref(), Some("Collections online."));

        // Left for the importer to classify as an error.
        assert_eq!(rows[1].as_ref().unwrap().url, "");
    }
}
