use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::SearchConfig;
use crate::error::{AppError, Result};
use crate::feed::{FeedItem, FeedRow};

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    News,
    All,
}

impl SearchKind {
    pub fn origin_tag(self) -> &'static str {
        match self {
            SearchKind::News => "google_news",
            SearchKind::All => "google_all",
        }
    }

    fn results_key(self) -> &'static str {
        match self {
            SearchKind::News => "news_results",
            SearchKind::All => "organic_results",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    source: Option<serde_json::Value>,
    #[serde(default)]
    date: String,
    #[serde(default)]
    snippet: Option<String>,
}

impl From<SearchResult> for FeedItem {
    fn from(result: SearchResult) -> Self {
        // News results carry `source` as an object with a name, organic
        // results as a plain string.
        let source = match result.source {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Object(obj)) => obj
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        FeedItem {
            title: result.title,
            url: result.link,
            source,
            date: result.date,
            snippet: result.snippet,
        }
    }
}

/// One page of search results plus whether the feed has more.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub rows: Vec<FeedRow>,
    pub has_next: bool,
}

pub fn parse_page(kind: SearchKind, body: &serde_json::Value) -> SearchPage {
    let rows: Vec<FeedRow> = body
        .get(kind.results_key())
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .map(|value| {
                    serde_json::from_value::<SearchResult>(value.clone())
                        .map(FeedItem::from)
                        .map_err(|e| e.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let has_next = body
        .pointer("/serpapi_pagination/next")
        .map(|next| !next.is_null())
        .unwrap_or(false);

    SearchPage { rows, has_next }
}

/// Fetches one raw result page of the configured query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn fetch_page(&self, kind: SearchKind, start: u32) -> Result<serde_json::Value>;
}

pub struct SearchClient {
    client: Client,
    api_key: String,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(api_key: String, config: SearchConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn fetch_page(&self, kind: SearchKind, start: u32) -> Result<serde_json::Value> {
        let start = start.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("engine", "google"),
            ("q", &self.config.query),
            ("google_domain", &self.config.google_domain),
            ("gl", &self.config.gl),
            ("hl", &self.config.hl),
            ("start", &start),
            ("api_key", &self.api_key),
        ];
        if let Some(location) = &self.config.location {
            query.push(("location", location));
        }
        if kind == SearchKind::News {
            query.push(("tbm", "nws"));
        }

        let response = self.client.get(SERPAPI_URL).query(&query).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await?;
            return Err(if status.as_u16() == 429 {
                AppError::RateLimited {
                    provider: "SerpAPI",
                    message,
                }
            } else {
                AppError::Api {
                    provider: "SerpAPI",
                    message: format!("HTTP {status}: {message}"),
                }
            });
        }
        Ok(response.json().await?)
    }
}

/// Pages through results until the feed is exhausted. A failing page ends
/// pagination; rows collected so far are kept.
pub async fn search_all(backend: &dyn SearchBackend, kind: SearchKind) -> Vec<FeedRow> {
    let mut rows = Vec::new();
    let mut start = 0;
    let mut pages = 0;

    loop {
        let body = match backend.fetch_page(kind, start).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    kind = kind.origin_tag(),
                    page = pages + 1,
                    error = %e,
                    "search page failed"
                );
                break;
            }
        };

        let page = parse_page(kind, &body);
        if page.rows.is_empty() {
            break;
        }
        pages += 1;
        tracing::info!(
            kind = kind.origin_tag(),
            page = pages,
            results = page.rows.len(),
            "search page fetched"
        );
        rows.extend(page.rows);

        if !page.has_next {
            break;
        }
        start += PAGE_SIZE;
    }

    tracing::info!(kind = kind.origin_tag(), pages, results = rows.len(), "search finished");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    /// Serves canned pages by offset; `None` is a failing page.
    struct ScriptedPages {
        pages: Vec<Option<serde_json::Value>>,
        requested: Mutex<Vec<u32>>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<Option<serde_json::Value>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchBackend for ScriptedPages {
        async fn fetch_page(&self, _kind: SearchKind, start: u32) -> Result<serde_json::Value> {
            self.requested.lock().unwrap().push(start);
            match self.pages.get((start / PAGE_SIZE) as usize) {
                Some(Some(body)) => Ok(body.clone()),
                _ => Err(AppError::Api {
                    provider: "SerpAPI",
                    message: "HTTP 500".to_string(),
                }),
            }
        }
    }

    fn news_page(urls: &[&str], has_next: bool) -> serde_json::Value {
        let results: Vec<_> = urls
            .iter()
            .map(|url| json!({"title": "T", "link": url, "source": "Wire", "date": "1 day ago"}))
            .collect();
        let pagination = if has_next {
            json!({"next": "https://serpapi.com/search.json?start=next"})
        } else {
            json!({})
        };
        json!({"news_results": results, "serpapi_pagination": pagination})
    }

    fn urls(rows: &[FeedRow]) -> Vec<String> {
        rows.iter()
            .map(|row| row.as_ref().unwrap().url.clone())
            .collect()
    }

    #[tokio::test]
    async fn pagination_follows_next_until_the_last_page() {
        let backend = ScriptedPages::new(vec![
            Some(news_page(&["https://a.example", "https://b.example"], true)),
            Some(news_page(&["https://c.example"], false)),
            Some(news_page(&["https://never.example"], false)),
        ]);

        let rows = search_all(&backend, SearchKind::News).await;
        assert_eq!(
            urls(&rows),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
        assert_eq!(backend.requested(), vec![0, 10]);
    }

    #[tokio::test]
    async fn empty_page_ends_pagination() {
        let backend = ScriptedPages::new(vec![
            Some(news_page(&["https://a.example"], true)),
            Some(news_page(&[], true)),
            Some(news_page(&["https://never.example"], false)),
        ]);

        let rows = search_all(&backend, SearchKind::News).await;
        assert_eq!(urls(&rows), vec!["https://a.example"]);
        assert_eq!(backend.requested(), vec![0, 10]);
    }

    #[tokio::test]
    async fn failing_page_keeps_earlier_rows() {
        let backend = ScriptedPages::new(vec![
            Some(news_page(&["https://a.example", "https://b.example"], true)),
            None,
            Some(news_page(&["https://never.example"], false)),
        ]);

        let rows = search_all(&backend, SearchKind::News).await;
        assert_eq!(urls(&rows), vec!["https://a.example", "https://b.example"]);
        assert_eq!(backend.requested(), vec![0, 10]);

        // A failure on the first page yields nothing, without an error.
        let backend = ScriptedPages::new(vec![None]);
        assert!(search_all(&backend, SearchKind::News).await.is_empty());
    }

    #[test]
    fn news_page_with_next() {
        let body = json!({
            "news_results": [
                {"title": "A", "link": "https://a.example", "source": {"name": "Wire"}, "date": "2 days ago", "snippet": "s"},
                {"title": "B", "link": "https://b.example", "source": "Blog", "date": "Nov 3, 2025"}
            ],
            "serpapi_pagination": {"next": "https://serpapi.com/search.json?start=10"}
        });

        let page = parse_page(SearchKind::News, &body);
        assert!(page.has_next);
        assert_eq!(page.rows.len(), 2);
        let a = page.rows[0].as_ref().unwrap();
        assert_eq!(a.source, "Wire");
        assert_eq!(a.date, "2 days ago");
        assert_eq!(page.rows[1].as_ref().unwrap().source, "Blog");
    }

    #[test]
    fn exhausted_feed() {
        let body = json!({"organic_results": [], "serpapi_pagination": {}});
        let page = parse_page(SearchKind::All, &body);
        assert!(!page.has_next);
        assert!(page.rows.is_empty());

        // Wrong key for the kind means nothing to import.
        let body = json!({"news_results": [{"link": "https://a.example"}]});
        assert!(parse_page(SearchKind::All, &body).rows.is_empty());
    }
}
