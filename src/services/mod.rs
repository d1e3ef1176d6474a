mod content_fetcher;
mod search;

pub use content_fetcher::{extract_content, ContentFetcher, FetchedPage, PageFetcher};
pub use search::{search_all, SearchBackend, SearchClient, SearchKind};
