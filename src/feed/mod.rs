mod dates;
mod fetcher;
mod importer;
pub mod media_cloud;

pub use dates::{normalize_date, PublishedDate};
pub use fetcher::FeedFetcher;
pub use importer::{FeedCounts, FeedItem, FeedRow, ImportReport, Importer};
