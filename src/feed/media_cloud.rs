use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};

use super::importer::{FeedItem, FeedRow};

/// Columns of a Media Cloud online-news content export.
#[derive(Debug, Deserialize)]
struct MediaCloudRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    media_name: String,
    #[serde(default)]
    publish_date: String,
}

impl From<MediaCloudRow> for FeedItem {
    fn from(row: MediaCloudRow) -> Self {
        FeedItem {
            title: row.title,
            url: row.url,
            source: row.media_name,
            date: row.publish_date,
            snippet: None,
        }
    }
}

/// Reads a Media Cloud CSV export. A missing file is a configuration error;
/// a row that fails to decode becomes an error row for the importer.
pub fn read_csv(path: &Path) -> Result<Vec<FeedRow>> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Media Cloud export not found: {}",
            path.display()
        )));
    }
    let file = std::fs::File::open(path)?;
    read_rows(file)
}

fn read_rows<R: Read>(reader: R) -> Result<Vec<FeedRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let rows = reader
        .deserialize::<MediaCloudRow>()
        .map(|row| row.map(FeedItem::from).map_err(|e| e.to_string()))
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_media_cloud_columns() {
        let csv = "id,indexed_date,language,media_name,media_url,publish_date,title,url\n\
                   1,2025-12-01,en,Arts Daily,artsdaily.example,2025-11-30 10:00:00,Streaming and film,https://artsdaily.example/a\n\
                   2,2025-12-01,en,Arts Daily,artsdaily.example,,No url,\n";

        let rows = read_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.title, "Streaming and film");
        assert_eq!(first.source, "Arts Daily");
        assert_eq!(first.date, "2025-11-30 10:00:00");
        assert_eq!(first.url, "https://artsdaily.example/a");

        assert_eq!(rows[1].as_ref().unwrap().url, "");
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = read_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
