use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::stage::OUTLIER_CLUSTER;

/// Per-cluster label side file consumed by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub count: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub type TopicMap = BTreeMap<i64, TopicInfo>;

pub fn topic_name(topics: &TopicMap, cluster_id: i64) -> String {
    match topics.get(&cluster_id) {
        Some(info) if !info.name.is_empty() => info.name.clone(),
        _ if cluster_id == OUTLIER_CLUSTER => "Outliers".to_string(),
        _ => format!("Topic {cluster_id}"),
    }
}

pub fn load_topics(path: &Path) -> Result<TopicMap> {
    if !path.exists() {
        return Ok(TopicMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_topics(path: &Path, topics: &TopicMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(topics)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fall_back_for_unlabelled_clusters() {
        let mut topics = TopicMap::new();
        topics.insert(
            2,
            TopicInfo {
                name: "Streaming Algorithms".into(),
                count: 4,
                keywords: vec!["netflix".into()],
            },
        );

        assert_eq!(topic_name(&topics, 2), "Streaming Algorithms");
        assert_eq!(topic_name(&topics, 5), "Topic 5");
        assert_eq!(topic_name(&topics, OUTLIER_CLUSTER), "Outliers");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topic_info.json");
        assert!(load_topics(&path).unwrap().is_empty());

        let mut topics = TopicMap::new();
        topics.insert(0, TopicInfo::default());
        save_topics(&path, &topics).unwrap();
        assert_eq!(load_topics(&path).unwrap(), topics);
    }
}
