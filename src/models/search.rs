use std::sync::Arc;

use serde::Serialize;

use crate::models::image::IndexedImage;

/// Result of evaluating one query against the index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchSnapshot {
    pub query: String,
    pub results: Arc<Vec<IndexedImage>>,
}

impl SearchSnapshot {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            results: Arc::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_shared_results() {
        let snapshot = SearchSnapshot {
            query: "cat".to_string(),
            results: Arc::new(vec![IndexedImage {
                file_path: "/pics/cat.png".to_string(),
                file_name: "cat.png".to_string(),
                folder_path: "/pics".to_string(),
                extracted_text: "cat on mat".to_string(),
                last_modified: 1,
                file_size: 2,
                indexed_at: 3,
            }]),
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["query"], "cat");
        assert_eq!(json["results"][0]["file_path"], "/pics/cat.png");
        assert_eq!(serde_json::to_value(SearchSnapshot::empty("x")).unwrap()["results"], serde_json::json!([]));
    }
}
