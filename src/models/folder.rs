use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedFolder {
    pub folder_path: String,
    pub display_name: String,
    /// Epoch millis of the last completed scan, 0 when never scanned.
    pub last_scan_at: i64,
    pub image_count: i64,
    pub is_active: bool,
}

impl WatchedFolder {
    pub fn new(folder_path: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            folder_path: folder_path.into(),
            display_name: display_name.into(),
            last_scan_at: 0,
            image_count: 0,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_images: i64,
    pub images_with_text: i64,
    pub active_folders: i64,
}
