use serde::{Deserialize, Serialize};

/// One row of the `images` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedImage {
    pub file_path: String,
    pub file_name: String,
    pub folder_path: String,
    /// Empty when the recognizer found nothing; never null.
    pub extracted_text: String,
    /// Source modification time (epoch millis) at the moment the text was extracted.
    pub last_modified: i64,
    pub file_size: i64,
    pub indexed_at: i64,
}
