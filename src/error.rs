use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// True when SQLite aborted a statement because its progress handler asked it to.
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::OperationInterrupted
            }
            _ => false,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
