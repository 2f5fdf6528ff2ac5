use serde::{Deserialize, Serialize};

use crate::models::address::Address;

/// A file as seen by the enumerator, before anything is extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub address: Address,
    pub last_modified: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanResult {
    Success { processed: usize, new: usize },
    Error { message: String },
}

impl ScanResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Latest published state of the scanner. Consumers only ever see the newest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanProgress {
    #[default]
    Idle,
    Scanning {
        current_item: String,
        processed: usize,
        total: usize,
    },
    Complete {
        processed: usize,
        new: usize,
    },
    Error {
        message: String,
    },
}

impl ScanProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

impl From<&ScanResult> for ScanProgress {
    fn from(result: &ScanResult) -> Self {
        match result {
            ScanResult::Success { processed, new } => Self::Complete {
                processed: *processed,
                new: *new,
            },
            ScanResult::Error { message } => Self::Error {
                message: message.clone(),
            },
        }
    }
}
