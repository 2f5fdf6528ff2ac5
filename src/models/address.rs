use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Prefix that marks an address as a permission-scoped tree handle rather than a path.
pub const TREE_SCHEME: &str = "content://";

/// Where a watched folder or an indexed image lives.
///
/// Addresses are sniffed once when they enter the crate; everything downstream
/// matches on the variant instead of re-inspecting the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Address {
    Direct(PathBuf),
    Tree(String),
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidAddress("empty address".to_string()));
        }
        if trimmed.starts_with(TREE_SCHEME) {
            if trimmed.len() == TREE_SCHEME.len() {
                return Err(AppError::InvalidAddress(format!(
                    "tree handle has no authority: {trimmed}"
                )));
            }
            return Ok(Self::Tree(trimmed.to_string()));
        }
        Ok(Self::Direct(PathBuf::from(trimmed)))
    }

    pub fn direct(path: impl AsRef<Path>) -> Self {
        Self::Direct(path.as_ref().to_path_buf())
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// The string form persisted in the index; also the primary key of the row.
    pub fn key(&self) -> String {
        match self {
            Self::Direct(path) => path.to_string_lossy().to_string(),
            Self::Tree(handle) => handle.clone(),
        }
    }

    /// Last segment of the address, used as a display name.
    pub fn last_segment(&self) -> Option<String> {
        match self {
            Self::Direct(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            Self::Tree(handle) => {
                let rest = handle.strip_prefix(TREE_SCHEME).unwrap_or(handle);
                let mut segments = rest.trim_end_matches('/').split('/');
                // the first segment is the grant authority, not a folder name
                let _authority = segments.next();
                segments
                    .filter(|segment| !segment.is_empty())
                    .last()
                    .map(str::to_string)
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(path) => write!(f, "{}", path.display()),
            Self::Tree(handle) => write!(f, "{handle}"),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_selects_mode_by_prefix() {
        assert_eq!(
            Address::parse("/home/user/Pictures").unwrap(),
            Address::Direct(PathBuf::from("/home/user/Pictures"))
        );
        assert!(Address::parse("content://photos/Camera").unwrap().is_tree());
    }

    #[test]
    fn parse_rejects_empty_and_bare_scheme() {
        assert!(Address::parse("   ").is_err());
        assert!(Address::parse("content://").is_err());
    }

    #[test]
    fn last_segment_skips_authority() {
        assert_eq!(
            Address::parse("content://photos/Camera").unwrap().last_segment(),
            Some("Camera".to_string())
        );
        assert_eq!(Address::parse("content://photos").unwrap().last_segment(), None);
        assert_eq!(
            Address::direct("/tmp/Screenshots").last_segment(),
            Some("Screenshots".to_string())
        );
    }
}
