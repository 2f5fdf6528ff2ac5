use std::path::Path;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::address::Address;
use crate::models::scan::FileDescriptor;
use crate::services::storage_access::StorageAccess;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Deepest directory level (root = 0) whose files are listed.
pub const MAX_DEPTH: usize = 10;

pub fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
        .unwrap_or(0)
}

/// Lists the image files under a folder, whichever way the folder is addressed.
#[derive(Clone)]
pub struct Enumerator {
    storage: Arc<dyn StorageAccess>,
    max_depth: usize,
}

impl Enumerator {
    pub fn new(storage: Arc<dyn StorageAccess>) -> Self {
        Self {
            storage,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Verifies the root can be listed. Errors are `InvalidAddress` with a
    /// message fit for showing to the user.
    pub fn check_root(&self, folder: &Address) -> Result<(), AppError> {
        match folder {
            Address::Direct(path) => {
                if path.to_str().is_none() {
                    return Err(AppError::InvalidAddress(format!(
                        "Folder path is not valid UTF-8: {}",
                        path.display()
                    )));
                }
                let metadata = std::fs::metadata(path).map_err(|_| {
                    AppError::InvalidAddress(format!("Folder does not exist: {}", path.display()))
                })?;
                if !metadata.is_dir() {
                    return Err(AppError::InvalidAddress(format!(
                        "Path is not a directory: {}",
                        path.display()
                    )));
                }
                std::fs::read_dir(path).map_err(|_| {
                    AppError::InvalidAddress(format!("Cannot read folder: {}", path.display()))
                })?;
                Ok(())
            }
            Address::Tree(handle) => self.storage.open_tree(handle).map_err(|err| {
                AppError::InvalidAddress(format!("Cannot access folder {handle}: {err}"))
            }),
        }
    }

    pub fn list_images(&self, folder: &Address) -> Result<Vec<FileDescriptor>, AppError> {
        self.check_root(folder)?;
        let files = match folder {
            Address::Direct(path) => self.list_direct(path),
            Address::Tree(handle) => self.list_tree(handle),
        };
        tracing::debug!(folder = %folder, count = files.len(), "enumerated image files");
        Ok(files)
    }

    fn list_direct(&self, root: &Path) -> Vec<FileDescriptor> {
        // files sit one level below the directory that holds them
        let walker = walkdir::WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.max_depth + 1)
            .follow_links(true)
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(folder = %root.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // index keys are strings; a lossy key would never map back to the file
            if entry.path().to_str().is_none() {
                tracing::warn!(path = %entry.path().display(), "skipping file with non UTF-8 path");
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_supported_image(&name) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => files.push(FileDescriptor {
                    name,
                    address: Address::direct(entry.path()),
                    last_modified: modified_millis(&metadata),
                    size: metadata.len() as i64,
                }),
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "skipping file without metadata");
                }
            }
        }
        files
    }

    fn list_tree(&self, root: &str) -> Vec<FileDescriptor> {
        let mut files = Vec::new();
        self.walk_tree(root, 0, &mut files);
        files.sort_by(|a, b| a.address.key().cmp(&b.address.key()));
        files
    }

    fn walk_tree(&self, handle: &str, depth: usize, files: &mut Vec<FileDescriptor>) {
        let children = match self.storage.list_children(handle) {
            Ok(children) => children,
            Err(err) => {
                tracing::warn!(handle, error = %err, "cannot list tree directory");
                return;
            }
        };

        for child in children {
            let child = match child {
                Ok(child) => child,
                Err(err) => {
                    tracing::warn!(handle, error = %err, "skipping unreadable tree entry");
                    continue;
                }
            };
            if child.is_dir {
                if depth < self.max_depth {
                    self.walk_tree(&child.handle, depth + 1, files);
                }
            } else if is_supported_image(&child.name) {
                files.push(FileDescriptor {
                    name: child.name,
                    address: Address::Tree(child.handle),
                    last_modified: child.last_modified,
                    size: child.size,
                });
            }
        }
    }
}
