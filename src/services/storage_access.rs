use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::address::TREE_SCHEME;
use crate::scope_path;

/// A child of a tree-handle directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub handle: String,
    pub is_dir: bool,
    pub last_modified: i64,
    pub size: i64,
}

/// Resolves permission-scoped tree handles. Only consulted for `Address::Tree`.
pub trait StorageAccess: Send + Sync {
    /// Fails when the handle cannot be opened as a readable directory.
    fn open_tree(&self, handle: &str) -> Result<(), AppError>;

    /// Lists a directory. The outer error means the directory itself could not
    /// be read; inner errors are per-child and may be skipped.
    fn list_children(&self, handle: &str) -> Result<Vec<Result<TreeEntry, AppError>>, AppError>;

    fn document_exists(&self, handle: &str) -> bool;

    fn read_document(&self, handle: &str) -> Result<Vec<u8>, AppError>;
}

/// Serves `content://<grant>/<relative path>` handles out of directories the
/// user granted explicitly. Nothing outside a granted root is reachable.
#[derive(Debug, Clone, Default)]
pub struct ScopedTreeStorage {
    grants: BTreeMap<String, PathBuf>,
}

impl ScopedTreeStorage {
    pub fn new(grants: BTreeMap<String, PathBuf>) -> Self {
        Self { grants }
    }

    pub fn grant(&mut self, name: impl Into<String>, root: impl Into<PathBuf>) {
        self.grants.insert(name.into(), root.into());
    }

    pub fn root_handle(name: &str) -> String {
        format!("{TREE_SCHEME}{name}")
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, AppError> {
        let rest = handle
            .strip_prefix(TREE_SCHEME)
            .ok_or_else(|| AppError::Storage(format!("not a tree handle: {handle}")))?;
        let (grant, relative) = rest.split_once('/').unwrap_or((rest, ""));
        let root = self
            .grants
            .get(grant)
            .ok_or_else(|| AppError::Storage(format!("no grant for handle: {handle}")))?;
        let resolved = scope_path::join_within(root, relative)
            .ok_or_else(|| AppError::Storage(format!("handle escapes its grant: {handle}")))?;

        // symlinks may still point outside the grant once resolved on disk
        if let (Ok(real_root), Ok(real_target)) = (root.canonicalize(), resolved.canonicalize()) {
            if !scope_path::is_within_scope(
                &real_target.to_string_lossy(),
                &real_root.to_string_lossy(),
            ) {
                return Err(AppError::Storage(format!(
                    "handle resolves outside its grant: {handle}"
                )));
            }
        }
        Ok(resolved)
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
        .unwrap_or(0)
}

fn child_entry(parent_handle: &str, path: &Path) -> Result<TreeEntry, AppError> {
    let name = path
        .file_name()
        .ok_or_else(|| AppError::Storage(format!("unnamed entry: {}", path.display())))?
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Storage(format!("entry name is not UTF-8: {}", path.display())))?;
    let metadata = std::fs::metadata(path)?;
    Ok(TreeEntry {
        handle: format!("{}/{name}", parent_handle.trim_end_matches('/')),
        name,
        is_dir: metadata.is_dir(),
        last_modified: modified_millis(&metadata),
        size: metadata.len() as i64,
    })
}

impl StorageAccess for ScopedTreeStorage {
    fn open_tree(&self, handle: &str) -> Result<(), AppError> {
        let dir = self.resolve(handle)?;
        if !dir.is_dir() {
            return Err(AppError::Storage(format!("cannot access folder: {handle}")));
        }
        std::fs::read_dir(&dir)?;
        Ok(())
    }

    fn list_children(&self, handle: &str) -> Result<Vec<Result<TreeEntry, AppError>>, AppError> {
        let dir = self.resolve(handle)?;
        let children = std::fs::read_dir(&dir)?
            .map(|entry| {
                entry
                    .map_err(AppError::from)
                    .and_then(|entry| child_entry(handle, &entry.path()))
            })
            .collect();
        Ok(children)
    }

    fn document_exists(&self, handle: &str) -> bool {
        self.resolve(handle).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read_document(&self, handle: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(handle)?;
        Ok(std::fs::read(path)?)
    }
}
