use std::collections::{HashMap, HashSet};

use crate::models::image::IndexedImage;
use crate::models::scan::FileDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub file: FileDescriptor,
    pub kind: ChangeKind,
}

/// Difference between what the index remembers for a folder and what is on disk now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub unchanged: Vec<String>,
    pub to_process: Vec<PendingFile>,
    pub to_delete: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_process.is_empty() && self.to_delete.is_empty()
    }
}

/// Only the address and the modification time decide; size is metadata.
pub fn detect_changes(
    previous: &HashMap<String, IndexedImage>,
    current: &[FileDescriptor],
) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen = HashSet::with_capacity(current.len());

    for file in current {
        let key = file.address.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        match previous.get(&key) {
            Some(existing) if existing.last_modified == file.last_modified => {
                changes.unchanged.push(key);
            }
            Some(_) => changes.to_process.push(PendingFile {
                file: file.clone(),
                kind: ChangeKind::Modified,
            }),
            None => changes.to_process.push(PendingFile {
                file: file.clone(),
                kind: ChangeKind::Added,
            }),
        }
    }

    changes.to_delete = previous
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    changes.to_delete.sort();

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::address::Address;

    fn descriptor(path: &str, mtime: i64, size: i64) -> FileDescriptor {
        FileDescriptor {
            name: path.rsplit('/').next().unwrap().to_string(),
            address: Address::direct(path),
            last_modified: mtime,
            size,
        }
    }

    fn indexed(path: &str, mtime: i64, size: i64) -> (String, IndexedImage) {
        (
            path.to_string(),
            IndexedImage {
                file_path: path.to_string(),
                file_name: path.rsplit('/').next().unwrap().to_string(),
                folder_path: "/pics".to_string(),
                extracted_text: String::new(),
                last_modified: mtime,
                file_size: size,
                indexed_at: 0,
            },
        )
    }

    #[test]
    fn classifies_added_modified_unchanged_deleted() {
        let previous: HashMap<_, _> = [
            indexed("/pics/a.png", 1, 10),
            indexed("/pics/b.png", 1, 10),
            indexed("/pics/c.png", 1, 10),
        ]
        .into_iter()
        .collect();
        let current = vec![
            descriptor("/pics/a.png", 2, 10),
            descriptor("/pics/c.png", 1, 10),
            descriptor("/pics/d.png", 5, 10),
        ];

        let changes = detect_changes(&previous, &current);
        assert_eq!(changes.unchanged, vec!["/pics/c.png"]);
        assert_eq!(changes.to_delete, vec!["/pics/b.png"]);

        let pending: Vec<(String, ChangeKind)> = changes
            .to_process
            .iter()
            .map(|p| (p.file.address.key(), p.kind))
            .collect();
        assert_eq!(
            pending,
            vec![
                ("/pics/a.png".to_string(), ChangeKind::Modified),
                ("/pics/d.png".to_string(), ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn size_change_alone_is_not_a_modification() {
        let previous: HashMap<_, _> = [indexed("/pics/a.png", 7, 10)].into_iter().collect();
        let changes = detect_changes(&previous, &[descriptor("/pics/a.png", 7, 99_999)]);
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged.len(), 1);
    }

    #[test]
    fn empty_listing_deletes_everything() {
        let previous: HashMap<_, _> = [indexed("/pics/a.png", 1, 1), indexed("/pics/b.png", 1, 1)]
            .into_iter()
            .collect();
        let changes = detect_changes(&previous, &[]);
        assert_eq!(changes.to_delete, vec!["/pics/a.png", "/pics/b.png"]);
        assert!(changes.to_process.is_empty());
    }

    #[test]
    fn fresh_folder_processes_everything() {
        let changes = detect_changes(
            &HashMap::new(),
            &[descriptor("/pics/a.png", 1, 1), descriptor("/pics/a.png", 1, 1)],
        );
        assert_eq!(changes.to_process.len(), 1);
        assert_eq!(changes.to_process[0].kind, ChangeKind::Added);
        assert!(changes.to_delete.is_empty());
    }
}
