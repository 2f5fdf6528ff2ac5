use std::sync::Arc;

use tokio::sync::watch;

use crate::data::{repository, IndexStore};
use crate::error::AppError;
use crate::models::address::Address;
use crate::models::folder::{IndexStats, WatchedFolder};

const FALLBACK_DISPLAY_NAME: &str = "Selected Folder";

fn display_name_for(address: &Address) -> String {
    address
        .last_segment()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}

/// Starts watching a folder. An inactive record for the same address is
/// replaced by a fresh one; an active one is an error.
pub fn add_folder(store: &IndexStore, address: &Address) -> Result<WatchedFolder, AppError> {
    if let Address::Direct(path) = address {
        if !path.is_dir() {
            return Err(AppError::InvalidAddress(format!(
                "Invalid folder path: {}",
                path.display()
            )));
        }
    }

    let key = address.key();
    let folder = WatchedFolder::new(key.clone(), display_name_for(address));

    store.write(|conn| {
        match repository::get_folder(conn, &key)? {
            Some(existing) if existing.is_active => {
                return Err(AppError::General(format!("Folder already added: {key}")));
            }
            Some(_) => {
                repository::delete_folder(conn, &key)?;
            }
            None => {}
        }
        repository::insert_folder(conn, &folder)
    })?;

    tracing::info!(folder = %address, name = %folder.display_name, "folder added");
    Ok(folder)
}

/// Soft-deletes the folder and drops every image indexed under it.
pub fn remove_folder(store: &IndexStore, address: &Address) -> Result<usize, AppError> {
    let key = address.key();
    let removed = store.write(|conn| {
        if repository::deactivate_folder(conn, &key)? == 0 {
            return Err(AppError::General(format!("Folder not found: {key}")));
        }
        repository::delete_images_in_folder(conn, &key)
    })?;
    tracing::info!(folder = %address, removed, "folder removed");
    Ok(removed)
}

pub fn list_active_folders(store: &IndexStore) -> Result<Vec<WatchedFolder>, AppError> {
    store.read(repository::list_active_folders)
}

pub fn purge_inactive_folders(store: &IndexStore) -> Result<usize, AppError> {
    store.write(repository::purge_inactive_folders)
}

/// Empties the index but keeps the folders, which read as never scanned afterwards.
pub fn clear_index(store: &IndexStore) -> Result<usize, AppError> {
    store.write(|conn| {
        let removed = repository::delete_all_images(conn)?;
        repository::reset_active_folder_scan_info(conn)?;
        Ok(removed)
    })
}

pub fn delete_orphan_images(store: &IndexStore) -> Result<usize, AppError> {
    store.write(repository::delete_orphan_images)
}

pub fn index_stats(store: &IndexStore) -> Result<IndexStats, AppError> {
    store.read(repository::index_stats)
}

/// Live list of active folders, refreshed after every store write. The
/// refresher task ends once all receivers are dropped.
pub fn watch_active_folders(store: Arc<IndexStore>) -> Result<watch::Receiver<Vec<WatchedFolder>>, AppError> {
    let mut changes = store.subscribe();
    let initial = store.read(repository::list_active_folders)?;
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }

            let reader = store.clone();
            match tokio::task::spawn_blocking(move || reader.read(repository::list_active_folders)).await {
                Ok(Ok(folders)) => {
                    tx.send_replace(folders);
                }
                Ok(Err(err)) => tracing::warn!(error = %err, "failed to refresh active folders"),
                Err(err) => tracing::warn!(error = %err, "active folder refresh task failed"),
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::IndexedImage;
    use std::time::Duration;

    fn image(path: &str, folder: &str) -> IndexedImage {
        IndexedImage {
            file_path: path.to_string(),
            file_name: "x.png".to_string(),
            folder_path: folder.to_string(),
            extracted_text: "text".to_string(),
            last_modified: 1,
            file_size: 1,
            indexed_at: 1,
        }
    }

    #[test]
    fn add_rejects_missing_directory() {
        let store = IndexStore::open_in_memory().unwrap();
        let result = add_folder(&store, &Address::direct("/nonexistent/picfinder/dir"));
        assert!(matches!(result, Err(AppError::InvalidAddress(_))));
    }

    #[test]
    fn add_uses_last_segment_as_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("Screenshots");
        std::fs::create_dir(&sub).unwrap();
        let store = IndexStore::open_in_memory().unwrap();

        let folder = add_folder(&store, &Address::direct(&sub)).unwrap();
        assert_eq!(folder.display_name, "Screenshots");
        assert!(folder.is_active);

        let tree = add_folder(&store, &Address::parse("content://photos").unwrap()).unwrap();
        assert_eq!(tree.display_name, "Selected Folder");
    }

    #[test]
    fn add_twice_fails_but_reactivation_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open_in_memory().unwrap();
        let address = Address::direct(dir.path());

        add_folder(&store, &address).unwrap();
        assert!(add_folder(&store, &address).is_err());

        store
            .write(|conn| repository::update_folder_scan_info(conn, &address.key(), 99, 5))
            .unwrap();
        remove_folder(&store, &address).unwrap();
        assert!(list_active_folders(&store).unwrap().is_empty());

        let fresh = add_folder(&store, &address).unwrap();
        let stored = store
            .read(|conn| repository::get_folder(conn, &address.key()))
            .unwrap()
            .unwrap();
        assert_eq!(stored, fresh);
        assert_eq!(stored.image_count, 0);
        assert_eq!(stored.last_scan_at, 0);
    }

    #[test]
    fn remove_cascades_to_images() {
        let store = IndexStore::open_in_memory().unwrap();
        let address = Address::parse("content://photos").unwrap();
        add_folder(&store, &address).unwrap();
        store
            .write(|conn| {
                repository::upsert_image(conn, &image("content://photos/a.png", "content://photos"))?;
                repository::upsert_image(conn, &image("/other/b.png", "/other"))
            })
            .unwrap();

        assert_eq!(remove_folder(&store, &address).unwrap(), 1);
        assert_eq!(index_stats(&store).unwrap().total_images, 1);
        assert_eq!(purge_inactive_folders(&store).unwrap(), 1);
        assert!(remove_folder(&store, &address).is_err());
    }

    #[test]
    fn clear_keeps_folders_and_orphans_are_removed() {
        let store = IndexStore::open_in_memory().unwrap();
        let address = Address::parse("content://photos").unwrap();
        add_folder(&store, &address).unwrap();
        store
            .write(|conn| {
                repository::upsert_image(conn, &image("content://photos/a.png", "content://photos"))?;
                repository::upsert_image(conn, &image("/orphan/b.png", "/orphan"))
            })
            .unwrap();

        assert_eq!(delete_orphan_images(&store).unwrap(), 1);
        assert_eq!(clear_index(&store).unwrap(), 1);
        let stats = index_stats(&store).unwrap();
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.active_folders, 1);
    }

    #[tokio::test]
    async fn watched_folders_follow_store_changes() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let mut folders = watch_active_folders(store.clone()).unwrap();
        assert!(folders.borrow().is_empty());

        add_folder(&store, &Address::parse("content://photos").unwrap()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                folders.changed().await.unwrap();
                if folders.borrow().len() == 1 {
                    break;
                }
            }
        })
        .await
        .expect("folder list should refresh");
    }
}
