use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::data::{repository, IndexStore};
use crate::error::AppError;
use crate::models::address::Address;
use crate::models::image::IndexedImage;
use crate::models::scan::{ScanProgress, ScanResult};
use crate::services::change_detector::{self, ChangeKind};
use crate::services::enumerator::Enumerator;
use crate::services::ocr_service::TextExtractor;
use crate::services::settings_service;
use crate::services::storage_access::StorageAccess;

pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FolderTotals {
    processed: usize,
    new: usize,
}

/// Reconciles watched folders with the index.
///
/// A scanner runs synchronously on the caller's thread; hosts put it on a
/// blocking worker. Progress is published on a watch channel and a scan can be
/// stopped between files with [`Scanner::cancel`]. Callers must not run two
/// scans of the same folder at once.
pub struct Scanner {
    store: Arc<IndexStore>,
    storage: Arc<dyn StorageAccess>,
    enumerator: Enumerator,
    extractor: TextExtractor,
    checkpoint_interval: usize,
    progress: watch::Sender<ScanProgress>,
    cancel_flag: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(
        store: Arc<IndexStore>,
        storage: Arc<dyn StorageAccess>,
        enumerator: Enumerator,
        extractor: TextExtractor,
    ) -> Self {
        let (progress, _) = watch::channel(ScanProgress::Idle);
        Self {
            store,
            storage,
            enumerator,
            extractor,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            progress,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Shares a cancellation flag owned by the host.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    pub fn current_progress(&self) -> ScanProgress {
        self.progress.borrow().clone()
    }

    /// Asks the running scan to stop after the file it is working on. A request
    /// made before a scan starts stops that scan. The flag clears once a scan ends.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    fn publish(&self, progress: ScanProgress) {
        self.progress.send_replace(progress);
    }

    pub fn scan_folder(&self, folder: &Address) -> ScanResult {
        tracing::info!(folder = %folder, "starting folder scan");

        let result = match self.reconcile_folder(folder) {
            Ok(totals) => ScanResult::Success {
                processed: totals.processed,
                new: totals.new,
            },
            Err(err) => {
                tracing::error!(folder = %folder, error = %err, "folder scan failed");
                ScanResult::error(failure_message(err))
            }
        };

        self.cancel_flag.store(false, Ordering::Relaxed);
        self.publish(ScanProgress::from(&result));
        result
    }

    /// Cleans stale entries, then scans every active folder in turn. A folder
    /// that fails contributes nothing; the others still run.
    pub fn scan_all_folders(&self) -> ScanResult {
        tracing::info!("starting scan of all folders");

        let result = self.scan_all_inner();
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.publish(ScanProgress::from(&result));
        result
    }

    fn scan_all_inner(&self) -> ScanResult {
        self.publish(ScanProgress::Scanning {
            current_item: "Cleaning up deleted images".to_string(),
            processed: 0,
            total: 0,
        });
        match self.cleanup_deleted_images() {
            Ok(removed) => tracing::debug!(removed, "cleanup pass finished"),
            Err(err) => tracing::warn!(error = %err, "cleanup pass failed"),
        }

        let folders = match self.store.read(repository::list_active_folders) {
            Ok(folders) => folders,
            Err(err) => {
                return ScanResult::error(format!("Error scanning all folders: {err}"));
            }
        };

        let mut totals = FolderTotals::default();
        for folder in folders {
            if self.is_cancelled() {
                return ScanResult::error(failure_message(AppError::Cancelled));
            }

            let address = match Address::parse(&folder.folder_path) {
                Ok(address) => address,
                Err(err) => {
                    tracing::error!(folder = %folder.folder_path, error = %err, "skipping folder");
                    continue;
                }
            };

            match self.reconcile_folder(&address) {
                Ok(folder_totals) => {
                    tracing::info!(
                        folder = %folder.display_name,
                        processed = folder_totals.processed,
                        new = folder_totals.new,
                        "folder scanned"
                    );
                    totals.processed += folder_totals.processed;
                    totals.new += folder_totals.new;
                }
                Err(AppError::Cancelled) => {
                    return ScanResult::error(failure_message(AppError::Cancelled));
                }
                Err(err) => {
                    tracing::error!(folder = %folder.display_name, error = %err, "folder scan failed, continuing");
                }
            }
        }

        if let Err(err) = self
            .store
            .write(|conn| settings_service::record_full_scan(conn, now_millis()))
        {
            tracing::warn!(error = %err, "failed to record full scan time");
        }

        tracing::info!(processed = totals.processed, new = totals.new, "all folders scanned");
        ScanResult::Success {
            processed: totals.processed,
            new: totals.new,
        }
    }

    fn reconcile_folder(&self, folder: &Address) -> Result<FolderTotals, AppError> {
        let folder_key = folder.key();
        self.publish(ScanProgress::Scanning {
            current_item: "Initializing...".to_string(),
            processed: 0,
            total: 0,
        });

        let files = self.enumerator.list_images(folder)?;
        let total = files.len();

        let previous: HashMap<String, IndexedImage> = self
            .store
            .read(|conn| repository::images_in_folder(conn, &folder_key))?
            .into_iter()
            .map(|image| (image.file_path.clone(), image))
            .collect();
        let changes = change_detector::detect_changes(&previous, &files);
        tracing::debug!(
            folder = %folder,
            unchanged = changes.unchanged.len(),
            to_process = changes.to_process.len(),
            to_delete = changes.to_delete.len(),
            "computed folder changes"
        );

        if !changes.to_delete.is_empty() {
            let removed = self
                .store
                .write(|conn| repository::delete_images(conn, &changes.to_delete))?;
            tracing::debug!(folder = %folder, removed, "removed deleted images");
        }

        let mut totals = FolderTotals {
            processed: changes.unchanged.len(),
            new: 0,
        };
        let mut cancelled = false;

        for pending in &changes.to_process {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }

            let file = &pending.file;
            self.publish(ScanProgress::Scanning {
                current_item: file.name.clone(),
                processed: totals.processed,
                total,
            });

            let image = IndexedImage {
                file_path: file.address.key(),
                file_name: file.name.clone(),
                folder_path: folder_key.clone(),
                extracted_text: self.extractor.extract_text(&file.address),
                last_modified: file.last_modified,
                file_size: file.size,
                indexed_at: now_millis(),
            };

            match self.store.write(|conn| repository::upsert_image(conn, &image)) {
                Ok(()) => {
                    if pending.kind == ChangeKind::Added {
                        totals.new += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %image.file_path, error = %err, "failed to save image");
                }
            }
            totals.processed += 1;

            if totals.processed % self.checkpoint_interval == 0 {
                if let Err(err) = self.write_folder_count(&folder_key) {
                    tracing::warn!(folder = %folder, error = %err, "progress checkpoint failed");
                }
            }
        }

        // count from the store, not from the loop, so concurrent writers are reflected
        self.write_folder_count(&folder_key)?;

        if cancelled {
            tracing::info!(folder = %folder, processed = totals.processed, "scan cancelled");
            return Err(AppError::Cancelled);
        }
        Ok(totals)
    }

    fn write_folder_count(&self, folder_key: &str) -> Result<i64, AppError> {
        self.store.write(|conn| {
            let count = repository::count_images_in_folder(conn, folder_key)?;
            repository::update_folder_scan_info(conn, folder_key, now_millis(), count)?;
            Ok(count)
        })
    }

    /// Drops index entries whose backing file is gone, for every active folder.
    pub fn cleanup_deleted_images(&self) -> Result<usize, AppError> {
        let folders = self.store.read(repository::list_active_folders)?;
        let mut removed_total = 0;

        for folder in folders {
            let images = self
                .store
                .read(|conn| repository::images_in_folder(conn, &folder.folder_path))?;
            let gone: Vec<String> = images
                .iter()
                .filter(|image| !self.backing_file_exists(&image.file_path))
                .map(|image| image.file_path.clone())
                .collect();

            let removed = if gone.is_empty() {
                0
            } else {
                self.store.write(|conn| repository::delete_images(conn, &gone))?
            };
            self.store.write(|conn| {
                repository::update_folder_scan_info(
                    conn,
                    &folder.folder_path,
                    folder.last_scan_at,
                    images.len().saturating_sub(removed) as i64,
                )
            })?;

            if removed > 0 {
                tracing::debug!(folder = %folder.display_name, removed, "removed stale index entries");
            }
            removed_total += removed;
        }

        Ok(removed_total)
    }

    fn backing_file_exists(&self, file_path: &str) -> bool {
        match Address::parse(file_path) {
            Ok(Address::Direct(path)) => path.exists(),
            Ok(Address::Tree(handle)) => self.storage.document_exists(&handle),
            Err(_) => false,
        }
    }
}

fn failure_message(err: AppError) -> String {
    match err {
        AppError::InvalidAddress(message) => message,
        AppError::Cancelled => "Scan cancelled".to_string(),
        other => format!("Error scanning folder: {other}"),
    }
}
