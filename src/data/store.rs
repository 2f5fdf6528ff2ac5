use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::watch;

use crate::data::migrations;
use crate::error::AppError;

/// SQLite VM steps between cancellation checks of an interruptible read.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Owner of the persisted index.
///
/// All access goes through [`IndexStore::read`] and [`IndexStore::write`], which
/// hand the connection to the `repository` functions. Every successful write
/// bumps a generation counter that live queries subscribe to.
pub struct IndexStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    changes: watch::Sender<u64>,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, AppError> {
        migrations::run_migrations(&conn)?;
        let (changes, _) = watch::channel(0);
        tracing::debug!(path = ?path, "index store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            changes,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Runs a mutation and, if it succeeds, notifies subscribers.
    pub fn write<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        let result = {
            let conn = self.lock();
            f(&conn)
        }?;
        self.changes.send_modify(|generation| *generation += 1);
        Ok(result)
    }

    /// Like [`IndexStore::read`], but SQLite abandons the statement as soon as
    /// `cancel` is raised. An abandoned read returns [`AppError::Cancelled`].
    pub fn read_interruptible<T, F>(&self, cancel: &Arc<AtomicBool>, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::Cancelled);
        }

        let conn = self.lock();
        let flag = cancel.clone();
        conn.progress_handler(
            PROGRESS_CHECK_OPS,
            Some(move || flag.load(Ordering::Relaxed)),
        );
        let result = f(&conn);
        conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|err| if err.is_interrupt() { AppError::Cancelled } else { err })
    }

    /// Receiver that observes a new value after every committed write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository;
    use crate::models::folder::WatchedFolder;

    #[test]
    fn writes_bump_generation_reads_do_not() {
        let store = IndexStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        assert_eq!(store.generation(), 0);

        store
            .read(|conn| repository::list_active_folders(conn))
            .unwrap();
        assert_eq!(store.generation(), 0);

        store
            .write(|conn| repository::insert_folder(conn, &WatchedFolder::new("/a", "a")))
            .unwrap();
        assert_eq!(store.generation(), 1);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn failed_write_does_not_notify() {
        let store = IndexStore::open_in_memory().unwrap();
        let result: Result<(), AppError> =
            store.write(|_| Err(AppError::General("boom".to_string())));
        assert!(result.is_err());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn interruptible_read_honours_raised_flag() {
        let store = IndexStore::open_in_memory().unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let result = store.read_interruptible(&cancel, |conn| repository::index_stats(conn));
        assert!(matches!(result, Err(AppError::Cancelled)));

        cancel.store(false, Ordering::Relaxed);
        let stats = store
            .read_interruptible(&cancel, |conn| repository::index_stats(conn))
            .unwrap();
        assert_eq!(stats.total_images, 0);
    }

    #[test]
    fn interruptible_read_aborts_long_statement() {
        let store = IndexStore::open_in_memory().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let result: Result<i64, AppError> = store.read_interruptible(&cancel, move |conn| {
            flag.store(true, Ordering::Relaxed);
            let n = conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 10000000)
                 SELECT COUNT(*) FROM c",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        });
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("picfinder.db");
        let store = IndexStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.path(), Some(db_path.as_path()));
    }
}
