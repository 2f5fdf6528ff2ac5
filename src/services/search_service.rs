use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::data::{repository, IndexStore};
use crate::error::AppError;
use crate::models::image::IndexedImage;
use crate::models::search::SearchSnapshot;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Splits a raw query on runs of whitespace. A blank query has no keywords.
pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_string).collect()
}

pub fn search(store: &IndexStore, query: &str, limit: Option<usize>) -> Result<Vec<IndexedImage>, AppError> {
    let keywords = tokenize(query);
    if keywords.is_empty() {
        return Ok(Vec::new());
    }
    store.read(|conn| repository::search_images(conn, &keywords, limit))
}

/// Same as [`search`], but the store query is abandoned once `cancel` is raised.
pub fn search_interruptible(
    store: &IndexStore,
    query: &str,
    limit: Option<usize>,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<IndexedImage>, AppError> {
    let keywords = tokenize(query);
    if keywords.is_empty() {
        return Ok(Vec::new());
    }
    store.read_interruptible(cancel, |conn| repository::search_images(conn, &keywords, limit))
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<IndexStore>,
    debounce: Duration,
    limit: Option<usize>,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self {
            store,
            debounce: DEFAULT_DEBOUNCE,
            limit: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn search(&self, query: &str) -> Result<Vec<IndexedImage>, AppError> {
        search(&self.store, query, self.limit)
    }

    /// Starts a live query. Must be called from inside a tokio runtime.
    pub fn subscribe(&self) -> LiveSearch {
        let (query_tx, query_rx) = watch::channel(String::new());
        let (results_tx, results_rx) = watch::channel(SearchSnapshot::empty(""));

        let task = LiveSearchTask {
            store: self.store.clone(),
            changes: self.store.subscribe(),
            queries: query_rx,
            results: results_tx,
            debounce: self.debounce,
            limit: self.limit,
        };

        LiveSearch {
            query_tx,
            results: results_rx,
            task: tokio::spawn(task.run()),
        }
    }
}

/// A search whose results follow both the latest query and the index contents.
/// Dropping it stops the background evaluation.
pub struct LiveSearch {
    query_tx: watch::Sender<String>,
    results: watch::Receiver<SearchSnapshot>,
    task: JoinHandle<()>,
}

impl LiveSearch {
    /// Replaces the current query. Repeating the same query is a no-op.
    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.query_tx.send_if_modified(|current| {
            if *current == query {
                false
            } else {
                *current = query;
                true
            }
        });
    }

    pub fn results(&self) -> watch::Receiver<SearchSnapshot> {
        self.results.clone()
    }

    pub fn latest(&self) -> SearchSnapshot {
        self.results.borrow().clone()
    }
}

impl Drop for LiveSearch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct LiveSearchTask {
    store: Arc<IndexStore>,
    changes: watch::Receiver<u64>,
    queries: watch::Receiver<String>,
    results: watch::Sender<SearchSnapshot>,
    debounce: Duration,
    limit: Option<usize>,
}

impl LiveSearchTask {
    async fn run(mut self) {
        let mut evaluated: Option<String> = None;
        let mut query_pending = false;

        loop {
            if !query_pending {
                tokio::select! {
                    changed = self.queries.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        query_pending = true;
                    }
                    changed = self.changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = self.results.closed() => break,
                }
            }

            let query = if query_pending {
                if !self.settle_query().await {
                    break;
                }
                query_pending = false;
                let query = self.queries.borrow().clone();
                if evaluated.as_deref() == Some(query.as_str()) {
                    continue;
                }
                query
            } else {
                let Some(previous) = evaluated.clone() else {
                    continue;
                };
                // a scan writes in bursts; let it settle before re-running
                tokio::select! {
                    changed = self.queries.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        query_pending = true;
                        continue;
                    }
                    _ = tokio::time::sleep(self.debounce) => {}
                }
                let _ = self.changes.borrow_and_update();
                previous
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let mut job = {
                let store = self.store.clone();
                let query = query.clone();
                let cancel = cancel.clone();
                let limit = self.limit;
                tokio::task::spawn_blocking(move || search_interruptible(&store, &query, limit, &cancel))
            };

            tokio::select! {
                joined = &mut job => {
                    let results = match joined {
                        Ok(Ok(results)) => results,
                        Ok(Err(err)) => {
                            tracing::warn!(query = %query, error = %err, "search failed");
                            Vec::new()
                        }
                        Err(err) => {
                            tracing::warn!(query = %query, error = %err, "search task failed");
                            Vec::new()
                        }
                    };
                    tracing::debug!(query = %query, hits = results.len(), "search evaluated");
                    evaluated = Some(query.clone());
                    self.results.send_replace(SearchSnapshot {
                        query,
                        results: Arc::new(results),
                    });
                }
                changed = self.queries.changed() => {
                    cancel.store(true, Ordering::Relaxed);
                    if changed.is_err() {
                        break;
                    }
                    tracing::debug!(query = %query, "search superseded");
                    query_pending = true;
                }
            }
        }
    }

    /// Waits until the query has been stable for the debounce interval.
    /// Returns false once the query sender is gone.
    async fn settle_query(&mut self) -> bool {
        loop {
            tokio::select! {
                changed = self.queries.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(self.debounce) => return true,
            }
        }
    }
}
