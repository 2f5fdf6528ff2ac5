use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::IndexStore;
use crate::error::AppError;
use crate::services::enumerator::Enumerator;
use crate::services::ocr_service::{CommandRecognizer, TextExtractor, TextRecognizer};
use crate::services::scan_service::Scanner;
use crate::services::search_service::SearchEngine;
use crate::services::storage_access::{ScopedTreeStorage, StorageAccess};

/// Everything a host needs, built once at startup and dropped at exit.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<IndexStore>,
    pub storage: Arc<dyn StorageAccess>,
    pub scanner: Arc<Scanner>,
    pub search: SearchEngine,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let store = Arc::new(IndexStore::open(&config.database_path)?);
        let recognizer = CommandRecognizer::new(&config.ocr_command, &config.ocr_language)
            .with_timeout(config.extraction_timeout());
        tracing::debug!(
            db = %config.database_path.display(),
            ocr = %config.ocr_command,
            "opened index"
        );
        Ok(Self::with_parts(config, store, Arc::new(recognizer)))
    }

    pub fn with_parts(
        config: AppConfig,
        store: Arc<IndexStore>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        let storage: Arc<dyn StorageAccess> =
            Arc::new(ScopedTreeStorage::new(config.tree_grants.clone()));
        let enumerator = Enumerator::new(storage.clone()).with_max_depth(config.max_depth);
        let extractor = TextExtractor::new(recognizer, storage.clone());
        let scanner = Scanner::new(store.clone(), storage.clone(), enumerator, extractor)
            .with_checkpoint_interval(config.checkpoint_interval);
        let search = SearchEngine::new(store.clone())
            .with_debounce(config.search_debounce())
            .with_limit(config.search_limit);

        Self {
            config,
            store,
            storage,
            scanner: Arc::new(scanner),
            search,
        }
    }
}
