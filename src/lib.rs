//! Incremental OCR index over watched image folders.
//!
//! Folders are reconciled against a SQLite index by [`Scanner`]: only added or
//! modified images go through text extraction, vanished ones are dropped.
//! [`SearchEngine`] answers conjunctive keyword queries over the extracted
//! text, file names and folder addresses, either once or as a live query.

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod models;
pub(crate) mod scope_path;
pub mod services;
pub mod state;

pub use config::AppConfig;
pub use data::IndexStore;
pub use error::AppError;
pub use models::address::Address;
pub use models::folder::{IndexStats, WatchedFolder};
pub use models::image::IndexedImage;
pub use models::scan::{ScanProgress, ScanResult};
pub use models::search::SearchSnapshot;
pub use models::settings::ScanFrequency;
pub use services::ocr_service::{CommandRecognizer, ImageSource, TextExtractor, TextRecognizer};
pub use services::scan_service::Scanner;
pub use services::search_service::{LiveSearch, SearchEngine};
pub use services::storage_access::{ScopedTreeStorage, StorageAccess};
pub use state::AppState;
