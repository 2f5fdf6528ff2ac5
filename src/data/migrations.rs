use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS folders (
    folder_path TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    last_scan_at INTEGER NOT NULL DEFAULT 0,
    image_count INTEGER NOT NULL DEFAULT 0,
    is_active BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS images (
    file_path TEXT PRIMARY KEY NOT NULL,
    file_name TEXT NOT NULL,
    folder_path TEXT NOT NULL,
    extracted_text TEXT NOT NULL DEFAULT '',
    last_modified INTEGER NOT NULL,
    file_size INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_folder ON images(folder_path);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
