use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::settings::ScanFrequency;

const SCAN_FREQUENCY_KEY: &str = "scan_frequency";
const LAST_FULL_SCAN_AT_KEY: &str = "last_full_scan_at";

pub fn scan_frequency(conn: &Connection) -> Result<ScanFrequency, AppError> {
    let Some(raw) = repository::get_setting(conn, SCAN_FREQUENCY_KEY)? else {
        return Ok(ScanFrequency::default());
    };
    match ScanFrequency::parse(&raw) {
        Ok(frequency) => Ok(frequency),
        Err(err) => {
            tracing::warn!(value = %raw, error = %err, "ignoring unknown scan frequency");
            Ok(ScanFrequency::default())
        }
    }
}

pub fn set_scan_frequency(conn: &Connection, frequency: ScanFrequency) -> Result<(), AppError> {
    repository::set_setting(conn, SCAN_FREQUENCY_KEY, frequency.as_str())
}

pub fn last_full_scan_at(conn: &Connection) -> Result<i64, AppError> {
    Ok(repository::get_setting(conn, LAST_FULL_SCAN_AT_KEY)?
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(0))
}

pub fn record_full_scan(conn: &Connection, at: i64) -> Result<(), AppError> {
    repository::set_setting(conn, LAST_FULL_SCAN_AT_KEY, &at.to_string())
}

/// Whether the configured frequency asks for a full scan at `now`.
pub fn is_scan_due(conn: &Connection, now: i64) -> Result<bool, AppError> {
    let frequency = scan_frequency(conn)?;
    Ok(frequency.is_due(last_full_scan_at(conn)?, now))
}
