use serde::{Deserialize, Serialize};

use crate::error::AppError;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFrequency {
    #[default]
    Daily,
    Weekly,
    ManualOnly,
}

impl ScanFrequency {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "manual" | "manual_only" => Ok(Self::ManualOnly),
            other => Err(AppError::General(format!(
                "invalid scan frequency '{other}' (expected: daily|weekly|manual)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::ManualOnly => "manual_only",
        }
    }

    pub fn interval_millis(self) -> Option<i64> {
        match self {
            Self::Daily => Some(DAY_MILLIS),
            Self::Weekly => Some(7 * DAY_MILLIS),
            Self::ManualOnly => None,
        }
    }

    /// Whether a periodic full scan should run now, given when the last one finished.
    pub fn is_due(self, last_scan_at: i64, now: i64) -> bool {
        match self.interval_millis() {
            Some(interval) => last_scan_at <= 0 || now.saturating_sub(last_scan_at) >= interval,
            None => false,
        }
    }
}
