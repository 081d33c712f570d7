use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reconciled per-app screen time for one subject. One logical row per
/// (subject, app); each aggregation cycle overwrites the previous row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregate {
    pub subject_id: String,
    pub app_id: String,
    pub daily_minutes: u64,
    pub weekly_minutes: u64,
    pub last_updated: DateTime<Utc>,
}

impl UsageAggregate {
    /// Document id for the (subject, app) row.
    pub fn doc_id(subject_id: &str, app_id: &str) -> String {
        format!("{subject_id}_{app_id}")
    }
}
