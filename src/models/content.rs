use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContentStatus {
    Pending,
    Processed,
    Failed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Processed => "processed",
            ContentStatus::Failed => "failed",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Processed | ContentStatus::Failed)
    }
}

/// A captured unit of text queued for classification.
///
/// Status only moves forward: `pending` to `processed` or `failed`, never
/// back. Writing the same terminal status twice is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub subject_id: String,
    pub text: String,
    pub captured_at: DateTime<Utc>,
    pub status: ContentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContentItem {
    pub fn pending(
        subject_id: impl Into<String>,
        text: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            subject_id: subject_id.into(),
            text: text.into(),
            captured_at,
            status: ContentStatus::Pending,
            error: None,
        }
    }
}

/// Outcome of classifying one ContentItem. Keyed by the same id as its
/// source item so result lookups are a single point read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub content_item_id: String,
    pub is_blockable: bool,
    pub reason: String,
    pub classified_at: DateTime<Utc>,
}
