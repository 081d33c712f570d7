use serde::{Deserialize, Serialize};

/// Identity of a supervised device, as issued by the identity provider.
/// Opaque; used only as a key prefix for the device's remote documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Set of application identifiers currently blocked for a subject.
/// Written by the parent-facing dashboard; read-only on the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockList {
    #[serde(default)]
    pub apps: Vec<String>,
}

impl LockList {
    pub fn contains(&self, app_id: &str) -> bool {
        self.apps.iter().any(|app| app == app_id)
    }
}

/// Whole-device lock toggle. A missing document is equivalent to unlocked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLockFlag {
    #[serde(default)]
    pub is_locked: bool,
}
