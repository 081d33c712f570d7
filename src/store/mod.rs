mod memory;

pub use memory::MemoryStore;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Collection paths used by the agents. The dashboard side writes
/// `LOCK_LISTS` and `DEVICE_LOCKS`; the device writes the rest.
pub mod collections {
    pub const LOCK_LISTS: &str = "lockLists";
    pub const DEVICE_LOCKS: &str = "deviceLocks";
    pub const CONTENT_ITEMS: &str = "contentItems";
    pub const CLASSIFICATION_RESULTS: &str = "classificationResults";
    pub const USAGE_AGGREGATES: &str = "usageAggregates";
}

/// A document snapshot: store-assigned id plus a flat field map.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .with_context(|| format!("failed to decode document {}", self.id))
    }
}

/// Serialize a model into a field map for a store write.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected an object, got {other}")),
    }
}

/// Equality-filter query over one collection, optionally pinned to a single
/// document id. This is the full query surface the agents need.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub doc_id: Option<String>,
    pub filters: Vec<(String, Value)>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            doc_id: None,
            filters: Vec::new(),
        }
    }

    pub fn doc(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(id) = &self.doc_id {
            if id != &doc.id {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(field, value)| doc.fields.get(field) == Some(value))
    }
}

/// Client for the remote shared state store.
///
/// The transport is not part of this crate; this trait is the seam the
/// agents program against. Subscriptions are push-based, at-least-once, and
/// may replay documents the subscriber has already seen — consumers must
/// tolerate duplicates. A subscription ends when its receiver is dropped.
#[async_trait]
pub trait RemoteStateClient: Send + Sync {
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>>;

    /// Create or replace a document. With `merge`, existing fields not named
    /// in `fields` are preserved.
    async fn set(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
        merge: bool,
    ) -> Result<()>;

    /// Update fields of an existing document; fails if it does not exist.
    async fn update(&self, collection: &str, doc_id: &str, fields: Map<String, Value>)
        -> Result<()>;

    /// Insert a new document with a store-assigned id, returned to the caller.
    async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;

    /// Subscribe to documents matching `query`. Current matches are
    /// delivered first, then every subsequent write that matches.
    async fn subscribe(&self, query: Query) -> Result<mpsc::Receiver<Document>>;
}
