use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{Document, Query, RemoteStateClient};

const SUBSCRIPTION_BUFFER: usize = 64;

/// In-memory reference implementation of [`RemoteStateClient`].
///
/// Backs the test suite and the dev binary. Deliveries are pushed to
/// subscribers after each matching write; a fresh subscription replays the
/// current matches first, so a write racing a new subscription can be seen
/// twice. That mirrors the at-least-once contract consumers already handle.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Watcher {
    query: Query,
    tx: mpsc::Sender<Document>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    watchers: Vec<Watcher>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    async fn write(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
        merge: bool,
        require_existing: bool,
    ) -> Result<()> {
        let (doc, recipients) = {
            let mut inner = self.inner.lock().await;
            let docs = inner.collections.entry(collection.to_string()).or_default();

            if require_existing && !docs.contains_key(doc_id) {
                return Err(anyhow!("document {collection}/{doc_id} does not exist"));
            }

            let stored = if merge {
                let current = docs.entry(doc_id.to_string()).or_default();
                current.extend(fields);
                current.clone()
            } else {
                docs.insert(doc_id.to_string(), fields.clone());
                fields
            };

            let doc = Document {
                id: doc_id.to_string(),
                fields: stored,
            };
            let recipients = collect_recipients(&mut inner, collection, &doc);
            (doc, recipients)
        };

        deliver(recipients, doc).await;
        Ok(())
    }
}

impl MemoryStore {
    /// Ids currently stored in a collection. Dev/test introspection; not part
    /// of the client contract.
    pub async fn doc_ids(&self, collection: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Senders whose query matches `doc`. Dead subscriptions are pruned here so
/// the watcher list does not grow without bound.
fn collect_recipients(inner: &mut Inner, collection: &str, doc: &Document) -> Vec<mpsc::Sender<Document>> {
    inner.watchers.retain(|w| !w.tx.is_closed());
    inner
        .watchers
        .iter()
        .filter(|w| w.query.collection == collection && w.query.matches(doc))
        .map(|w| w.tx.clone())
        .collect()
}

// Sends happen outside the store lock so a slow subscriber cannot stall
// unrelated writers.
async fn deliver(recipients: Vec<mpsc::Sender<Document>>, doc: Document) {
    for tx in recipients {
        let _ = tx.send(doc.clone()).await;
    }
}

#[async_trait]
impl RemoteStateClient for MemoryStore {
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(doc_id))
            .map(|fields| Document {
                id: doc_id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn set(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
        merge: bool,
    ) -> Result<()> {
        self.write(collection, doc_id, fields, merge, false).await
    }

    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.write(collection, doc_id, fields, true, true).await
    }

    async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        let doc_id = Uuid::new_v4().to_string();
        self.write(collection, &doc_id, fields, false, false).await?;
        Ok(doc_id)
    }

    async fn subscribe(&self, query: Query) -> Result<mpsc::Receiver<Document>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let snapshot: Vec<Document> = {
            let mut inner = self.inner.lock().await;
            let snapshot = inner
                .collections
                .get(&query.collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, fields)| Document {
                            id: id.clone(),
                            fields: fields.clone(),
                        })
                        .filter(|doc| query.matches(doc))
                        .collect()
                })
                .unwrap_or_default();

            inner.watchers.push(Watcher {
                query,
                tx: tx.clone(),
            });
            snapshot
        };

        // Replayed from a task: a snapshot larger than the channel buffer
        // must not stall the subscribe call itself.
        tokio::spawn(async move {
            for doc in snapshot {
                if tx.send(doc).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store
            .set("deviceLocks", "subj-1", fields(&[("isLocked", json!(true))]), false)
            .await
            .unwrap();

        let doc = store.get("deviceLocks", "subj-1").await.unwrap().unwrap();
        assert_eq!(doc.fields.get("isLocked"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryStore::new();
        let err = store
            .update("contentItems", "missing", fields(&[("status", json!("processed"))]))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn merge_preserves_unnamed_fields() {
        let store = MemoryStore::new();
        store
            .set(
                "contentItems",
                "item-1",
                fields(&[("text", json!("hello")), ("status", json!("pending"))]),
                false,
            )
            .await
            .unwrap();
        store
            .update("contentItems", "item-1", fields(&[("status", json!("processed"))]))
            .await
            .unwrap();

        let doc = store.get("contentItems", "item-1").await.unwrap().unwrap();
        assert_eq!(doc.fields.get("text"), Some(&json!("hello")));
        assert_eq!(doc.fields.get("status"), Some(&json!("processed")));
    }

    #[tokio::test]
    async fn subscribe_replays_current_matches_then_live_writes() {
        let store = MemoryStore::new();
        store
            .set(
                "contentItems",
                "item-1",
                fields(&[("subjectId", json!("s")), ("status", json!("pending"))]),
                false,
            )
            .await
            .unwrap();

        let query = Query::collection("contentItems")
            .where_eq("subjectId", "s")
            .where_eq("status", "pending");
        let mut rx = store.subscribe(query).await.unwrap();

        let replayed = rx.recv().await.unwrap();
        assert_eq!(replayed.id, "item-1");

        store
            .set(
                "contentItems",
                "item-2",
                fields(&[("subjectId", json!("s")), ("status", json!("pending"))]),
                false,
            )
            .await
            .unwrap();
        let live = rx.recv().await.unwrap();
        assert_eq!(live.id, "item-2");
    }

    #[tokio::test]
    async fn subscription_does_not_deliver_non_matching_writes() {
        let store = MemoryStore::new();
        let query = Query::collection("contentItems").where_eq("status", "pending");
        let mut rx = store.subscribe(query).await.unwrap();

        store
            .set(
                "contentItems",
                "done",
                fields(&[("status", json!("processed"))]),
                false,
            )
            .await
            .unwrap();
        store
            .set(
                "contentItems",
                "open",
                fields(&[("status", json!("pending"))]),
                false,
            )
            .await
            .unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, "open");
    }

    #[tokio::test]
    async fn doc_pinned_query_only_sees_that_document() {
        let store = MemoryStore::new();
        let query = Query::collection("deviceLocks").doc("subj-1");
        let mut rx = store.subscribe(query).await.unwrap();

        store
            .set("deviceLocks", "subj-2", fields(&[("isLocked", json!(true))]), false)
            .await
            .unwrap();
        store
            .set("deviceLocks", "subj-1", fields(&[("isLocked", json!(true))]), false)
            .await
            .unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, "subj-1");
    }
}
