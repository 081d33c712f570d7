use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::Classifier;
use crate::identity::IdentityProvider;
use crate::models::{ClassificationResult, ContentItem, ContentStatus, Subject};
use crate::store::{collections, to_fields, Query, RemoteStateClient};

// Set to false to silence per-item logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const MAX_TRACKED_ITEMS: usize = 1024;

/// Remembers recently dispatched item ids so subscription replay does not
/// spawn duplicate work for an item that is already in flight. Bounded with
/// FIFO eviction; an evicted id that comes back is still safe because the
/// worker re-checks the stored status before classifying.
struct SeenItems {
    seen: HashSet<String>,
    queue: VecDeque<String>,
    max_size: usize,
}

impl SeenItems {
    fn new(max_size: usize) -> Self {
        Self {
            seen: HashSet::new(),
            queue: VecDeque::new(),
            max_size,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.seen.contains(&id) {
            return;
        }
        if self.queue.len() >= self.max_size {
            if let Some(oldest) = self.queue.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.clone());
        self.queue.push_back(id);
    }
}

pub struct ClassifyDeps {
    pub subject: Subject,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub classifier: Arc<dyn Classifier>,
}

fn pending_query(subject: &Subject) -> Query {
    Query::collection(collections::CONTENT_ITEMS)
        .where_eq("subjectId", subject.as_str())
        .where_eq("status", ContentStatus::Pending.as_str())
}

async fn mark_status(
    deps: &ClassifyDeps,
    item_id: &str,
    status: ContentStatus,
    error: Option<String>,
) -> Result<()> {
    let mut fields = Map::new();
    fields.insert("status".to_string(), Value::from(status.as_str()));
    if let Some(message) = error {
        fields.insert("error".to_string(), Value::from(message));
    }
    deps.store
        .update(collections::CONTENT_ITEMS, item_id, fields)
        .await
        .with_context(|| format!("failed to mark content item {item_id} {}", status.as_str()))
}

/// Classifies one delivered item and records the terminal outcome.
///
/// The stored status is re-read first: subscription replay can hand us a
/// stale snapshot of an item that already finished, and re-running the
/// classifier then could record a different verdict. The result document is
/// written before the source item is marked processed — a crash in between
/// leaves the item pending for a harmless re-run, instead of a processed
/// item whose result is missing.
async fn classify_item(
    deps: &ClassifyDeps,
    item_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let current: ContentItem = match deps
        .store
        .get(collections::CONTENT_ITEMS, item_id)
        .await
        .context("content item re-read failed")?
    {
        Some(doc) => doc.decode()?,
        None => return Ok(()),
    };

    if current.status.is_terminal() {
        log_info!("content item {item_id} already {}, skipping", current.status.as_str());
        return Ok(());
    }

    let outcome = tokio::time::timeout(timeout, deps.classifier.classify(&current.text)).await;

    // A result that arrives after shutdown must not be acted on.
    if cancel.is_cancelled() {
        return Ok(());
    }

    match outcome {
        Ok(Ok(verdict)) => {
            let result = ClassificationResult {
                content_item_id: item_id.to_string(),
                is_blockable: verdict.is_blockable,
                reason: verdict.reason,
                classified_at: Utc::now(),
            };
            deps.store
                .set(
                    collections::CLASSIFICATION_RESULTS,
                    item_id,
                    to_fields(&result)?,
                    false,
                )
                .await
                .context("failed to write classification result")?;
            mark_status(deps, item_id, ContentStatus::Processed, None).await?;
            log_info!(
                "content item {item_id} processed (blockable: {})",
                result.is_blockable
            );
        }
        Ok(Err(err)) => {
            mark_status(deps, item_id, ContentStatus::Failed, Some(err.to_string())).await?;
            log_warn!("content item {item_id} failed to classify: {err:?}");
        }
        Err(_) => {
            let message = format!("classification timed out after {}s", timeout.as_secs());
            mark_status(deps, item_id, ContentStatus::Failed, Some(message)).await?;
            log_warn!("content item {item_id} timed out in classification");
        }
    }

    Ok(())
}

/// Drains the subject's pending-item subscription. Items are handed to
/// independent tasks, so a backlog at startup classifies in parallel and
/// completion order is unrelated to enqueue order.
pub async fn classification_loop(
    deps: ClassifyDeps,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let deps = Arc::new(deps);
    let mut pending = deps
        .store
        .subscribe(pending_query(&deps.subject))
        .await
        .context("pending item subscription failed")?;
    let mut seen = SeenItems::new(MAX_TRACKED_ITEMS);

    loop {
        tokio::select! {
            delivered = pending.recv() => {
                match delivered {
                    Some(doc) => {
                        if deps.identity.current_subject().await.as_ref() != Some(&deps.subject) {
                            log_info!("subject signed out; classification worker stopping");
                            return Ok(());
                        }
                        if seen.contains(&doc.id) {
                            continue;
                        }
                        seen.insert(doc.id.clone());

                        let deps = deps.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = classify_item(&deps, &doc.id, timeout, &cancel).await {
                                log_warn!("classification of {} not recorded: {err:?}", doc.id);
                            }
                        });
                    }
                    None => {
                        log_warn!("pending item subscription closed; resubscribing");
                        tokio::select! {
                            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                            _ = cancel.cancelled() => return Ok(()),
                        }
                        match deps.store.subscribe(pending_query(&deps.subject)).await {
                            Ok(rx) => pending = rx,
                            Err(err) => log_warn!("pending item resubscription failed: {err:?}"),
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                log_info!("classification worker shutting down");
                return Ok(());
            }
        }
    }
}
