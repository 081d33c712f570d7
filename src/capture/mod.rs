use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::identity::IdentityProvider;
use crate::models::{ContentItem, Subject};
use crate::platform::{ContentEvent, ContentEventSource};
use crate::session::MonitoringSession;
use crate::store::{collections, to_fields, RemoteStateClient};

// Set to false to silence per-event logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const RESUBSCRIBE_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

pub struct CaptureDeps {
    pub subject: Subject,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub source: Arc<dyn ContentEventSource>,
}

/// Debounces one observed content event and enqueues it as a pending item.
/// Observation streams fire many near-identical events per user action;
/// without the filter the classification queue floods with redundant work.
async fn handle_event(
    deps: &CaptureDeps,
    session: &mut MonitoringSession,
    event: ContentEvent,
) -> Result<()> {
    if event.text.is_empty() {
        return Ok(());
    }
    if !session.accept_content(&event.text, event.at) {
        return Ok(());
    }

    let item = ContentItem::pending(deps.subject.id.clone(), event.text, event.at);
    let item_id = deps
        .store
        .add(collections::CONTENT_ITEMS, to_fields(&item)?)
        .await
        .context("failed to enqueue content item")?;
    log_info!("queued content item {item_id} from {}", event.source_app);
    Ok(())
}

/// Observes textual content from the allow-listed applications and feeds the
/// pending classification queue. The allow-list is fixed at registration
/// time; a closed stream is re-subscribed rather than treated as fatal.
pub async fn capture_loop(
    deps: CaptureDeps,
    monitored_apps: Vec<String>,
    debounce: chrono::Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut session = MonitoringSession::new(debounce);
    let mut events = deps
        .source
        .subscribe(&monitored_apps)
        .await
        .context("content source subscription failed")?;

    loop {
        tokio::select! {
            delivered = events.recv() => {
                match delivered {
                    Some(event) => {
                        if deps.identity.current_subject().await.as_ref() != Some(&deps.subject) {
                            log_info!("subject signed out; content capture stopping");
                            return Ok(());
                        }
                        if let Err(err) = handle_event(&deps, &mut session, event).await {
                            log_warn!("content capture dropped an event: {err:?}");
                        }
                    }
                    None => {
                        log_warn!("content stream closed; resubscribing");
                        tokio::select! {
                            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                            _ = cancel.cancelled() => return Ok(()),
                        }
                        match deps.source.subscribe(&monitored_apps).await {
                            Ok(rx) => events = rx,
                            Err(err) => log_warn!("content resubscription failed: {err:?}"),
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                log_info!("content capture shutting down");
                return Ok(());
            }
        }
    }
}
