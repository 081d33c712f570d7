use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::identity::IdentityProvider;
use crate::models::{LockList, Subject};
use crate::platform::{BlockKind, BlockSurface, ForegroundEvents, ForegroundTransition, TransitionKind};
use crate::session::MonitoringSession;
use crate::store::{collections, RemoteStateClient};

// Set to false to silence per-tick logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub struct AppLockDeps {
    pub subject: Subject,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub events: Arc<dyn ForegroundEvents>,
    pub surface: Arc<dyn BlockSurface>,
}

/// Resolves the definitive foreground app for a tick window: the last
/// enter-foreground event wins. No enter event means no definitive answer
/// and the tick is skipped.
pub fn resolve_foreground(events: &[ForegroundTransition]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|event| event.kind == TransitionKind::EnterForeground)
        .map(|event| event.app_id.clone())
}

/// One enforcement pass over the preceding tick window. Presentation is
/// edge-triggered through [`MonitoringSession::note_locked`]; while a locked
/// app stays foreground the surface is assumed to already be showing.
async fn enforce_tick(
    deps: &AppLockDeps,
    session: &mut MonitoringSession,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let events = deps
        .events
        .events_between(window_start, now)
        .await
        .context("foreground event query failed")?;

    let Some(app_id) = resolve_foreground(&events) else {
        return Ok(());
    };
    session.note_foreground(&app_id);

    let lock_list: LockList = match deps
        .store
        .get(collections::LOCK_LISTS, deps.subject.as_str())
        .await
        .context("lock list read failed")?
    {
        Some(doc) => doc.decode()?,
        None => LockList::default(),
    };

    if lock_list.contains(&app_id) {
        if session.note_locked(&app_id) {
            deps.surface
                .present(BlockKind::AppLock)
                .await
                .context("failed to present app block")?;
            log_info!("app lock presented for {app_id}");
        }
    } else {
        session.clear_locked();
    }

    Ok(())
}

/// Samples the foreground app once per tick and enforces the subject's lock
/// list. A failed tick is logged and skipped; only cancellation or a missing
/// subject ends the loop.
pub async fn app_lock_loop(
    deps: AppLockDeps,
    tick: std::time::Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut session = MonitoringSession::default();
    let mut window_start = Utc::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if deps.identity.current_subject().await.as_ref() != Some(&deps.subject) {
                    log_info!("subject signed out; app lock loop stopping");
                    return Ok(());
                }

                let now = Utc::now();
                if let Err(err) = enforce_tick(&deps, &mut session, window_start, now).await {
                    log_warn!("app lock tick skipped: {err:?}");
                }
                window_start = now;
            }
            _ = cancel.cancelled() => {
                log_info!("app lock loop shutting down");
                return Ok(());
            }
        }
    }
}
