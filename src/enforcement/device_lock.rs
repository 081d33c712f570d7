use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::identity::IdentityProvider;
use crate::models::{DeviceLockFlag, Subject};
use crate::platform::{BlockKind, BlockSurface};
use crate::store::{collections, Document, Query, RemoteStateClient};

// Set to false to silence per-tick logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceAction {
    Present,
    Dismiss,
}

/// Transition table. Observing the value the machine is already in is a
/// no-op, so duplicate deliveries of the same flag never re-present.
fn transition(state: LockState, is_locked: bool) -> Option<SurfaceAction> {
    match (state, is_locked) {
        (LockState::Unlocked, true) => Some(SurfaceAction::Present),
        (LockState::Locked, false) => Some(SurfaceAction::Dismiss),
        _ => None,
    }
}

pub struct DeviceLockDeps {
    pub subject: Subject,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub surface: Arc<dyn BlockSurface>,
}

/// Applies one observed flag value. The state only commits once the surface
/// call succeeds, so a failed presentation is retried on the next signal.
async fn apply(deps: &DeviceLockDeps, state: &mut LockState, is_locked: bool) -> Result<()> {
    match transition(*state, is_locked) {
        Some(SurfaceAction::Present) => {
            deps.surface
                .present(BlockKind::DeviceLock)
                .await
                .context("failed to present device block")?;
            *state = LockState::Locked;
            log_info!("device lock engaged for {}", deps.subject);
        }
        Some(SurfaceAction::Dismiss) => {
            deps.surface
                .dismiss()
                .await
                .context("failed to dismiss device block")?;
            *state = LockState::Unlocked;
            log_info!("device lock released for {}", deps.subject);
        }
        None => {}
    }
    Ok(())
}

async fn read_flag(deps: &DeviceLockDeps) -> Result<bool> {
    let flag: DeviceLockFlag = match deps
        .store
        .get(collections::DEVICE_LOCKS, deps.subject.as_str())
        .await
        .context("device lock flag read failed")?
    {
        Some(doc) => doc.decode()?,
        // Absence of the record is equivalent to unlocked.
        None => DeviceLockFlag::default(),
    };
    Ok(flag.is_locked)
}

fn decode_flag(doc: &Document) -> bool {
    doc.decode::<DeviceLockFlag>()
        .map(|flag| flag.is_locked)
        .unwrap_or(false)
}

/// Watches the subject's device-lock flag over a push subscription, with a
/// fallback poll on the same interval as the backstop. Push delivery can be
/// delayed or dropped by the transport; the poll bounds staleness to one
/// interval either way.
pub async fn device_lock_loop(
    deps: DeviceLockDeps,
    poll: std::time::Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = LockState::Unlocked;
    let mut subscription: Option<mpsc::Receiver<Document>> = match deps
        .store
        .subscribe(device_lock_query(&deps.subject))
        .await
    {
        Ok(rx) => Some(rx),
        Err(err) => {
            log_warn!("device lock subscription failed, polling only: {err:?}");
            None
        }
    };

    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            delivered = recv_or_pending(&mut subscription) => {
                match delivered {
                    Some(doc) => {
                        let is_locked = decode_flag(&doc);
                        if let Err(err) = apply(&deps, &mut state, is_locked).await {
                            log_warn!("device lock update skipped: {err:?}");
                        }
                    }
                    None => {
                        log_warn!("device lock subscription closed; polling until it recovers");
                        subscription = None;
                    }
                }
            }
            _ = ticker.tick() => {
                if deps.identity.current_subject().await.as_ref() != Some(&deps.subject) {
                    log_info!("subject signed out; device lock loop stopping");
                    return Ok(());
                }

                if subscription.is_none() {
                    subscription = deps
                        .store
                        .subscribe(device_lock_query(&deps.subject))
                        .await
                        .ok();
                }

                match read_flag(&deps).await {
                    Ok(is_locked) => {
                        if let Err(err) = apply(&deps, &mut state, is_locked).await {
                            log_warn!("device lock poll skipped: {err:?}");
                        }
                    }
                    Err(err) => log_warn!("device lock poll skipped: {err:?}"),
                }
            }
            _ = cancel.cancelled() => {
                log_info!("device lock loop shutting down");
                return Ok(());
            }
        }
    }
}

fn device_lock_query(subject: &Subject) -> Query {
    Query::collection(collections::DEVICE_LOCKS).doc(subject.as_str())
}

/// Receives from the subscription if one is live; otherwise parks so the
/// select! only wakes on the poll tick or cancellation.
async fn recv_or_pending(subscription: &mut Option<mpsc::Receiver<Document>>) -> Option<Document> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
