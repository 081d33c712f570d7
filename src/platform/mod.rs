pub mod host;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Direction of a foreground transition reported by the OS event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    EnterForeground,
    LeaveForeground,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundTransition {
    pub app_id: String,
    pub kind: TransitionKind,
    pub at: DateTime<Utc>,
}

/// One row of the OS usage-statistics query.
#[derive(Debug, Clone, PartialEq)]
pub struct AppForegroundTime {
    pub app_id: String,
    pub foreground_millis: u64,
}

/// Bucketing granularity of the OS usage-statistics facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

/// Raw textual content surfaced by a monitored application.
#[derive(Debug, Clone)]
pub struct ContentEvent {
    pub source_app: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    AppLock,
    DeviceLock,
}

/// Ordered foreground/background transition events between two instants.
#[async_trait]
pub trait ForegroundEvents: Send + Sync {
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ForegroundTransition>>;
}

/// Aggregated per-app foreground time between two instants.
#[async_trait]
pub trait UsageStatsProvider: Send + Sync {
    async fn usage_stats(
        &self,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AppForegroundTime>>;
}

/// Stream of content events, restricted to the allow-listed applications at
/// registration time. The stream ends when the receiver is dropped.
#[async_trait]
pub trait ContentEventSource: Send + Sync {
    async fn subscribe(&self, allow_list: &[String]) -> Result<mpsc::Receiver<ContentEvent>>;
}

/// Top-level blocking overlay. Presented surfaces ignore the platform's
/// back/cancel gesture; dismissal only happens through this interface.
#[async_trait]
pub trait BlockSurface: Send + Sync {
    async fn present(&self, kind: BlockKind) -> Result<()>;
    async fn dismiss(&self) -> Result<()>;
}

/// Renewable wake assertion keeping power management from suspending the
/// sampling loops mid-cycle. Calling `hold` again extends the lease.
pub trait WakeAssertion: Send + Sync {
    fn hold(&self, lease: Duration);
    fn release(&self);
}
