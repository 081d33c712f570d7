//! Best-effort host implementations of the platform seams.
//!
//! These back the dev binary and are not production integrations: real
//! deployments plug in the OS accessibility / usage-statistics facilities.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::mpsc;

use super::{
    AppForegroundTime, BlockKind, BlockSurface, ContentEvent, ContentEventSource,
    ForegroundEvents, ForegroundTransition, Granularity, TransitionKind, UsageStatsProvider,
    WakeAssertion,
};

const MAX_CPU_SAMPLES: usize = 3;
const MAX_BUFFERED_TRANSITIONS: usize = 256;
/// Below this average CPU share no process is considered "foreground".
const FOREGROUND_CPU_FLOOR: f32 = 1.0;

/// Approximates foreground transitions by scanning processes and treating
/// the busiest user process as the foreground application. Derived CPU
/// figures need a few samples to settle, so the first ticks report nothing.
pub struct ProcessForegroundEvents {
    inner: Mutex<SamplerState>,
}

struct SamplerState {
    system: System,
    /// Rolling CPU samples per process name (up to MAX_CPU_SAMPLES).
    cpu_history: HashMap<String, Vec<f32>>,
    current_foreground: Option<String>,
    transitions: VecDeque<ForegroundTransition>,
    own_pid: u32,
}

impl ProcessForegroundEvents {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SamplerState {
                system: System::new(),
                cpu_history: HashMap::new(),
                current_foreground: None,
                transitions: VecDeque::new(),
                own_pid: std::process::id(),
            }),
        }
    }
}

impl Default for ProcessForegroundEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerState {
    fn sample(&mut self, now: DateTime<Utc>) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::everything(),
        );

        let mut seen: HashMap<String, f32> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if pid.as_u32() == self.own_pid {
                continue;
            }
            let name = process.name().to_string_lossy().to_string();
            let entry = seen.entry(name).or_insert(0.0);
            *entry += process.cpu_usage();
        }

        for (name, cpu) in &seen {
            let history = self.cpu_history.entry(name.clone()).or_default();
            history.push(*cpu);
            if history.len() > MAX_CPU_SAMPLES {
                history.remove(0);
            }
        }
        self.cpu_history.retain(|name, _| seen.contains_key(name));

        let top = self
            .cpu_history
            .iter()
            .map(|(name, samples)| {
                let avg = samples.iter().sum::<f32>() / samples.len() as f32;
                (name.clone(), avg)
            })
            .filter(|(_, avg)| *avg > FOREGROUND_CPU_FLOOR)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name);

        if top != self.current_foreground {
            if let Some(previous) = self.current_foreground.take() {
                self.push_transition(ForegroundTransition {
                    app_id: previous,
                    kind: TransitionKind::LeaveForeground,
                    at: now,
                });
            }
            if let Some(next) = &top {
                self.push_transition(ForegroundTransition {
                    app_id: next.clone(),
                    kind: TransitionKind::EnterForeground,
                    at: now,
                });
            }
            self.current_foreground = top;
        }
    }

    fn push_transition(&mut self, transition: ForegroundTransition) {
        if self.transitions.len() >= MAX_BUFFERED_TRANSITIONS {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }
}

#[async_trait]
impl ForegroundEvents for ProcessForegroundEvents {
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ForegroundTransition>> {
        let mut state = self.inner.lock().expect("sampler lock poisoned");
        state.sample(to);
        Ok(state
            .transitions
            .iter()
            .filter(|t| t.at >= from && t.at <= to)
            .cloned()
            .collect())
    }
}

/// Usage-statistics provider for hosts without a usage facility. Always
/// empty, which routes the aggregator onto its event-log fallback path.
pub struct NoUsageStats;

#[async_trait]
impl UsageStatsProvider for NoUsageStats {
    async fn usage_stats(
        &self,
        _granularity: Granularity,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<AppForegroundTime>> {
        Ok(Vec::new())
    }
}

/// Content source fed manually (dev tooling and tests). `publish` fans the
/// event out to every live subscription whose allow-list admits the app.
pub struct ChannelContentSource {
    subscribers: Mutex<Vec<(Vec<String>, mpsc::Sender<ContentEvent>)>>,
}

impl ChannelContentSource {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn publish(&self, event: ContentEvent) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (allow_list, tx) in subscribers.iter() {
            if allow_list.iter().any(|app| app == &event.source_app) {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl Default for ChannelContentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentEventSource for ChannelContentSource {
    async fn subscribe(&self, allow_list: &[String]) -> Result<mpsc::Receiver<ContentEvent>> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((allow_list.to_vec(), tx));
        Ok(rx)
    }
}

/// Block surface that only logs. Tracks what is currently presented so the
/// dev binary can report state.
pub struct LoggingBlockSurface {
    visible: Mutex<Option<BlockKind>>,
}

impl LoggingBlockSurface {
    pub fn new() -> Self {
        Self {
            visible: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<BlockKind> {
        *self.visible.lock().expect("surface lock poisoned")
    }
}

impl Default for LoggingBlockSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockSurface for LoggingBlockSurface {
    async fn present(&self, kind: BlockKind) -> Result<()> {
        info!("block surface presented: {kind:?}");
        *self.visible.lock().expect("surface lock poisoned") = Some(kind);
        Ok(())
    }

    async fn dismiss(&self) -> Result<()> {
        info!("block surface dismissed");
        *self.visible.lock().expect("surface lock poisoned") = None;
        Ok(())
    }
}

/// Wake assertion for hosts where the process is not at risk of suspension.
pub struct NoopWakeAssertion;

impl WakeAssertion for NoopWakeAssertion {
    fn hold(&self, lease: Duration) {
        debug!("wake lease renewed for {}s", lease.as_secs());
    }

    fn release(&self) {
        debug!("wake lease released");
    }
}
