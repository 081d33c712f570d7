pub mod capture;
pub mod classify;
pub mod config;
pub mod enforcement;
pub mod identity;
pub mod models;
pub mod platform;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod usage;
pub mod utils;

use std::sync::Arc;

use crate::capture::{capture_loop, CaptureDeps};
use crate::classify::{classification_loop, Classifier, ClassifyDeps};
use crate::config::Settings;
use crate::enforcement::{app_lock_loop, device_lock_loop, AppLockDeps, DeviceLockDeps};
use crate::identity::IdentityProvider;
use crate::platform::{BlockSurface, ContentEventSource, ForegroundEvents, UsageStatsProvider};
use crate::store::RemoteStateClient;
use crate::supervisor::AgentSpec;
use crate::usage::{usage_loop, UsageConfig, UsageDeps};

/// Everything the agents need, behind the external-collaborator seams. The
/// dev binary wires host implementations; deployments substitute real ones.
#[derive(Clone)]
pub struct EngineDeps {
    pub settings: Settings,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub foreground: Arc<dyn ForegroundEvents>,
    pub usage_stats: Arc<dyn UsageStatsProvider>,
    pub content_source: Arc<dyn ContentEventSource>,
    pub surface: Arc<dyn BlockSurface>,
    pub classifier: Arc<dyn Classifier>,
}

/// The full agent set: app-lock sampling, device-lock watching, content
/// capture, classification, and usage aggregation. Each run gets a fresh
/// dependency bundle — agents share nothing outside the store.
pub fn standard_agents(deps: &EngineDeps) -> Vec<AgentSpec> {
    let mut agents = Vec::new();

    {
        let deps = deps.clone();
        agents.push(AgentSpec::new("app-lock", move |subject, cancel| {
            app_lock_loop(
                AppLockDeps {
                    subject,
                    identity: deps.identity.clone(),
                    store: deps.store.clone(),
                    events: deps.foreground.clone(),
                    surface: deps.surface.clone(),
                },
                deps.settings.sample_tick(),
                cancel,
            )
        }));
    }

    {
        let deps = deps.clone();
        agents.push(AgentSpec::new("device-lock", move |subject, cancel| {
            device_lock_loop(
                DeviceLockDeps {
                    subject,
                    identity: deps.identity.clone(),
                    store: deps.store.clone(),
                    surface: deps.surface.clone(),
                },
                deps.settings.device_lock_poll(),
                cancel,
            )
        }));
    }

    {
        let deps = deps.clone();
        agents.push(AgentSpec::new("content-capture", move |subject, cancel| {
            capture_loop(
                CaptureDeps {
                    subject,
                    identity: deps.identity.clone(),
                    store: deps.store.clone(),
                    source: deps.content_source.clone(),
                },
                deps.settings.monitored_apps.clone(),
                deps.settings.content_debounce(),
                cancel,
            )
        }));
    }

    {
        let deps = deps.clone();
        agents.push(AgentSpec::new("classification", move |subject, cancel| {
            classification_loop(
                ClassifyDeps {
                    subject,
                    identity: deps.identity.clone(),
                    store: deps.store.clone(),
                    classifier: deps.classifier.clone(),
                },
                deps.settings.classification_timeout(),
                cancel,
            )
        }));
    }

    {
        let deps = deps.clone();
        agents.push(AgentSpec::new("usage-aggregation", move |subject, cancel| {
            usage_loop(
                UsageDeps {
                    subject,
                    identity: deps.identity.clone(),
                    store: deps.store.clone(),
                    stats: deps.usage_stats.clone(),
                    events: deps.foreground.clone(),
                },
                UsageConfig {
                    period: deps.settings.usage_period(),
                    noise_floor_minutes: deps.settings.usage_noise_floor_minutes,
                    system_app_prefixes: deps.settings.system_app_prefixes.clone(),
                },
                cancel,
            )
        }));
    }

    agents
}
