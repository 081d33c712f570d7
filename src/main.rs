use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use aegis::classify::KeywordClassifier;
use aegis::config::SettingsStore;
use aegis::identity::StaticIdentity;
use aegis::models::Subject;
use aegis::platform::host::{
    ChannelContentSource, LoggingBlockSurface, NoUsageStats, NoopWakeAssertion,
    ProcessForegroundEvents,
};
use aegis::store::MemoryStore;
use aegis::supervisor::Supervisor;
use aegis::{standard_agents, EngineDeps};

/// Dev entry point: runs the full agent set against host-local collaborators
/// (process-scan foreground sampling, in-memory store, logging block
/// surface). Real deployments embed the library and wire the platform's own
/// implementations instead.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("aegisd starting up...");

    let data_dir = std::env::var("AEGIS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./aegis-data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let mut settings = settings_store.current();
    settings.apply_debug_overrides();

    let subject_id =
        std::env::var("AEGIS_SUBJECT").unwrap_or_else(|_| "local-device".to_string());
    let identity = Arc::new(StaticIdentity::signed_in(Subject::new(subject_id.clone())));
    info!("monitoring subject {subject_id}");

    let deps = EngineDeps {
        settings: settings.clone(),
        identity: identity.clone(),
        store: Arc::new(MemoryStore::new()),
        foreground: Arc::new(ProcessForegroundEvents::new()),
        usage_stats: Arc::new(NoUsageStats),
        content_source: Arc::new(ChannelContentSource::new()),
        surface: Arc::new(LoggingBlockSurface::new()),
        classifier: Arc::new(KeywordClassifier::new(vec![
            "gambling".into(),
            "casino".into(),
        ])),
    };

    let supervisor = Supervisor::new(
        identity,
        Arc::new(NoopWakeAssertion),
        settings.restart_delay(),
        settings.wake_lease(),
    );

    let cancel = CancellationToken::new();
    let agents = standard_agents(&deps);
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(agents, cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();
    run.await.context("supervisor task failed")?;

    info!("aegisd stopped");
    Ok(())
}
