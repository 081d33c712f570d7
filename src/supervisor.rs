use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::identity::IdentityProvider;
use crate::models::Subject;
use crate::platform::WakeAssertion;

const IDENTITY_POLL: Duration = Duration::from_secs(5);

type AgentFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type AgentFactory = Box<dyn Fn(Subject, CancellationToken) -> AgentFuture + Send + Sync>;

/// A restartable agent: a name plus a factory that builds one run of its
/// loop for the given subject. Agents hold no state across runs beyond what
/// lives in the store, so re-spawning after a crash is always safe.
pub struct AgentSpec {
    pub name: &'static str,
    factory: AgentFactory,
}

impl AgentSpec {
    pub fn new<F, Fut>(name: &'static str, factory: F) -> Self
    where
        F: Fn(Subject, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            factory: Box::new(move |subject, cancel| Box::pin(factory(subject, cancel))),
        }
    }
}

/// Owns the agent lifecycles: spawns each agent once a subject is signed in,
/// restarts it on crash or panic, and parks it while signed out. Restart
/// lives here rather than inside the agents so an agent that dies for any
/// reason at all still comes back.
pub struct Supervisor {
    identity: Arc<dyn IdentityProvider>,
    wake: Arc<dyn WakeAssertion>,
    restart_delay: Duration,
    wake_lease: Duration,
}

impl Supervisor {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        wake: Arc<dyn WakeAssertion>,
        restart_delay: Duration,
        wake_lease: Duration,
    ) -> Self {
        Self {
            identity,
            wake,
            restart_delay,
            wake_lease,
        }
    }

    /// Runs until `cancel` fires. Returns once every agent has stopped.
    pub async fn run(&self, agents: Vec<AgentSpec>, cancel: CancellationToken) {
        let mut handles = Vec::new();
        for spec in agents {
            handles.push(tokio::spawn(supervise_agent(
                spec,
                self.identity.clone(),
                self.restart_delay,
                cancel.clone(),
            )));
        }
        let wake_keeper = tokio::spawn(hold_wake_while_active(
            self.wake.clone(),
            self.identity.clone(),
            self.wake_lease,
            cancel.clone(),
        ));

        for handle in handles {
            let _ = handle.await;
        }
        let _ = wake_keeper.await;
        info!("supervisor stopped");
    }
}

async fn supervise_agent(
    spec: AgentSpec,
    identity: Arc<dyn IdentityProvider>,
    restart_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        // No active subject is a hard stop, not an error: park and re-check.
        let subject = match identity.current_subject().await {
            Some(subject) => subject,
            None => {
                debug!("agent {} parked: no active subject", spec.name);
                tokio::select! {
                    _ = tokio::time::sleep(IDENTITY_POLL) => {}
                    _ = cancel.cancelled() => return,
                }
                continue;
            }
        };

        info!("starting agent {} for {}", spec.name, subject);
        let run = tokio::spawn((spec.factory)(subject, cancel.clone()));

        match run.await {
            Ok(Ok(())) => {
                if cancel.is_cancelled() {
                    info!("agent {} stopped", spec.name);
                    return;
                }
                info!("agent {} stopped; re-checking identity", spec.name);
            }
            Ok(Err(err)) => {
                error!("agent {} exited with error: {err:?}; restarting", spec.name);
            }
            Err(join_err) => {
                error!("agent {} panicked: {join_err}; restarting", spec.name);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Renews the wake lease at half its duration while a subject is signed in,
/// so power management cannot suspend a sampling loop mid-cycle.
async fn hold_wake_while_active(
    wake: Arc<dyn WakeAssertion>,
    identity: Arc<dyn IdentityProvider>,
    lease: Duration,
    cancel: CancellationToken,
) {
    let renew_every = (lease / 2).max(Duration::from_secs(1));
    loop {
        if identity.current_subject().await.is_some() {
            wake.hold(lease);
        } else {
            wake.release();
        }

        tokio::select! {
            _ = tokio::time::sleep(renew_every) => {}
            _ = cancel.cancelled() => {
                wake.release();
                return;
            }
        }
    }
}
