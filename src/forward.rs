//! Port-forward bookkeeping and the background tunnel loop.
//!
//! The registry lives on the UI task. Tunnel tasks report back through the
//! dispatcher, tagged with the session generation so that late events from a
//! stopped session never touch a newer one registered under the same key.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, FlashLevel, StatusSink};
use crate::error::{SkiffError, SkiffResult};
use crate::model::{RowAction, TableData, namespaced};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ForwardState {
    Created,
    Activating,
    Active,
    Stopped,
    Failed,
}

impl ForwardState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    fn can_become(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Created, Self::Activating)
                | (Self::Created, Self::Stopped)
                | (Self::Activating, Self::Active)
                | (Self::Activating, Self::Stopped)
                | (Self::Activating, Self::Failed)
                | (Self::Active, Self::Stopped)
                | (Self::Active, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl Display for PortMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Parses `local:remote`, or a single port used on both ends.
pub fn parse_port_mapping(mapping: &str) -> Option<PortMapping> {
    let mapping = mapping.trim();
    let (local, remote) = mapping.split_once(':').unwrap_or((mapping, mapping));
    let local = strip_port(local).parse::<u16>().ok()?;
    let remote = strip_port(remote).parse::<u16>().ok()?;
    if local == 0 || remote == 0 {
        return None;
    }
    Some(PortMapping { local, remote })
}

/// First TCP port of a container PORTS cell such as `http:8080/TCP,9090/UDP`.
pub fn first_tcp_port(ports: &str) -> Option<u16> {
    ports.split(',').find_map(|entry| {
        let entry = entry.trim();
        let entry = entry.rsplit_once(':').map(|(_, port)| port).unwrap_or(entry);
        let (port, protocol) = entry.split_once('/').unwrap_or((entry, "TCP"));
        if !protocol.trim().eq_ignore_ascii_case("TCP") {
            return None;
        }
        port.trim().parse::<u16>().ok().filter(|port| *port != 0)
    })
}

fn strip_port(port: &str) -> &str {
    let port = port.trim();
    port.split_once('/').map(|(head, _)| head).unwrap_or(port).trim()
}

/// Checks the latest container snapshot before a forward is started.
pub fn ensure_runnable(table: &TableData, container_fqn: &str) -> SkiffResult<()> {
    let Some(row) = table
        .get(container_fqn)
        .filter(|row| row.action != RowAction::Delete)
    else {
        return Err(SkiffError::invalid_state(container_fqn, "container not found"));
    };
    let state = table
        .column_index("STATE")
        .map(|index| row.field(index))
        .unwrap_or("");
    if state != "Running" {
        return Err(SkiffError::invalid_state(
            container_fqn,
            format!("container is {}", if state.is_empty() { "unknown" } else { state }),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TunnelSpec {
    pub path: String,
    pub container: String,
    pub ports: Vec<PortMapping>,
}

impl TunnelSpec {
    pub fn namespace(&self) -> &str {
        namespaced(&self.path).0
    }

    pub fn pod(&self) -> &str {
        namespaced(&self.path).1
    }
}

/// Establishes a tunnel and relays traffic until cancelled or broken.
///
/// Implementations send the bound port pairs on `ready` once the tunnel is
/// live and only return when it ends.
#[async_trait]
pub trait Tunneler: Send + Sync {
    async fn forward(
        &self,
        spec: TunnelSpec,
        ready: oneshot::Sender<Vec<PortMapping>>,
        token: CancellationToken,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PortForwardSession {
    pub fqn: String,
    pub path: String,
    pub container: String,
    pub local_port: u16,
    pub pod_port: u16,
    pub state: ForwardState,
    pub started_at: DateTime<Local>,
    pub generation: u64,
    token: CancellationToken,
}

impl PortForwardSession {
    pub fn is_active(&self) -> bool {
        self.state == ForwardState::Active
    }

    pub fn ports(&self) -> String {
        format!("{}:{}", self.local_port, self.pod_port)
    }

    pub fn namespace(&self) -> &str {
        namespaced(&self.path).0
    }

    pub fn pod(&self) -> &str {
        namespaced(&self.path).1
    }

    pub fn spec(&self) -> TunnelSpec {
        TunnelSpec {
            path: self.path.clone(),
            container: self.container.clone(),
            ports: vec![PortMapping {
                local: self.local_port,
                remote: self.pod_port,
            }],
        }
    }

    fn transition(&mut self, next: ForwardState) -> SkiffResult<()> {
        if !self.state.can_become(next) {
            return Err(SkiffError::invalid_state(
                &self.fqn,
                format!("cannot go from {:?} to {next:?}", self.state),
            ));
        }
        debug!(fqn = %self.fqn, from = ?self.state, to = ?next, "forward state change");
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ForwardOutcome {
    /// The remote side ended the tunnel without an error.
    Closed,
    /// Operator stop; carries the transport's termination error, if any.
    Canceled(Option<String>),
    Failed(String),
}

/// Implemented by the UI-side state that owns the registry.
pub trait ForwardHost: StatusSink + 'static {
    fn forwarders(&mut self) -> &mut ForwarderRegistry;

    fn forwards_changed(&mut self) {}
}

pub struct ForwarderRegistry {
    sessions: HashMap<String, PortForwardSession>,
    next_generation: u64,
    parent: CancellationToken,
}

impl ForwarderRegistry {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            sessions: HashMap::new(),
            next_generation: 1,
            parent,
        }
    }

    /// Registers a pending session; it is visible in [`Self::list`] right away.
    pub fn start(
        &mut self,
        fqn: &str,
        path: &str,
        container: &str,
        local_port: u16,
        pod_port: u16,
    ) -> SkiffResult<PortForwardSession> {
        if self.sessions.contains_key(fqn) {
            return Err(SkiffError::AlreadyExists {
                fqn: fqn.to_string(),
            });
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let session = PortForwardSession {
            fqn: fqn.to_string(),
            path: path.to_string(),
            container: container.to_string(),
            local_port,
            pod_port,
            state: ForwardState::Created,
            started_at: Local::now(),
            generation,
            token: self.parent.child_token(),
        };
        info!(fqn, ports = %session.ports(), "port-forward registered");
        self.sessions.insert(fqn.to_string(), session.clone());
        Ok(session)
    }

    /// Spawns the tunnel task for a registered session.
    pub fn launch<S: ForwardHost>(
        &mut self,
        fqn: &str,
        tunneler: Arc<dyn Tunneler>,
        dispatcher: Dispatcher<S>,
    ) -> SkiffResult<JoinHandle<()>> {
        let Some(session) = self.sessions.get_mut(fqn) else {
            return Err(SkiffError::invalid_state(fqn, "port-forward is not registered"));
        };
        session.transition(ForwardState::Activating)?;

        let spec = session.spec();
        let token = session.token.clone();
        let generation = session.generation;
        let fqn = fqn.to_string();
        Ok(tokio::spawn(run_tunnel(
            fqn, generation, spec, token, tunneler, dispatcher,
        )))
    }

    pub fn activate(&mut self, fqn: &str, generation: u64) -> SkiffResult<()> {
        match self.sessions.get_mut(fqn) {
            Some(session) if session.generation == generation => {
                session.transition(ForwardState::Active)
            }
            _ => Err(SkiffError::invalid_state(fqn, "stale port-forward activation")),
        }
    }

    /// Cancels and removes a session. Missing keys are logged, not errors.
    pub fn stop(&mut self, fqn: &str) -> Option<PortForwardSession> {
        let Some(mut session) = self.sessions.remove(fqn) else {
            debug!(fqn, "no port-forward to stop");
            return None;
        };
        session.token.cancel();
        if let Err(error) = session.transition(ForwardState::Stopped) {
            warn!(fqn, "{error}");
        }
        info!(fqn, "port-forward stopped");
        Some(session)
    }

    pub fn stop_all(&mut self) {
        let keys = self.sessions.keys().cloned().collect::<Vec<_>>();
        for fqn in keys {
            self.stop(&fqn);
        }
    }

    /// Records the end of a tunnel task and removes its session.
    ///
    /// Returns `None` when the session was already stopped or replaced.
    pub fn finish(
        &mut self,
        fqn: &str,
        generation: u64,
        outcome: &ForwardOutcome,
    ) -> Option<PortForwardSession> {
        if self
            .sessions
            .get(fqn)
            .is_none_or(|session| session.generation != generation)
        {
            return None;
        }
        let mut session = self.sessions.remove(fqn)?;
        let next = match outcome {
            ForwardOutcome::Failed(_) => ForwardState::Failed,
            ForwardOutcome::Closed | ForwardOutcome::Canceled(_) => ForwardState::Stopped,
        };
        if let Err(error) = session.transition(next) {
            warn!(fqn, "{error}");
        }
        session.token.cancel();
        Some(session)
    }

    pub fn get(&self, fqn: &str) -> Option<&PortForwardSession> {
        self.sessions.get(fqn)
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.sessions.contains_key(fqn)
    }

    pub fn list(&self) -> Vec<PortForwardSession> {
        let mut sessions = self.sessions.values().cloned().collect::<Vec<_>>();
        sessions.sort_by(|left, right| left.fqn.cmp(&right.fqn));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

async fn run_tunnel<S: ForwardHost>(
    fqn: String,
    generation: u64,
    spec: TunnelSpec,
    token: CancellationToken,
    tunneler: Arc<dyn Tunneler>,
    dispatcher: Dispatcher<S>,
) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let transport = {
        let token = token.clone();
        tokio::spawn(async move { tunneler.forward(spec, ready_tx, token).await })
    };

    let activation = {
        let dispatcher = dispatcher.clone();
        let fqn = fqn.clone();
        tokio::spawn(async move {
            if let Ok(ports) = ready_rx.await {
                dispatcher.queue_update(move |host: &mut S| {
                    forward_activated(host, &fqn, generation, &ports)
                });
            }
        })
    };

    let result = match transport.await {
        Ok(result) => result,
        Err(error) => Err(anyhow::anyhow!("tunnel task aborted: {error}")),
    };
    let _ = activation.await;

    let outcome = match result {
        Ok(()) if token.is_cancelled() => ForwardOutcome::Canceled(None),
        Err(error) if token.is_cancelled() => ForwardOutcome::Canceled(Some(format!("{error:#}"))),
        Ok(()) => ForwardOutcome::Closed,
        Err(error) => ForwardOutcome::Failed(format!("{error:#}")),
    };
    debug!(%fqn, generation, ?outcome, "tunnel ended");
    dispatcher.queue_update(move |host: &mut S| forward_finished(host, &fqn, generation, outcome));
}

fn forward_activated<S: ForwardHost>(
    host: &mut S,
    fqn: &str,
    generation: u64,
    ports: &[PortMapping],
) {
    match host.forwarders().activate(fqn, generation) {
        Ok(()) => {
            let ports = ports
                .iter()
                .map(PortMapping::to_string)
                .collect::<Vec<_>>()
                .join(",");
            host.flash(FlashLevel::Info, format!("PortForward activated {fqn} {ports}"));
            host.forwards_changed();
        }
        Err(error) => debug!("{error}"),
    }
}

fn forward_finished<S: ForwardHost>(
    host: &mut S,
    fqn: &str,
    generation: u64,
    outcome: ForwardOutcome,
) {
    let removed = host.forwarders().finish(fqn, generation, &outcome);
    match (outcome, removed.is_some()) {
        (ForwardOutcome::Failed(message), true) => {
            let error = SkiffError::TransportFailure {
                fqn: fqn.to_string(),
                message,
            };
            warn!("{error}");
            host.flash(FlashLevel::Error, error.to_string());
        }
        (ForwardOutcome::Closed, true) => {
            host.flash(FlashLevel::Info, format!("PortForward {fqn} closed"));
        }
        (ForwardOutcome::Canceled(Some(message)), _) => {
            host.flash(
                FlashLevel::Warn,
                format!("PortForward {fqn} stopped: {message}"),
            );
        }
        _ => {}
    }
    if removed.is_some() {
        host.forwards_changed();
    }
}
