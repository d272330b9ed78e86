use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Namespace, Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::forward::{PortMapping, TunnelSpec, Tunneler};
use crate::model::{
    NamespaceScope, ResourceKind, ResourceRow, container_fqn, fqn, format_elapsed_seconds,
    namespaced,
};
use crate::watcher::{ResourceFetcher, WatchTarget};

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn new() -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            Config::from_custom_kubeconfig(kubeconfig_value, &KubeConfigOptions::default())
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster_url = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let context = kubeconfig
            .as_ref()
            .and_then(|cfg| cfg.current_context.clone())
            .unwrap_or_else(|| "in-cluster".to_string());
        let cluster = kubeconfig
            .as_ref()
            .and_then(|cfg| {
                cfg.contexts
                    .iter()
                    .find(|named| named.name == context)
                    .and_then(|named| named.context.as_ref())
                    .map(|ctx| ctx.cluster.clone())
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| context.clone());
        info!(%context, %cluster, %cluster_url, "connected to cluster");

        Ok(Self {
            client,
            context,
            cluster,
            default_namespace,
        })
    }

    /// Cluster name from the active context; keys the benchmark files.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub async fn containers(
        &self,
        namespace: &str,
        pod_name: &str,
        include_init: bool,
    ) -> Result<Vec<ResourceRow>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod_name)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{pod_name}"))?;
        Ok(container_rows(&fqn(namespace, pod_name), &pod, include_init))
    }

    async fn fetch_pods(&self, scope: &NamespaceScope) -> Result<Vec<ResourceRow>> {
        let pods: Api<Pod> = scoped_api(&self.client, scope);
        let list = pods.list(&list_params()).await.context("failed to list pods")?;
        Ok(list.iter().map(pod_row).collect())
    }

    async fn fetch_services(&self, scope: &NamespaceScope) -> Result<Vec<ResourceRow>> {
        let services: Api<Service> = scoped_api(&self.client, scope);
        let list = services
            .list(&list_params())
            .await
            .context("failed to list services")?;
        Ok(list.iter().map(service_row).collect())
    }

    async fn fetch_deployments(&self, scope: &NamespaceScope) -> Result<Vec<ResourceRow>> {
        let deployments: Api<Deployment> = scoped_api(&self.client, scope);
        let list = deployments
            .list(&list_params())
            .await
            .context("failed to list deployments")?;
        Ok(list.iter().map(deployment_row).collect())
    }

    async fn fetch_nodes(&self) -> Result<Vec<ResourceRow>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&list_params()).await.context("failed to list nodes")?;
        Ok(list.iter().map(node_row).collect())
    }

    async fn fetch_namespaces(&self) -> Result<Vec<ResourceRow>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&list_params())
            .await
            .context("failed to list namespaces")?;
        Ok(list.iter().map(namespace_row).collect())
    }
}

#[async_trait]
impl ResourceFetcher for KubeGateway {
    async fn fetch_rows(
        &self,
        target: &WatchTarget,
        scope: &NamespaceScope,
    ) -> Result<Vec<ResourceRow>> {
        let mut rows = match target.kind {
            ResourceKind::Pods => self.fetch_pods(scope).await?,
            ResourceKind::Services => self.fetch_services(scope).await?,
            ResourceKind::Deployments => self.fetch_deployments(scope).await?,
            ResourceKind::Nodes => self.fetch_nodes().await?,
            ResourceKind::Namespaces => self.fetch_namespaces().await?,
            ResourceKind::Containers => {
                let Some(path) = target.parent.as_deref() else {
                    anyhow::bail!("container view needs an owning pod");
                };
                let (namespace, pod) = namespaced(path);
                return self.containers(namespace, pod, true).await;
            }
            ResourceKind::PortForwards | ResourceKind::Benchmarks => {
                anyhow::bail!("{} are local state, not cluster resources", target.kind.title())
            }
        };

        rows.sort_by(|left, right| left.fqn.cmp(&right.fqn));
        Ok(rows)
    }
}

#[async_trait]
impl Tunneler for KubeGateway {
    async fn forward(
        &self,
        spec: TunnelSpec,
        ready: oneshot::Sender<Vec<PortMapping>>,
        token: CancellationToken,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), spec.namespace());
        let pod = spec.pod().to_string();
        pods.get(&pod)
            .await
            .with_context(|| format!("failed to fetch pod {}", spec.path))?;

        let mut listeners = Vec::with_capacity(spec.ports.len());
        for mapping in &spec.ports {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, mapping.local))
                .await
                .with_context(|| format!("failed to bind localhost:{}", mapping.local))?;
            listeners.push((listener, mapping.remote));
        }
        let _ = ready.send(spec.ports.clone());
        info!(path = %spec.path, container = %spec.container, "tunnel ready");

        let mut accept_loops = JoinSet::new();
        for (listener, remote) in listeners {
            accept_loops.spawn(accept_loop(
                pods.clone(),
                pod.clone(),
                listener,
                remote,
                token.clone(),
            ));
        }

        let result = tokio::select! {
            _ = token.cancelled() => Ok(()),
            Some(joined) = accept_loops.join_next() => match joined {
                Ok(result) => result,
                Err(error) => Err(anyhow::anyhow!("tunnel listener aborted: {error}")),
            },
        };
        accept_loops.shutdown().await;
        result
    }
}

async fn accept_loop(
    pods: Api<Pod>,
    pod: String,
    listener: TcpListener,
    remote: u16,
    token: CancellationToken,
) -> Result<()> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("failed to accept tunnel connection")?;
                debug!(%peer, %pod, remote, "tunnel connection");
                connections.spawn(relay(pods.clone(), pod.clone(), remote, socket));
            }
            Some(joined) = connections.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(error),
                Err(error) => warn!(%pod, "tunnel connection aborted: {error}"),
            },
        }
    }
}

/// Relays one local connection. Only failures to open the upstream stream
/// are returned; those mean the tunnel itself is broken.
async fn relay(pods: Api<Pod>, pod: String, remote: u16, mut socket: TcpStream) -> Result<()> {
    let mut forwarder = pods
        .portforward(&pod, &[remote])
        .await
        .with_context(|| format!("failed to open port-forward to {pod}:{remote}"))?;
    let Some(mut upstream) = forwarder.take_stream(remote) else {
        anyhow::bail!("port {remote} missing from port-forward to {pod}");
    };

    if let Err(error) = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await {
        debug!(%pod, remote, "tunnel connection closed: {error}");
    }
    drop(upstream);
    if let Err(error) = forwarder.join().await {
        debug!(%pod, remote, "port-forward join failed: {error}");
    }
    Ok(())
}

fn scoped_api<K>(client: &Client, scope: &NamespaceScope) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match scope {
        NamespaceScope::All => Api::all(client.clone()),
        NamespaceScope::Named(namespace) => Api::namespaced(client.clone(), namespace),
    }
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn pod_row(pod: &Pod) -> ResourceRow {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();
    let status = if pod.metadata.deletion_timestamp.is_some() {
        "Terminating".to_string()
    } else {
        pod.status
            .as_ref()
            .and_then(|value| value.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_else(|| "-".to_string());
    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let statuses = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or(&[]);
    let ready = statuses.iter().filter(|container| container.ready).count();
    let restarts = statuses
        .iter()
        .map(|container| container.restart_count)
        .sum::<i32>();

    ResourceRow::new(
        fqn(&namespace, &name),
        vec![
            namespace,
            name,
            format!("{ready}/{}", statuses.len()),
            status,
            restarts.to_string(),
            ip,
            node,
            human_age(pod.metadata.creation_timestamp.as_ref()),
        ],
    )
}

/// Container rows for a pod, regular containers first.
pub fn container_rows(path: &str, pod: &Pod, include_init: bool) -> Vec<ResourceRow> {
    let pod_age = human_age(pod.metadata.creation_timestamp.as_ref());
    let status = pod.status.as_ref();
    let statuses = status
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or(&[])
        .iter()
        .map(|status| (status.name.as_str(), status))
        .collect::<HashMap<_, _>>();
    let init_statuses = status
        .and_then(|status| status.init_container_statuses.as_deref())
        .unwrap_or(&[])
        .iter()
        .map(|status| (status.name.as_str(), status))
        .collect::<HashMap<_, _>>();

    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    let mut rows = spec
        .containers
        .iter()
        .map(|container| {
            container_row(
                path,
                container,
                statuses.get(container.name.as_str()).copied(),
                false,
                &pod_age,
            )
        })
        .collect::<Vec<_>>();
    if include_init {
        rows.extend(spec.init_containers.iter().flatten().map(|container| {
            container_row(
                path,
                container,
                init_statuses.get(container.name.as_str()).copied(),
                true,
                &pod_age,
            )
        }));
    }
    rows
}

fn container_row(
    path: &str,
    container: &Container,
    status: Option<&ContainerStatus>,
    init: bool,
    pod_age: &str,
) -> ResourceRow {
    let (state, age) = status
        .map(|status| container_state_and_age(status, pod_age))
        .unwrap_or_else(|| ("Pending".to_string(), pod_age.to_string()));
    let ports = container
        .ports
        .iter()
        .flatten()
        .map(|port| {
            let protocol = port.protocol.clone().unwrap_or_else(|| "TCP".to_string());
            match port.name.as_deref() {
                Some(name) if !name.is_empty() => {
                    format!("{name}:{}/{protocol}", port.container_port)
                }
                _ => format!("{}/{protocol}", port.container_port),
            }
        })
        .collect::<Vec<_>>()
        .join(",");

    ResourceRow::new(
        container_fqn(path, &container.name),
        vec![
            container.name.clone(),
            container.image.clone().unwrap_or_else(|| "-".to_string()),
            status.is_some_and(|status| status.ready).to_string(),
            state,
            init.to_string(),
            status
                .map(|status| status.restart_count)
                .unwrap_or_default()
                .to_string(),
            if ports.is_empty() { "-".to_string() } else { ports },
            age,
        ],
    )
}

fn container_state_and_age(container: &ContainerStatus, pod_age: &str) -> (String, String) {
    let terminated_label = |reason: Option<&String>, exit_code: i32| {
        reason
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Exit({exit_code})"))
    };

    if let Some(state) = container.state.as_ref() {
        if let Some(running) = state.running.as_ref() {
            let age = running
                .started_at
                .as_ref()
                .map(|time| human_age(Some(time)))
                .unwrap_or_else(|| pod_age.to_string());
            return ("Running".to_string(), age);
        }
        if let Some(waiting) = state.waiting.as_ref() {
            let label = waiting
                .reason
                .clone()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "Waiting".to_string());
            return (label, pod_age.to_string());
        }
        if let Some(terminated) = state.terminated.as_ref() {
            let age = terminated
                .finished_at
                .as_ref()
                .map(|time| human_age(Some(time)))
                .unwrap_or_else(|| pod_age.to_string());
            return (
                terminated_label(terminated.reason.as_ref(), terminated.exit_code),
                age,
            );
        }
    }

    ("Unknown".to_string(), pod_age.to_string())
}

fn service_row(service: &Service) -> ResourceRow {
    let name = service.name_any();
    let namespace = service.namespace().unwrap_or_default();
    let spec = service.spec.as_ref();
    let service_type = spec
        .and_then(|spec| spec.type_.clone())
        .unwrap_or_else(|| "ClusterIP".to_string());
    let cluster_ip = spec
        .and_then(|spec| spec.cluster_ip.clone())
        .unwrap_or_else(|| "-".to_string());
    let ports = spec
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|port| {
            let protocol = port.protocol.clone().unwrap_or_else(|| "TCP".to_string());
            format!("{}/{protocol}", port.port)
        })
        .collect::<Vec<_>>()
        .join(",");

    ResourceRow::new(
        fqn(&namespace, &name),
        vec![
            namespace,
            name,
            service_type,
            cluster_ip,
            if ports.is_empty() { "-".to_string() } else { ports },
            human_age(service.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn deployment_row(deployment: &Deployment) -> ResourceRow {
    let name = deployment.name_any();
    let namespace = deployment.namespace().unwrap_or_default();
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|status| status.updated_replicas).unwrap_or(0);
    let available = status
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);

    ResourceRow::new(
        fqn(&namespace, &name),
        vec![
            namespace,
            name,
            format!("{ready}/{desired}"),
            updated.to_string(),
            available.to_string(),
            human_age(deployment.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn node_row(node: &Node) -> ResourceRow {
    let name = node.name_any();
    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        })
        .map(|condition| match condition.status.as_str() {
            "True" => "Ready",
            "False" => "NotReady",
            _ => "Unknown",
        })
        .unwrap_or("Unknown")
        .to_string();
    let version = node
        .status
        .as_ref()
        .and_then(|status| status.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_else(|| "-".to_string());

    ResourceRow::new(
        name.clone(),
        vec![
            name,
            ready,
            node_roles(node),
            version,
            human_age(node.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn namespace_row(namespace: &Namespace) -> ResourceRow {
    let name = namespace.name_any();
    let phase = namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Active".to_string());

    ResourceRow::new(
        name.clone(),
        vec![
            name,
            phase,
            human_age(namespace.metadata.creation_timestamp.as_ref()),
        ],
    )
}

fn node_roles(node: &Node) -> String {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return "-".to_string();
    };

    let mut roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
        .map(|role| {
            let role = if role.is_empty() { "worker" } else { role };
            role.to_string()
        })
        .collect::<Vec<_>>();
    if roles.is_empty()
        && let Some(role) = labels.get("kubernetes.io/role")
    {
        roles.push(role.clone());
    }

    if roles.is_empty() {
        return "-".to_string();
    }
    roles.sort();
    roles.dedup();
    roles.join(",")
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };

    let now = k8s_openapi::jiff::Timestamp::now().as_second();
    format_elapsed_seconds(now - timestamp.0.as_second())
}
