use chrono::{DateTime, Local};
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use tracing::warn;

pub const ALL_NAMESPACES: &str = "*";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Pods,
    Containers,
    Services,
    Deployments,
    Nodes,
    Namespaces,
    PortForwards,
    Benchmarks,
}

impl ResourceKind {
    #[cfg(test)]
    pub const ALL: [Self; 8] = [
        Self::Pods,
        Self::Containers,
        Self::Services,
        Self::Deployments,
        Self::Nodes,
        Self::Namespaces,
        Self::PortForwards,
        Self::Benchmarks,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Pods => "Pods",
            Self::Containers => "Containers",
            Self::Services => "Services",
            Self::Deployments => "Deployments",
            Self::Nodes => "Nodes",
            Self::Namespaces => "Namespaces",
            Self::PortForwards => "Port Forwards",
            Self::Benchmarks => "Benchmarks",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Some(Self::Pods),
            "co" | "container" | "containers" => Some(Self::Containers),
            "svc" | "service" | "services" => Some(Self::Services),
            "deploy" | "deployment" | "deployments" | "dp" => Some(Self::Deployments),
            "node" | "nodes" | "no" => Some(Self::Nodes),
            "ns" | "namespace" | "namespaces" => Some(Self::Namespaces),
            "pf" | "portforward" | "portforwards" | "port-forward" | "port-forwards"
            | "forwards" => Some(Self::PortForwards),
            "be" | "benchmark" | "benchmarks" => Some(Self::Benchmarks),
            _ => None,
        }
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            Self::Pods => &[
                "NAMESPACE", "NAME", "READY", "STATUS", "RESTARTS", "IP", "NODE", "AGE",
            ],
            Self::Containers => &[
                "NAME", "IMAGE", "READY", "STATE", "INIT", "RESTARTS", "PORTS", "AGE",
            ],
            Self::Services => &["NAMESPACE", "NAME", "TYPE", "CLUSTER-IP", "PORTS", "AGE"],
            Self::Deployments => &[
                "NAMESPACE",
                "NAME",
                "READY",
                "UP-TO-DATE",
                "AVAILABLE",
                "AGE",
            ],
            Self::Nodes => &["NAME", "STATUS", "ROLES", "VERSION", "AGE"],
            Self::Namespaces => &["NAME", "STATUS", "AGE"],
            Self::PortForwards => &[
                "NAMESPACE",
                "NAME",
                "CONTAINER",
                "PORTS",
                "URL",
                "C",
                "N",
                "AGE",
            ],
            Self::Benchmarks => &["NAME", "STATUS", "REQ/S", "ERRORS", "AGE"],
        }
    }

    pub fn numeric_columns(self) -> &'static [&'static str] {
        match self {
            Self::Pods | Self::Containers => &["RESTARTS"],
            Self::Deployments => &["UP-TO-DATE", "AVAILABLE"],
            Self::PortForwards => &["C", "N"],
            Self::Benchmarks => &["REQ/S", "ERRORS"],
            Self::Services | Self::Nodes | Self::Namespaces => &[],
        }
    }

    /// Index of the NAME column; resource-specific sort offsets are relative to it.
    pub fn name_column(self) -> usize {
        match self {
            Self::Pods | Self::Services | Self::Deployments | Self::PortForwards => 1,
            Self::Containers | Self::Nodes | Self::Namespaces | Self::Benchmarks => 0,
        }
    }

    pub fn namespaced(self) -> bool {
        matches!(
            self,
            Self::Pods | Self::Containers | Self::Services | Self::Deployments
        )
    }

    /// Kinds whose rows come from the cluster rather than local state.
    pub fn polled(self) -> bool {
        !matches!(self, Self::PortForwards | Self::Benchmarks)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl NamespaceScope {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() || token == ALL_NAMESPACES || token.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Named(token.to_string())
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Named(namespace) => namespace.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_NAMESPACES,
            Self::Named(namespace) => namespace,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn contains(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(current) => current == namespace,
        }
    }
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

/// One row as produced by a fetch, before change classification.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResourceRow {
    pub fqn: String,
    pub fields: Vec<String>,
}

impl ResourceRow {
    pub fn new(fqn: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            fqn: fqn.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RowAction {
    New,
    Update,
    Delete,
    Unchanged,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RowEvent {
    pub fqn: String,
    pub action: RowAction,
    pub fields: Vec<String>,
    /// Previous value of every changed field, `None` where the field is unchanged.
    pub deltas: Vec<Option<String>>,
}

impl RowEvent {
    pub fn new_row(row: ResourceRow) -> Self {
        let deltas = vec![None; row.fields.len()];
        Self {
            fqn: row.fqn,
            action: RowAction::New,
            fields: row.fields,
            deltas,
        }
    }

    #[cfg(test)]
    pub fn changed_indices(&self) -> Vec<usize> {
        self.deltas
            .iter()
            .enumerate()
            .filter_map(|(index, delta)| delta.as_ref().map(|_| index))
            .collect()
    }

    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();
        if self.fqn.to_ascii_lowercase().contains(&query_lower) {
            return true;
        }

        self.fields
            .iter()
            .any(|field| field.to_ascii_lowercase().contains(&query_lower))
    }
}

/// One refresh worth of rows for a resource kind.
///
/// Built once per poll cycle and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub header: Vec<String>,
    pub numeric_columns: BTreeSet<String>,
    pub namespace: String,
    pub refreshed_at: Option<DateTime<Local>>,
    rows: Vec<RowEvent>,
    index: HashMap<String, usize>,
}

impl TableData {
    pub fn for_kind(kind: ResourceKind, scope: &NamespaceScope) -> Self {
        Self {
            header: kind.header().iter().map(|h| h.to_string()).collect(),
            numeric_columns: kind
                .numeric_columns()
                .iter()
                .map(|h| h.to_string())
                .collect(),
            namespace: scope.as_str().to_string(),
            refreshed_at: None,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Appends a row event; duplicates and rows of the wrong width are rejected.
    pub fn push(&mut self, event: RowEvent) -> bool {
        if event.fields.len() != self.header.len() {
            warn!(
                fqn = %event.fqn,
                fields = event.fields.len(),
                columns = self.header.len(),
                "dropping row with mismatched width"
            );
            return false;
        }
        if self.index.contains_key(&event.fqn) {
            warn!(fqn = %event.fqn, "dropping duplicate row");
            return false;
        }
        self.index.insert(event.fqn.clone(), self.rows.len());
        self.rows.push(event);
        true
    }

    pub fn get(&self, fqn: &str) -> Option<&RowEvent> {
        self.index.get(fqn).and_then(|index| self.rows.get(*index))
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.index.contains_key(fqn)
    }

    pub fn rows(&self) -> &[RowEvent] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }

    pub fn is_numeric(&self, column: usize) -> bool {
        self.header
            .get(column)
            .is_some_and(|name| self.numeric_columns.contains(name))
    }

    pub fn is_cluster_wide(&self) -> bool {
        self.namespace == ALL_NAMESPACES
    }
}

pub fn fqn(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        return name.to_string();
    }
    format!("{namespace}/{name}")
}

/// Splits `namespace/name` into its parts; cluster-scoped names have no namespace.
pub fn namespaced(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => ("", path),
    }
}

/// Key of a container-scoped row, a port-forward, and a benchmark override.
pub fn container_fqn(path: &str, container: &str) -> String {
    format!("{path}|{container}")
}

pub fn format_elapsed_seconds(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
