use crate::bench::{
    BenchHost, BenchState, BenchmarkConfig, BenchmarkOrchestrator, BenchmarksFile, LoadGenerator,
    bench_config_path, report_rows, reports_dir,
};
use crate::cli::clamp_refresh;
use crate::dispatch::{Dispatcher, FlashLevel, StatusSink};
use crate::error::{SkiffError, compact_error};
use crate::forward::{
    ForwardHost, ForwarderRegistry, PortForwardSession, PortMapping, Tunneler, ensure_runnable,
    first_tcp_port, parse_port_mapping,
};
use crate::input::Action;
use crate::model::{
    NamespaceScope, ResourceKind, ResourceRow, RowEvent, TableData, container_fqn,
    format_elapsed_seconds,
};
use crate::sorter::{SortColumn, sorted_rows};
use crate::table::build_table;
use crate::watcher::{TableListener, WatchTarget};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PAGE_STEP: isize = 10;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Command,
    Filter,
    Confirm,
}

/// Side effects the main loop performs on behalf of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Watch { target: WatchTarget, generation: u64 },
    SetNamespace(NamespaceScope),
    SetRefreshRate(Duration),
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingAction {
    Forward {
        path: String,
        container: String,
        mapping: PortMapping,
    },
    DeleteForward {
        fqn: String,
    },
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    prompt: String,
    action: PendingAction,
}

#[derive(Debug, Clone)]
struct ViewState {
    target: WatchTarget,
    sort: SortColumn,
    selected: usize,
}

impl ViewState {
    fn new(target: WatchTarget) -> Self {
        Self {
            sort: SortColumn::by_name(target.kind),
            target,
            selected: 0,
        }
    }
}

pub struct AppDeps {
    pub cluster: String,
    pub context: String,
    pub scope: NamespaceScope,
    pub start_view: ResourceKind,
    pub home: PathBuf,
    pub root: CancellationToken,
    pub dispatcher: Dispatcher<App>,
    pub tunneler: Arc<dyn Tunneler>,
    pub generator: Arc<dyn LoadGenerator>,
}

pub struct App {
    running: bool,
    cluster: String,
    context: String,
    scope: NamespaceScope,
    mode: InputMode,
    input: String,
    filter: String,
    status: String,
    status_level: FlashLevel,
    view: ViewState,
    history: Vec<ViewState>,
    generation: u64,
    table: Arc<TableData>,
    table_error: Option<String>,
    pending: Option<PendingConfirmation>,
    forwarders: ForwarderRegistry,
    bench: BenchmarkOrchestrator,
    bench_path: PathBuf,
    dispatcher: Dispatcher<App>,
    tunneler: Arc<dyn Tunneler>,
    generator: Arc<dyn LoadGenerator>,
}

impl App {
    pub fn new(deps: AppDeps) -> Self {
        let view = ViewState::new(WatchTarget::kind(deps.start_view));
        let table = Arc::new(TableData::for_kind(deps.start_view, &deps.scope));
        let mut app = Self {
            running: true,
            bench_path: bench_config_path(&deps.home, &deps.cluster),
            bench: BenchmarkOrchestrator::new(
                deps.root.clone(),
                Some(reports_dir(&deps.home, &deps.cluster)),
            ),
            forwarders: ForwarderRegistry::new(deps.root),
            cluster: deps.cluster,
            context: deps.context,
            scope: deps.scope,
            mode: InputMode::Normal,
            input: String::new(),
            filter: String::new(),
            status: String::new(),
            status_level: FlashLevel::Info,
            view,
            history: Vec::new(),
            generation: 0,
            table,
            table_error: None,
            pending: None,
            dispatcher: deps.dispatcher,
            tunneler: deps.tunneler,
            generator: deps.generator,
        };

        let bench_path = app.bench_path.clone();
        if let Err(error) = app.bench.reload(&bench_path) {
            app.flash(FlashLevel::Error, error.to_string());
        }
        app
    }

    /// Command that starts the watcher for the initial view.
    pub fn initial_command(&mut self) -> AppCommand {
        self.watch_current()
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn namespace_scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn status_level(&self) -> FlashLevel {
        self.status_level
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.prompt.as_str())
    }

    pub fn view_kind(&self) -> ResourceKind {
        self.view.target.kind
    }

    #[cfg(test)]
    pub fn view_generation(&self) -> u64 {
        self.generation
    }

    pub fn sort(&self) -> SortColumn {
        self.view.sort
    }

    pub fn table(&self) -> &TableData {
        &self.table
    }

    pub fn table_error(&self) -> Option<&str> {
        self.table_error.as_deref()
    }

    pub fn selected_index(&self) -> Option<usize> {
        let len = self.visible_rows().len();
        (len > 0).then(|| self.view.selected.min(len - 1))
    }

    pub fn visible_rows(&self) -> Vec<&RowEvent> {
        sorted_rows(&self.table, self.view.sort)
            .into_iter()
            .filter(|row| row.matches_filter(&self.filter))
            .collect()
    }

    pub fn selected_row(&self) -> Option<&RowEvent> {
        let index = self.selected_index()?;
        self.visible_rows().get(index).copied()
    }

    pub fn view_title(&self) -> String {
        let kind = self.view.target.kind;
        let scope = match &self.view.target.parent {
            Some(parent) => parent.clone(),
            None if self.table.is_cluster_wide() => "all".to_string(),
            None => self.table.namespace.clone(),
        };
        format!("{}({scope})[{}]", kind.title(), self.table.len())
    }

    pub fn forward_count(&self) -> usize {
        self.forwarders.len()
    }

    pub fn bench_indicator(&self) -> Option<String> {
        match self.bench.state() {
            BenchState::Running => {
                let session = self.bench.session()?;
                Some(format!(
                    "Bench {} c={} n={} {}",
                    session.target_name,
                    session.config.concurrency,
                    session.config.request_count,
                    format_elapsed_seconds((Local::now() - session.started_at).num_seconds())
                ))
            }
            BenchState::Canceled => Some("Bench canceling".to_string()),
            BenchState::Idle | BenchState::Completed => None,
        }
    }

    /// Namespace a watcher for `target` should be scoped to.
    pub fn scope_for(&self, target: &WatchTarget) -> NamespaceScope {
        if target.kind.namespaced() && target.parent.is_none() {
            self.scope.clone()
        } else {
            NamespaceScope::All
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.flash(FlashLevel::Info, status.into());
    }

    pub fn table_loaded(&mut self, generation: u64, data: Arc<TableData>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale snapshot");
            return;
        }
        self.table = data;
        self.table_error = None;
    }

    pub fn table_failed(&mut self, generation: u64, message: String) {
        if generation != self.generation {
            return;
        }
        if self.table_error.as_deref() != Some(message.as_str()) {
            self.flash(FlashLevel::Error, message.clone());
        }
        self.table_error = Some(message);
    }

    /// Per-tick housekeeping for views built from local state.
    pub fn on_tick(&mut self) {
        self.hydrate_local();
    }

    pub fn shutdown(&mut self) {
        self.bench.cancel();
        if !self.forwarders.is_empty() {
            info!(count = self.forwarders.len(), "stopping port-forwards");
            self.forwarders.stop_all();
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.mode == InputMode::Confirm {
            return self.apply_confirmation(action);
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.set_status("Exit requested");
                AppCommand::None
            }
            Action::Down => self.move_selection(1),
            Action::Up => self.move_selection(-1),
            Action::PageDown => self.move_selection(PAGE_STEP),
            Action::PageUp => self.move_selection(-PAGE_STEP),
            Action::Top => {
                self.view.selected = 0;
                AppCommand::None
            }
            Action::Bottom => {
                self.view.selected = self.visible_rows().len().saturating_sub(1);
                AppCommand::None
            }
            Action::Enter => self.drill_down(),
            Action::Back => self.go_back(),
            Action::Refresh => self.refresh(),
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                AppCommand::None
            }
            Action::StartFilter => {
                self.mode = InputMode::Filter;
                self.input = self.filter.clone();
                AppCommand::None
            }
            Action::Sort(key) => {
                self.sort_hotkey(key);
                AppCommand::None
            }
            Action::PortForward => {
                self.request_forward(None);
                AppCommand::None
            }
            Action::BenchStart => {
                self.start_benchmark();
                AppCommand::None
            }
            Action::BenchStop => {
                self.stop_benchmark();
                AppCommand::None
            }
            Action::DeleteSelected => {
                self.request_delete();
                AppCommand::None
            }
            Action::SubmitInput => self.submit_input(),
            Action::CancelInput => {
                if self.mode == InputMode::Filter {
                    self.filter.clear();
                }
                self.mode = InputMode::Normal;
                self.input.clear();
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                self.sync_live_filter();
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.input.push(c);
                self.sync_live_filter();
                AppCommand::None
            }
            Action::ConfirmYes | Action::ConfirmNo => AppCommand::None,
        }
    }

    fn apply_confirmation(&mut self, action: Action) -> AppCommand {
        match action {
            Action::ConfirmYes => {
                self.mode = InputMode::Normal;
                if let Some(pending) = self.pending.take() {
                    self.confirm(pending.action);
                }
            }
            Action::ConfirmNo | Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.pending = None;
                self.set_status("Action cancelled");
            }
            _ => {}
        }
        AppCommand::None
    }

    fn confirm(&mut self, action: PendingAction) {
        match action {
            PendingAction::Forward {
                path,
                container,
                mapping,
            } => self.start_forward(&path, &container, mapping),
            PendingAction::DeleteForward { fqn } => match self.forwarders.stop(&fqn) {
                Some(_) => {
                    self.set_status(format!("PortForward {fqn} deleted"));
                    self.forwards_changed();
                }
                None => self.flash(FlashLevel::Warn, format!("No port-forward for {fqn}")),
            },
        }
    }

    fn sync_live_filter(&mut self) {
        if self.mode == InputMode::Filter {
            self.filter = self.input.trim().to_string();
            self.view.selected = 0;
        }
    }

    fn submit_input(&mut self) -> AppCommand {
        let input = std::mem::take(&mut self.input);
        let mode = std::mem::replace(&mut self.mode, InputMode::Normal);
        if mode == InputMode::Filter {
            self.filter = input.trim().to_string();
            self.view.selected = 0;
            return AppCommand::None;
        }
        self.run_command(input.trim().trim_start_matches(':'))
    }

    fn run_command(&mut self, line: &str) -> AppCommand {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return AppCommand::None;
        };
        let args = parts.collect::<Vec<_>>();

        match head.to_ascii_lowercase().as_str() {
            "q" | "q!" | "quit" => {
                self.running = false;
                AppCommand::None
            }
            "ns" | "namespace" if !args.is_empty() => self.set_namespace(args[0]),
            "pf" | "port-forward" if !args.is_empty() => {
                self.request_forward(args.first().copied());
                AppCommand::None
            }
            "bench" => {
                if args.first() == Some(&"stop") {
                    self.stop_benchmark();
                } else {
                    self.start_benchmark();
                }
                AppCommand::None
            }
            "sort" => {
                self.sort_command(&args);
                AppCommand::None
            }
            "filter" => {
                self.filter = args.join(" ");
                self.view.selected = 0;
                AppCommand::None
            }
            "refresh" | "r" => match args.first() {
                Some(raw) => self.set_refresh_rate(raw),
                None => self.refresh(),
            },
            token => match ResourceKind::from_token(token) {
                Some(ResourceKind::Containers) => {
                    if self.view.target.kind == ResourceKind::Pods {
                        self.drill_down()
                    } else {
                        self.flash(FlashLevel::Warn, "Select a pod to view its containers".into());
                        AppCommand::None
                    }
                }
                Some(kind) => self.switch_view(kind),
                None => {
                    self.flash(FlashLevel::Error, format!("Unknown command: {line}"));
                    AppCommand::None
                }
            },
        }
    }

    fn set_namespace(&mut self, token: &str) -> AppCommand {
        self.scope = NamespaceScope::parse(token);
        self.view.selected = 0;
        self.set_status(format!("Namespace set to {}", self.scope.label()));
        AppCommand::SetNamespace(self.scope.clone())
    }

    fn set_refresh_rate(&mut self, raw: &str) -> AppCommand {
        let Ok(millis) = raw.parse::<u64>() else {
            self.flash(FlashLevel::Error, format!("Invalid refresh rate {raw}"));
            return AppCommand::None;
        };
        let rate = clamp_refresh(millis);
        self.set_status(format!("Refresh rate set to {}ms", rate.as_millis()));
        AppCommand::SetRefreshRate(rate)
    }

    fn switch_view(&mut self, kind: ResourceKind) -> AppCommand {
        self.history.clear();
        self.view = ViewState::new(WatchTarget::kind(kind));
        self.watch_current()
    }

    fn watch_current(&mut self) -> AppCommand {
        self.generation += 1;
        self.table_error = None;
        let target = self.view.target.clone();
        self.table = Arc::new(TableData::for_kind(target.kind, &self.scope_for(&target)));
        if target.kind == ResourceKind::PortForwards {
            let bench_path = self.bench_path.clone();
            if let Err(error) = self.bench.reload(&bench_path) {
                self.flash(FlashLevel::Error, error.to_string());
            }
        }
        self.hydrate_local();
        info!(view = target.kind.title(), parent = ?target.parent, "switching view");
        AppCommand::Watch {
            target,
            generation: self.generation,
        }
    }

    fn refresh(&mut self) -> AppCommand {
        if self.view.target.kind.polled() {
            self.set_status("Refreshing...");
            AppCommand::Refresh
        } else {
            self.hydrate_local();
            AppCommand::None
        }
    }

    fn drill_down(&mut self) -> AppCommand {
        let Some(row) = self.selected_row().cloned() else {
            return AppCommand::None;
        };
        match self.view.target.kind {
            ResourceKind::Pods => {
                self.history.push(self.view.clone());
                self.view = ViewState::new(WatchTarget::containers_of(row.fqn));
                self.watch_current()
            }
            ResourceKind::Namespaces => {
                self.set_namespace(row.field(0));
                self.switch_view(ResourceKind::Pods)
            }
            ResourceKind::PortForwards => {
                self.history.push(self.view.clone());
                self.view = ViewState::new(WatchTarget::reports_of(row.fqn));
                self.watch_current()
            }
            ResourceKind::Benchmarks => {
                if let Some(dir) = self.bench.reports_dir() {
                    let path = dir.join(format!("{}.txt", row.fqn));
                    self.set_status(format!("Report {}", path.display()));
                }
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn go_back(&mut self) -> AppCommand {
        if let Some(previous) = self.history.pop() {
            self.view = previous;
            return self.watch_current();
        }
        if !self.filter.is_empty() {
            self.filter.clear();
            self.view.selected = 0;
        }
        AppCommand::None
    }

    fn move_selection(&mut self, delta: isize) -> AppCommand {
        let len = self.visible_rows().len();
        if len == 0 {
            self.view.selected = 0;
            return AppCommand::None;
        }
        let current = self.view.selected.min(len - 1) as isize;
        self.view.selected = (current + delta).clamp(0, len as isize - 1) as usize;
        AppCommand::None
    }

    fn sort_hotkey(&mut self, key: char) {
        let kind = self.view.target.kind;
        if let Some((offset, ascending)) = sort_binding(kind, key) {
            self.sort_by(SortColumn::relative(kind, offset, ascending));
        }
    }

    /// Same column twice flips the direction.
    fn sort_by(&mut self, sort: SortColumn) {
        if sort.index == self.view.sort.index {
            self.view.sort.ascending = !self.view.sort.ascending;
        } else {
            self.view.sort = sort;
        }
        self.view.selected = 0;
    }

    fn sort_command(&mut self, args: &[&str]) {
        let Some(column) = args.first() else {
            self.flash(FlashLevel::Warn, "Usage: sort <column> [asc|desc]".into());
            return;
        };
        let Some(index) = self
            .table
            .header
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
        else {
            self.flash(FlashLevel::Error, format!("Unknown column {column}"));
            return;
        };

        let column_count = self.table.header.len();
        match args.get(1).map(|dir| dir.to_ascii_lowercase()) {
            Some(dir) if dir == "asc" || dir == "desc" => {
                self.view.sort = SortColumn::new(index, column_count, dir == "asc");
                self.view.selected = 0;
            }
            _ => self.sort_by(SortColumn::new(index, column_count, true)),
        }
    }

    fn request_forward(&mut self, mapping: Option<&str>) {
        if self.view.target.kind != ResourceKind::Containers {
            self.flash(
                FlashLevel::Warn,
                "Port-forwards start from a container view".into(),
            );
            return;
        }
        let (Some(path), Some(row)) = (
            self.view.target.parent.clone(),
            self.selected_row().cloned(),
        ) else {
            return;
        };
        let container = row.field(0).to_string();
        let fqn = container_fqn(&path, &container);

        if self.forwarders.contains(&fqn) {
            self.flash(
                FlashLevel::Error,
                SkiffError::AlreadyExists { fqn }.to_string(),
            );
            return;
        }
        if let Err(error) = ensure_runnable(&self.table, &fqn) {
            self.flash(FlashLevel::Error, error.to_string());
            return;
        }

        let mapping = match mapping {
            Some(raw) => parse_port_mapping(raw),
            None => self
                .table
                .column_index("PORTS")
                .and_then(|index| first_tcp_port(row.field(index)))
                .map(|port| PortMapping {
                    local: port,
                    remote: port,
                }),
        };
        let Some(mapping) = mapping else {
            self.flash(
                FlashLevel::Error,
                format!("No usable TCP port for {fqn}; try :pf <local>:<pod>"),
            );
            return;
        };

        self.pending = Some(PendingConfirmation {
            prompt: format!(
                "PortForward {fqn} localhost:{} -> {}? [y/n]",
                mapping.local, mapping.remote
            ),
            action: PendingAction::Forward {
                path,
                container,
                mapping,
            },
        });
        self.mode = InputMode::Confirm;
    }

    fn start_forward(&mut self, path: &str, container: &str, mapping: PortMapping) {
        let fqn = container_fqn(path, container);
        if let Err(error) =
            self.forwarders
                .start(&fqn, path, container, mapping.local, mapping.remote)
        {
            self.flash(FlashLevel::Error, error.to_string());
            return;
        }

        let launched = self.forwarders.launch(
            &fqn,
            Arc::clone(&self.tunneler),
            self.dispatcher.clone(),
        );
        match launched {
            Ok(_) => {
                self.set_status(format!("Starting port-forward {fqn} {mapping}"));
                self.forwards_changed();
            }
            Err(error) => {
                self.forwarders.stop(&fqn);
                self.flash(FlashLevel::Error, error.to_string());
            }
        }
    }

    fn request_delete(&mut self) {
        if self.view.target.kind != ResourceKind::PortForwards {
            self.flash(
                FlashLevel::Warn,
                "Only port-forwards can be deleted from here".into(),
            );
            return;
        }
        let Some(fqn) = self.selected_row().map(|row| row.fqn.clone()) else {
            return;
        };
        self.pending = Some(PendingConfirmation {
            prompt: format!("Delete port-forward {fqn}? [y/n]"),
            action: PendingAction::DeleteForward { fqn },
        });
        self.mode = InputMode::Confirm;
    }

    fn start_benchmark(&mut self) {
        if self.view.target.kind != ResourceKind::PortForwards {
            self.flash(
                FlashLevel::Warn,
                "Benchmarks run from the port-forwards view".into(),
            );
            return;
        }
        let Some(fqn) = self.selected_row().map(|row| row.fqn.clone()) else {
            return;
        };
        let Some(session) = self.forwarders.get(&fqn).cloned() else {
            self.flash(FlashLevel::Error, format!("No port-forward for {fqn}"));
            return;
        };
        if !session.is_active() {
            self.flash(
                FlashLevel::Warn,
                format!("PortForward {fqn} is not active yet"),
            );
            return;
        }

        let config = self.bench.resolve(&session.path, &session.container);
        let url = forward_url(&session, &config);
        let started = self.bench.run(
            &session.fqn,
            &url,
            config,
            Arc::clone(&self.generator),
            self.dispatcher.clone(),
        );
        match started {
            Ok(id) => {
                debug!(id, %url, "benchmark requested");
                self.flash(FlashLevel::Warn, "Benchmark in progress...".into());
            }
            Err(error) => self.flash(FlashLevel::Error, error.to_string()),
        }
    }

    fn stop_benchmark(&mut self) {
        if self.bench.cancel() {
            self.flash(FlashLevel::Error, "Benchmark canceled!".into());
        } else {
            self.set_status("No benchmark running");
        }
    }

    /// Rebuilds the table of a view backed by local state.
    fn hydrate_local(&mut self) {
        let kind = self.view.target.kind;
        let rows = match kind {
            ResourceKind::PortForwards => {
                forward_rows(&self.forwarders.list(), self.bench.config())
            }
            ResourceKind::Benchmarks => match self.bench.reports_dir() {
                Some(dir) => report_rows(dir, self.view.target.parent.as_deref()),
                None => Vec::new(),
            },
            _ => return,
        };
        let table = build_table(
            kind,
            &NamespaceScope::All,
            Some(self.table.as_ref()),
            rows,
            Local::now(),
        );
        self.table = Arc::new(table);
    }
}

impl StatusSink for App {
    fn flash(&mut self, level: FlashLevel, message: String) {
        debug!(?level, "{message}");
        self.status = normalize_status_text(message);
        self.status_level = level;
    }

    fn status_reset(&mut self, shown: &str) {
        if self.status != normalize_status_text(shown.to_string()) {
            return;
        }
        self.status.clear();
        self.status_level = FlashLevel::Info;
    }
}

impl ForwardHost for App {
    fn forwarders(&mut self) -> &mut ForwarderRegistry {
        &mut self.forwarders
    }

    fn forwards_changed(&mut self) {
        self.hydrate_local();
    }
}

impl BenchHost for App {
    fn bench(&mut self) -> &mut BenchmarkOrchestrator {
        &mut self.bench
    }

    fn bench_config_reloaded(&mut self) {
        self.set_status("Benchmark config reloaded");
        self.hydrate_local();
    }
}

/// Hands watcher snapshots to the UI task, tagged with the view they belong to.
pub struct QueueListener {
    dispatcher: Dispatcher<App>,
    generation: u64,
}

impl QueueListener {
    pub fn new(dispatcher: Dispatcher<App>, generation: u64) -> Self {
        Self {
            dispatcher,
            generation,
        }
    }
}

impl TableListener for QueueListener {
    fn table_data_changed(&mut self, data: Arc<TableData>) {
        let generation = self.generation;
        self.dispatcher
            .queue_update(move |app: &mut App| app.table_loaded(generation, data));
    }

    fn table_load_failed(&mut self, error: &anyhow::Error) {
        let generation = self.generation;
        let message = compact_error(error).replace('\n', " ");
        self.dispatcher
            .queue_update(move |app: &mut App| app.table_failed(generation, message));
    }
}

/// Rows of the port-forwards view, with the effective benchmark config.
pub fn forward_rows(
    sessions: &[PortForwardSession],
    benchmarks: &BenchmarksFile,
) -> Vec<ResourceRow> {
    let now = Local::now();
    sessions
        .iter()
        .map(|session| {
            let config = benchmarks.resolve(&session.path, &session.container);
            ResourceRow::new(
                session.fqn.clone(),
                vec![
                    session.namespace().to_string(),
                    session.pod().to_string(),
                    session.container.clone(),
                    session.ports(),
                    forward_url(session, &config),
                    config.concurrency.to_string(),
                    config.request_count.to_string(),
                    format_elapsed_seconds((now - session.started_at).num_seconds()),
                ],
            )
        })
        .collect()
}

fn forward_url(session: &PortForwardSession, config: &BenchmarkConfig) -> String {
    let path = config.http.path.trim();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("http://localhost:{}{path}", session.local_port)
}

/// Sort hotkeys per view: column offset from NAME and the initial direction.
fn sort_binding(kind: ResourceKind, key: char) -> Option<(usize, bool)> {
    match (kind, key) {
        (ResourceKind::PortForwards, 'P') => Some((2, true)),
        (ResourceKind::PortForwards, 'U') => Some((3, true)),
        (ResourceKind::PortForwards, 'C') => Some((4, false)),
        (ResourceKind::PortForwards, 'N') => Some((5, false)),
        (ResourceKind::Benchmarks, 'S') => Some((1, true)),
        (ResourceKind::Benchmarks, 'A') => Some((4, true)),
        (_, 'N') => Some((0, true)),
        (ResourceKind::Pods, 'R') => Some((1, false)),
        (ResourceKind::Pods, 'S') => Some((2, true)),
        (ResourceKind::Pods, 'T') => Some((3, false)),
        (ResourceKind::Pods, 'D') => Some((4, true)),
        (ResourceKind::Pods, 'O') => Some((5, true)),
        (ResourceKind::Pods, 'A') => Some((6, true)),
        (ResourceKind::Containers, 'I') => Some((1, true)),
        (ResourceKind::Containers, 'R') => Some((2, false)),
        (ResourceKind::Containers, 'S') => Some((3, true)),
        (ResourceKind::Containers, 'T') => Some((5, false)),
        (ResourceKind::Containers, 'A') => Some((7, true)),
        (ResourceKind::Services, 'T') => Some((1, true)),
        (ResourceKind::Services, 'A') => Some((4, true)),
        (ResourceKind::Deployments, 'R') => Some((1, false)),
        (ResourceKind::Deployments, 'A') => Some((4, true)),
        (ResourceKind::Nodes, 'S') => Some((1, true)),
        (ResourceKind::Nodes, 'A') => Some((4, true)),
        (ResourceKind::Namespaces, 'S') => Some((1, true)),
        (ResourceKind::Namespaces, 'A') => Some((2, true)),
        _ => None,
    }
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    let status = status.lines().next().unwrap_or_default().to_string();
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}
