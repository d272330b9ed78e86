//! Benchmark configuration and the single-flight load-test runner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, FlashLevel, StatusSink};
use crate::error::{SkiffError, SkiffResult, compact_error};
use crate::model::{ResourceRow, container_fqn, format_elapsed_seconds};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_REQUESTS: usize = 200;
pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_PATH: &str = "/";

const STATUS_HOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub method: String,
    pub path: String,
    pub host: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    #[serde(alias = "c")]
    pub concurrency: usize,
    #[serde(rename = "requests", alias = "n")]
    pub request_count: usize,
    pub http: HttpConfig,
}

impl BenchmarkConfig {
    pub fn builtin() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_count: DEFAULT_REQUESTS,
            http: HttpConfig {
                method: DEFAULT_METHOD.to_string(),
                path: DEFAULT_PATH.to_string(),
                ..HttpConfig::default()
            },
        }
    }

    /// Field-wise merge: only non-zero, non-empty fields of `other` win.
    pub fn merge(&self, other: &Self) -> Self {
        fn pick(base: &str, over: &str) -> String {
            let picked = if over.trim().is_empty() { base } else { over };
            picked.to_string()
        }

        Self {
            concurrency: if other.concurrency == 0 {
                self.concurrency
            } else {
                other.concurrency
            },
            request_count: if other.request_count == 0 {
                self.request_count
            } else {
                other.request_count
            },
            http: HttpConfig {
                method: pick(&self.http.method, &other.http.method),
                path: pick(&self.http.path, &other.http.path),
                host: pick(&self.http.host, &other.http.host),
                body: pick(&self.http.body, &other.http.body),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Benchmarks {
    pub defaults: BenchmarkConfig,
    pub containers: BTreeMap<String, BenchmarkConfig>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct BenchmarksFile {
    pub benchmarks: Benchmarks,
}

impl BenchmarksFile {
    /// Reads a benchmark file; a missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Effective config for a container: built-ins, then defaults, then the override.
    pub fn resolve(&self, path: &str, container: &str) -> BenchmarkConfig {
        let base = BenchmarkConfig::builtin().merge(&self.benchmarks.defaults);
        match self.benchmarks.containers.get(&container_id(path, container)) {
            Some(over) => base.merge(over),
            None => base,
        }
    }
}

pub fn container_id(path: &str, container: &str) -> String {
    container_fqn(path, container)
}

pub fn bench_config_path(home: &Path, cluster: &str) -> PathBuf {
    home.join(format!("bench-{}.yml", file_safe(cluster)))
}

pub fn reports_dir(home: &Path, cluster: &str) -> PathBuf {
    home.join("benchmarks").join(file_safe(cluster))
}

/// File-name prefix shared by every report of one benchmark target.
pub fn report_prefix(target_name: &str) -> String {
    format!("{}-", file_safe(target_name))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | '|' | ':' | ' ' => '_',
            ch => ch,
        })
        .collect()
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BenchTarget {
    pub name: String,
    pub url: String,
    pub config: BenchmarkConfig,
}

#[derive(Debug, Clone, Default)]
pub struct BenchReport {
    pub sent: usize,
    /// Responses keyed by status class (2 for 2xx and so on).
    pub by_class: BTreeMap<u16, usize>,
    pub errors: usize,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.sent as f64 / secs
    }

    pub fn summary(&self) -> String {
        let ok = self.by_class.get(&2).copied().unwrap_or_default();
        format!(
            "{} requests, {} ok, {} errors, {:.1} req/s",
            self.sent,
            ok,
            self.errors,
            self.requests_per_second()
        )
    }

    pub fn render(&self, target: &BenchTarget, canceled: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target:      {}", target.name);
        let _ = writeln!(out, "URL:         {}", target.url);
        let _ = writeln!(out, "Method:      {}", target.config.http.method);
        let _ = writeln!(out, "Concurrency: {}", target.config.concurrency);
        let _ = writeln!(out, "Requests:    {}", target.config.request_count);
        let _ = writeln!(out, "Canceled:    {canceled}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Sent:        {}", self.sent);
        for (class, count) in &self.by_class {
            let _ = writeln!(out, "{class}xx:         {count}");
        }
        let _ = writeln!(out, "Errors:      {}", self.errors);
        let _ = writeln!(out, "Elapsed:     {:.3}s", self.elapsed.as_secs_f64());
        let _ = writeln!(out, "Req/sec:     {:.2}", self.requests_per_second());
        out
    }

    fn absorb(&mut self, other: BenchReport) {
        self.sent += other.sent;
        self.errors += other.errors;
        for (class, count) in other.by_class {
            *self.by_class.entry(class).or_default() += count;
        }
    }
}

/// Issues the load for one benchmark; returns once the budget is spent or
/// `token` is cancelled.
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    async fn generate(&self, target: BenchTarget, token: CancellationToken) -> Result<BenchReport>;
}

#[derive(Debug, Clone)]
pub struct HttpLoadGenerator {
    client: reqwest::Client,
}

impl HttpLoadGenerator {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LoadGenerator for HttpLoadGenerator {
    async fn generate(&self, target: BenchTarget, token: CancellationToken) -> Result<BenchReport> {
        let method = reqwest::Method::from_bytes(target.config.http.method.as_bytes())
            .with_context(|| format!("invalid HTTP method {}", target.config.http.method))?;
        let url = reqwest::Url::parse(&target.url)
            .with_context(|| format!("invalid benchmark URL {}", target.url))?;
        let budget = Arc::new(AtomicUsize::new(target.config.request_count));
        let started = Instant::now();

        let mut workers = Vec::new();
        for _ in 0..target.config.concurrency.max(1) {
            let client = self.client.clone();
            let method = method.clone();
            let url = url.clone();
            let http = target.config.http.clone();
            let budget = Arc::clone(&budget);
            let token = token.clone();
            workers.push(tokio::spawn(async move {
                let mut tally = BenchReport::default();
                while take_one(&budget) {
                    let mut request = client.request(method.clone(), url.clone());
                    if !http.host.is_empty() {
                        request = request.header(reqwest::header::HOST, http.host.clone());
                    }
                    if !http.body.is_empty() {
                        request = request.body(http.body.clone());
                    }
                    let response = tokio::select! {
                        _ = token.cancelled() => break,
                        response = request.send() => response,
                    };
                    tally.sent += 1;
                    match response {
                        Ok(response) => {
                            *tally
                                .by_class
                                .entry(response.status().as_u16() / 100)
                                .or_default() += 1;
                        }
                        Err(error) => {
                            debug!("benchmark request failed: {error}");
                            tally.errors += 1;
                        }
                    }
                }
                tally
            }));
        }

        let mut report = BenchReport::default();
        for worker in workers {
            match worker.await {
                Ok(tally) => report.absorb(tally),
                Err(error) => warn!("benchmark worker aborted: {error}"),
            }
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BenchState {
    Idle,
    Running,
    Canceled,
    Completed,
}

#[derive(Debug, Clone)]
pub struct BenchmarkSession {
    pub id: u64,
    pub config: BenchmarkConfig,
    pub target_name: String,
    pub state: BenchState,
    pub started_at: DateTime<Local>,
    token: CancellationToken,
}

/// How a benchmark task ended, as seen by the completion job.
#[derive(Debug)]
pub struct BenchOutcome {
    pub id: u64,
    pub canceled: bool,
    pub result: Result<BenchReport>,
    pub report_path: Option<PathBuf>,
}

/// Implemented by the UI-side state that owns the orchestrator.
pub trait BenchHost: StatusSink + 'static {
    fn bench(&mut self) -> &mut BenchmarkOrchestrator;

    fn bench_config_reloaded(&mut self) {}
}

pub struct BenchmarkOrchestrator {
    parent: CancellationToken,
    config: BenchmarksFile,
    session: Option<BenchmarkSession>,
    next_id: u64,
    reports_dir: Option<PathBuf>,
    status_hold: Duration,
}

impl BenchmarkOrchestrator {
    pub fn new(parent: CancellationToken, reports_dir: Option<PathBuf>) -> Self {
        Self {
            parent,
            config: BenchmarksFile::default(),
            session: None,
            next_id: 1,
            reports_dir,
            status_hold: STATUS_HOLD,
        }
    }

    #[cfg(test)]
    pub fn with_status_hold(mut self, hold: Duration) -> Self {
        self.status_hold = hold;
        self
    }

    pub fn config(&self) -> &BenchmarksFile {
        &self.config
    }

    pub fn reports_dir(&self) -> Option<&Path> {
        self.reports_dir.as_deref()
    }

    pub fn resolve(&self, path: &str, container: &str) -> BenchmarkConfig {
        self.config.resolve(path, container)
    }

    /// Re-reads the benchmark file. On failure the current config stays.
    pub fn reload(&mut self, path: &Path) -> SkiffResult<()> {
        match BenchmarksFile::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "benchmark config loaded");
                self.config = config;
                Ok(())
            }
            Err(error) => Err(SkiffError::ConfigLoadFailure {
                path: path.to_path_buf(),
                message: compact_error(&error).replace('\n', " "),
            }),
        }
    }

    pub fn session(&self) -> Option<&BenchmarkSession> {
        self.session.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.state == BenchState::Running)
    }

    pub fn state(&self) -> BenchState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(BenchState::Idle)
    }

    /// Starts a benchmark in the background and returns its id.
    pub fn run<S: BenchHost>(
        &mut self,
        target_name: &str,
        url: &str,
        config: BenchmarkConfig,
        generator: Arc<dyn LoadGenerator>,
        dispatcher: Dispatcher<S>,
    ) -> SkiffResult<u64> {
        if let Some(running) = self
            .session
            .as_ref()
            .filter(|session| session.state == BenchState::Running)
        {
            return Err(SkiffError::AlreadyRunning {
                target: running.target_name.clone(),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let token = self.parent.child_token();
        self.session = Some(BenchmarkSession {
            id,
            config: config.clone(),
            target_name: target_name.to_string(),
            state: BenchState::Running,
            started_at: Local::now(),
            token: token.clone(),
        });
        info!(id, target = target_name, url, "benchmark started");

        let target = BenchTarget {
            name: target_name.to_string(),
            url: url.to_string(),
            config,
        };
        tokio::spawn(drive(
            id,
            target,
            token,
            generator,
            self.reports_dir.clone(),
            self.status_hold,
            dispatcher,
        ));
        Ok(id)
    }

    /// Signals the running benchmark to stop. Returns `false` when none runs.
    pub fn cancel(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) if session.state == BenchState::Running => {
                session.state = BenchState::Canceled;
                session.token.cancel();
                info!(id = session.id, "benchmark canceled");
                true
            }
            _ => false,
        }
    }

    /// Records a finished benchmark and clears the slot if `id` still owns it.
    pub fn complete(&mut self, id: u64, canceled: bool) -> Option<BenchmarkSession> {
        if self.session.as_ref().is_none_or(|session| session.id != id) {
            debug!(id, "ignoring completion of a replaced benchmark");
            return None;
        }
        let mut session = self.session.take()?;
        session.state = if canceled || session.state == BenchState::Canceled {
            BenchState::Canceled
        } else {
            BenchState::Completed
        };
        session.token.cancel();
        Some(session)
    }
}

async fn drive<S: BenchHost>(
    id: u64,
    target: BenchTarget,
    token: CancellationToken,
    generator: Arc<dyn LoadGenerator>,
    reports_dir: Option<PathBuf>,
    status_hold: Duration,
    dispatcher: Dispatcher<S>,
) {
    let result = {
        let target = target.clone();
        let token = token.clone();
        match tokio::spawn(async move { generator.generate(target, token).await }).await {
            Ok(result) => result,
            Err(error) => Err(anyhow::anyhow!("load generator aborted: {error}")),
        }
    };
    let canceled = token.is_cancelled();

    let report_path = match (&result, reports_dir) {
        (Ok(report), Some(dir)) => {
            match write_report(&dir, &target, report, canceled).await {
                Ok(path) => Some(path),
                Err(error) => {
                    warn!("failed to write benchmark report: {error:#}");
                    None
                }
            }
        }
        _ => None,
    };

    let outcome = BenchOutcome {
        id,
        canceled,
        result,
        report_path,
    };
    let (_, message) = finish_message(&outcome);
    if !dispatcher.queue_update(move |host: &mut S| benchmark_finished(host, outcome)) {
        return;
    }

    tokio::time::sleep(status_hold).await;
    dispatcher.queue_update(move |host: &mut S| {
        if !host.bench().is_running() {
            host.status_reset(&message);
        }
    });
}

fn finish_message(outcome: &BenchOutcome) -> (FlashLevel, String) {
    match &outcome.result {
        Err(error) => (
            FlashLevel::Error,
            format!("Benchmark failed: {}", compact_error(error).replace('\n', " ")),
        ),
        Ok(_) if outcome.canceled => (FlashLevel::Info, "Benchmark canceled".to_string()),
        Ok(report) => {
            let saved = outcome
                .report_path
                .as_ref()
                .map(|path| format!(" (saved {})", path.display()))
                .unwrap_or_default();
            (
                FlashLevel::Info,
                format!("Benchmark completed: {}{saved}", report.summary()),
            )
        }
    }
}

fn benchmark_finished<S: BenchHost>(host: &mut S, outcome: BenchOutcome) {
    if host.bench().complete(outcome.id, outcome.canceled).is_none() {
        return;
    }
    match &outcome.result {
        Err(error) => warn!(id = outcome.id, "benchmark failed: {error:#}"),
        Ok(report) if !outcome.canceled => {
            info!(id = outcome.id, summary = %report.summary(), "benchmark completed");
        }
        Ok(_) => {}
    }
    let (level, message) = finish_message(&outcome);
    host.flash(level, message);
}

async fn write_report(
    dir: &Path,
    target: &BenchTarget,
    report: &BenchReport,
    canceled: bool,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{}-{stamp}.txt", file_safe(&target.name)));
    tokio::fs::write(&path, report.render(target, canceled))
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Rows of the benchmarks view, one per report in `dir`.
///
/// With `target` set only that target's reports are listed. A missing
/// directory just means nothing has run yet.
pub fn report_rows(dir: &Path, target: Option<&str>) -> Vec<ResourceRow> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(error) => {
            warn!(dir = %dir.display(), "failed to list benchmark reports: {error}");
            return Vec::new();
        }
    };
    let prefix = target.map(report_prefix);
    let now = SystemTime::now();
    entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .filter_map(|path| report_row(&path, now))
        .filter(|row| {
            prefix
                .as_deref()
                .is_none_or(|prefix| row.fqn.starts_with(prefix))
        })
        .collect()
}

fn report_row(path: &Path, now: SystemTime) -> Option<ResourceRow> {
    let name = path.file_stem()?.to_string_lossy().into_owned();
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(error) => {
            debug!(path = %path.display(), "skipping unreadable report: {error}");
            return None;
        }
    };

    let mut canceled = false;
    let mut errors = 0usize;
    let mut rate = "n/a".to_string();
    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Canceled" => canceled = value == "true",
            "Errors" => errors = value.parse().unwrap_or_default(),
            "Req/sec" => rate = value.to_string(),
            _ => {}
        }
    }
    let status = if canceled {
        "Canceled"
    } else if errors > 0 {
        "Fail"
    } else {
        "Pass"
    };
    let age = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .map(|elapsed| format_elapsed_seconds(elapsed.as_secs() as i64))
        .unwrap_or_else(|| "n/a".to_string());

    Some(ResourceRow::new(
        name.clone(),
        vec![name, status.to_string(), rate, errors.to_string(), age],
    ))
}

#[cfg(test)]
mod tests {
    use super::{
        BenchHost, BenchReport, BenchState, BenchTarget, BenchmarkConfig, BenchmarkOrchestrator,
        BenchmarksFile, HttpLoadGenerator, LoadGenerator, bench_config_path, report_rows,
    };
    use crate::dispatch::{Dispatcher, FlashLevel, JobQueue, StatusSink};
    use crate::error::SkiffError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    struct Host {
        bench: BenchmarkOrchestrator,
        flashes: Vec<(FlashLevel, String)>,
        status: String,
        resets: usize,
    }

    impl Host {
        fn new(reports: Option<&Path>) -> Self {
            Self {
                bench: BenchmarkOrchestrator::new(
                    CancellationToken::new(),
                    reports.map(Path::to_path_buf),
                )
                .with_status_hold(Duration::from_millis(10)),
                flashes: Vec::new(),
                status: String::new(),
                resets: 0,
            }
        }
    }

    impl StatusSink for Host {
        fn flash(&mut self, level: FlashLevel, message: String) {
            self.status = message.clone();
            self.flashes.push((level, message));
        }

        fn status_reset(&mut self, shown: &str) {
            if self.status == shown {
                self.status.clear();
                self.resets += 1;
            }
        }
    }

    impl BenchHost for Host {
        fn bench(&mut self) -> &mut BenchmarkOrchestrator {
            &mut self.bench
        }
    }

    /// Runs until cancelled, then reports what it "sent".
    struct UntilCanceled;

    #[async_trait]
    impl LoadGenerator for UntilCanceled {
        async fn generate(&self, _: BenchTarget, token: CancellationToken) -> Result<BenchReport> {
            token.cancelled().await;
            Ok(BenchReport {
                sent: 3,
                ..BenchReport::default()
            })
        }
    }

    struct Instant200;

    #[async_trait]
    impl LoadGenerator for Instant200 {
        async fn generate(&self, target: BenchTarget, _: CancellationToken) -> Result<BenchReport> {
            let mut report = BenchReport {
                sent: target.config.request_count,
                elapsed: Duration::from_millis(500),
                ..BenchReport::default()
            };
            report.by_class.insert(2, target.config.request_count);
            Ok(report)
        }
    }

    struct Panics;

    #[async_trait]
    impl LoadGenerator for Panics {
        async fn generate(&self, _: BenchTarget, _: CancellationToken) -> Result<BenchReport> {
            panic!("generator blew up");
        }
    }

    async fn apply_next(queue: &mut JobQueue<Host>, host: &mut Host) {
        let job = timeout(Duration::from_secs(5), queue.next())
            .await
            .expect("job in time")
            .expect("queue open");
        job(host);
    }

    fn config(concurrency: usize, requests: usize) -> BenchmarkConfig {
        BenchmarkConfig {
            concurrency,
            request_count: requests,
            ..BenchmarkConfig::default()
        }
    }

    #[test]
    fn override_fields_win_only_when_set() {
        let merged = config(10, 100).merge(&config(0, 50));
        assert_eq!(merged.concurrency, 10);
        assert_eq!(merged.request_count, 50);
    }

    #[test]
    fn resolve_layers_builtins_defaults_and_overrides() {
        let file: BenchmarksFile = serde_yaml::from_str(
            r#"
benchmarks:
  defaults:
    concurrency: 4
    requests: 400
  containers:
    "ns/web|app":
      requests: 50
      http:
        path: /health
        host: web.local
"#,
        )
        .expect("valid yaml");

        let app = file.resolve("ns/web", "app");
        assert_eq!(app.concurrency, 4);
        assert_eq!(app.request_count, 50);
        assert_eq!(app.http.method, "GET");
        assert_eq!(app.http.path, "/health");
        assert_eq!(app.http.host, "web.local");

        let other = file.resolve("ns/web", "sidecar");
        assert_eq!(other.request_count, 400);
        assert_eq!(other.http.path, "/");
    }

    #[test]
    fn reload_failure_keeps_previous_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = bench_config_path(dir.path(), "kind-dev");
        assert!(path.ends_with("bench-kind-dev.yml"));

        let mut bench = BenchmarkOrchestrator::new(CancellationToken::new(), None);
        std::fs::write(&path, "benchmarks:\n  defaults:\n    concurrency: 7\n").unwrap();
        bench.reload(&path).expect("valid reload");
        assert_eq!(bench.resolve("ns/pod", "app").concurrency, 7);

        std::fs::write(&path, "benchmarks: [not, a, map").unwrap();
        let error = bench.reload(&path).unwrap_err();
        assert!(matches!(error, SkiffError::ConfigLoadFailure { .. }));
        assert_eq!(bench.resolve("ns/pod", "app").concurrency, 7);
    }

    #[test]
    fn missing_file_means_builtin_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bench = BenchmarkOrchestrator::new(CancellationToken::new(), None);
        bench
            .reload(&dir.path().join("bench-none.yml"))
            .expect("missing file is fine");
        assert_eq!(bench.resolve("ns/pod", "app"), BenchmarkConfig::builtin());
    }

    #[tokio::test]
    async fn only_one_benchmark_runs_at_a_time() {
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let mut host = Host::new(None);

        let first = host
            .bench
            .run("ns/a|app", "http://localhost:1/", config(1, 10), Arc::new(UntilCanceled), dispatcher.clone())
            .expect("first run");
        let error = host
            .bench
            .run("ns/b|app", "http://localhost:2/", config(1, 10), Arc::new(UntilCanceled), dispatcher.clone())
            .unwrap_err();
        assert!(matches!(error, SkiffError::AlreadyRunning { target } if target == "ns/a|app"));
        assert_eq!(host.bench.session().map(|s| s.id), Some(first));

        assert_eq!(host.bench.state(), BenchState::Running);
        assert!(host.bench.cancel());
        assert!(!host.bench.cancel());
        assert_eq!(host.bench.state(), BenchState::Canceled);

        apply_next(&mut queue, &mut host).await;
        assert!(host.bench.session().is_none());
        assert_eq!(host.bench.state(), BenchState::Idle);
        assert_eq!(host.flashes.last().map(|f| f.1.as_str()), Some("Benchmark canceled"));

        apply_next(&mut queue, &mut host).await;
        assert_eq!(host.resets, 1);

        host.bench
            .run("ns/b|app", "http://localhost:2/", config(1, 10), Arc::new(UntilCanceled), dispatcher)
            .expect("slot is free again");
    }

    #[tokio::test]
    async fn late_completion_does_not_clear_a_newer_run() {
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let mut host = Host::new(None);

        let first = host
            .bench
            .run("ns/a|app", "http://localhost:1/", config(1, 1), Arc::new(UntilCanceled), dispatcher.clone())
            .unwrap();
        host.bench.cancel();
        let second = host
            .bench
            .run("ns/a|app", "http://localhost:1/", config(1, 1), Arc::new(UntilCanceled), dispatcher)
            .expect("canceled run frees the slot");
        assert_ne!(first, second);

        apply_next(&mut queue, &mut host).await;
        assert_eq!(host.bench.session().map(|s| s.id), Some(second));
        assert!(host.bench.is_running());
        assert!(host.flashes.is_empty());

        apply_next(&mut queue, &mut host).await;
        assert_eq!(host.resets, 0, "status stays while the newer run is going");
        host.bench.cancel();
    }

    #[tokio::test]
    async fn completion_runs_even_when_generator_panics() {
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let mut host = Host::new(None);
        host.bench
            .run("ns/a|app", "http://localhost:1/", config(1, 1), Arc::new(Panics), dispatcher)
            .unwrap();

        apply_next(&mut queue, &mut host).await;
        assert!(host.bench.session().is_none());
        assert_eq!(host.flashes.len(), 1);
        assert_eq!(host.flashes[0].0, FlashLevel::Error);
        assert!(host.flashes[0].1.contains("Benchmark failed"));
    }

    #[tokio::test]
    async fn completed_run_writes_a_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reports = dir.path().join("benchmarks").join("kind-dev");
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let mut host = Host::new(Some(&reports));
        host.bench
            .run("ns/a|app", "http://localhost:1/", config(2, 40), Arc::new(Instant200), dispatcher)
            .unwrap();

        apply_next(&mut queue, &mut host).await;
        let (level, message) = &host.flashes[0];
        assert_eq!(*level, FlashLevel::Info);
        assert!(message.starts_with("Benchmark completed: 40 requests, 40 ok"));

        let files = std::fs::read_dir(&reports)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("ns_a_app-"));
        let body = std::fs::read_to_string(reports.join(&files[0])).unwrap();
        assert!(body.contains("2xx:"));

        let rows = report_rows(&reports, Some("ns/a|app"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields[1..4], ["Pass", "80.00", "0"]);
        assert!(report_rows(&reports, Some("ns/b|app")).is_empty());
    }

    #[tokio::test]
    async fn status_reset_leaves_newer_messages_alone() {
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let mut host = Host::new(None);
        host.bench
            .run("ns/a|app", "http://localhost:1/", config(1, 5), Arc::new(Instant200), dispatcher)
            .unwrap();

        apply_next(&mut queue, &mut host).await;
        assert!(host.status.starts_with("Benchmark completed"));
        host.flash(FlashLevel::Info, "Namespace set to kube-system".to_string());

        apply_next(&mut queue, &mut host).await;
        assert_eq!(host.resets, 0);
        assert_eq!(host.status, "Namespace set to kube-system");
    }

    #[test]
    fn report_rows_read_status_and_skip_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("ns_a_app-20260101-101010.txt"),
            "Canceled:    true\nErrors:      0\nReq/sec:     12.50\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("ns_b_app-20260101-101010.txt"),
            "Canceled:    false\nErrors:      3\nReq/sec:     9.00\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignore me").unwrap();

        let mut rows = report_rows(dir.path(), None);
        rows.sort_by(|left, right| left.fqn.cmp(&right.fqn));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields[..4], ["ns_a_app-20260101-101010", "Canceled", "12.50", "0"]);
        assert_eq!(rows[1].fields[1], "Fail");
        assert!(report_rows(&dir.path().join("missing"), None).is_empty());
    }

    #[tokio::test]
    async fn http_generator_spends_the_request_budget() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => seen.extend_from_slice(&buf[..read]),
                        }
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                        .await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        let generator = HttpLoadGenerator::new().expect("client");
        let target = BenchTarget {
            name: "ns/a|app".to_string(),
            url: format!("http://127.0.0.1:{port}/"),
            config: BenchmarkConfig::builtin().merge(&config(2, 5)),
        };
        let report = generator
            .generate(target, CancellationToken::new())
            .await
            .expect("report");
        server.abort();

        assert_eq!(report.sent, 5);
        assert_eq!(report.by_class.get(&2), Some(&5));
        assert_eq!(report.errors, 0);
    }
}
