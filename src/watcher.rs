use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{NamespaceScope, ResourceKind, ResourceRow, TableData};
use crate::table::build_table;

const FETCH_TIMEOUT: Duration = Duration::from_secs(4);

/// What a view shows: a kind, plus the owning pod or port-forward.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WatchTarget {
    pub kind: ResourceKind,
    pub parent: Option<String>,
}

impl WatchTarget {
    pub fn kind(kind: ResourceKind) -> Self {
        Self { kind, parent: None }
    }

    pub fn containers_of(pod_path: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Containers,
            parent: Some(pod_path.into()),
        }
    }

    /// Benchmark reports of one port-forward.
    pub fn reports_of(forward: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Benchmarks,
            parent: Some(forward.into()),
        }
    }
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_rows(
        &self,
        target: &WatchTarget,
        scope: &NamespaceScope,
    ) -> Result<Vec<ResourceRow>>;
}

/// Receives every snapshot a watcher produces, in registration order.
///
/// Called synchronously on the watcher task; implementations should hand the
/// data off rather than do real work.
pub trait TableListener: Send {
    fn table_data_changed(&mut self, data: Arc<TableData>);

    fn table_load_failed(&mut self, error: &anyhow::Error);
}

#[derive(Debug, Clone)]
struct WatchSettings {
    scope: NamespaceScope,
    refresh_rate: Duration,
}

pub struct Watcher {
    target: WatchTarget,
    fetcher: Arc<dyn ResourceFetcher>,
    settings: Mutex<WatchSettings>,
    listeners: Mutex<Vec<Box<dyn TableListener>>>,
    snapshot: Mutex<Arc<TableData>>,
    cycle: tokio::sync::Mutex<()>,
    nudge: Notify,
    rate_changed: Notify,
}

impl Watcher {
    pub fn new(
        target: WatchTarget,
        fetcher: Arc<dyn ResourceFetcher>,
        scope: NamespaceScope,
        refresh_rate: Duration,
    ) -> Self {
        let empty = TableData::for_kind(target.kind, &scope);
        Self {
            target,
            fetcher,
            settings: Mutex::new(WatchSettings {
                scope,
                refresh_rate,
            }),
            listeners: Mutex::new(Vec::new()),
            snapshot: Mutex::new(Arc::new(empty)),
            cycle: tokio::sync::Mutex::new(()),
            nudge: Notify::new(),
            rate_changed: Notify::new(),
        }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Changes the poll interval; a running loop restarts its ticker at once.
    pub fn set_refresh_rate(&self, rate: Duration) {
        self.settings().refresh_rate = rate;
        self.rate_changed.notify_one();
    }

    pub fn refresh_rate(&self) -> Duration {
        self.settings().refresh_rate
    }

    pub fn namespace(&self) -> NamespaceScope {
        self.settings().scope.clone()
    }

    pub fn set_namespace(&self, scope: NamespaceScope) {
        self.settings().scope = scope;
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.settings().scope.as_str() == namespace
    }

    pub fn cluster_wide(&self) -> bool {
        self.settings().scope.is_all()
    }

    pub fn add_listener(&self, listener: Box<dyn TableListener>) {
        lock(&self.listeners).push(listener);
    }

    pub fn peek(&self) -> Arc<TableData> {
        lock(&self.snapshot).clone()
    }

    /// Asks the poll loop for an immediate cycle.
    pub fn request_refresh(&self) {
        self.nudge.notify_one();
    }

    /// Starts the poll loop; the first cycle runs immediately.
    pub fn watch(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut rate = watcher.refresh_rate();
            let mut ticker = interval(rate);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = watcher.nudge.notified() => {}
                    _ = watcher.rate_changed.notified() => {
                        let current = watcher.refresh_rate();
                        if current != rate {
                            debug!(kind = watcher.target.kind.title(), ?current, "refresh rate changed");
                            rate = current;
                            ticker = interval_at(Instant::now() + rate, rate);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }
                        continue;
                    }
                }
                watcher.refresh(&token).await;
            }
            debug!(kind = watcher.target.kind.title(), "watcher stopped");
        })
    }

    /// Runs one fetch/build/notify cycle.
    ///
    /// Returns `false` when the cycle was skipped because another one is in
    /// flight or the token was cancelled before listeners were notified.
    pub async fn refresh(&self, token: &CancellationToken) -> bool {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!(kind = self.target.kind.title(), "cycle in flight, dropping tick");
            return false;
        };

        let scope = self.namespace();
        let fetched = tokio::select! {
            _ = token.cancelled() => return false,
            fetched = timeout(FETCH_TIMEOUT, self.fetcher.fetch_rows(&self.target, &scope)) => fetched,
        };
        if token.is_cancelled() {
            return false;
        }

        let rows = match fetched {
            Ok(Ok(rows)) => rows,
            Ok(Err(error)) => {
                warn!(kind = self.target.kind.title(), "refresh failed: {error:#}");
                self.notify_failure(&error);
                return true;
            }
            Err(_) => {
                let error = anyhow::anyhow!("refresh timed out for {}", self.target.kind.title());
                warn!("{error}");
                self.notify_failure(&error);
                return true;
            }
        };

        let previous = self.peek();
        let next = Arc::new(build_table(
            self.target.kind,
            &scope,
            Some(previous.as_ref()),
            rows,
            Local::now(),
        ));
        *lock(&self.snapshot) = Arc::clone(&next);

        for listener in lock(&self.listeners).iter_mut() {
            listener.table_data_changed(Arc::clone(&next));
        }
        true
    }

    fn notify_failure(&self, error: &anyhow::Error) {
        for listener in lock(&self.listeners).iter_mut() {
            listener.table_load_failed(error);
        }
    }

    fn settings(&self) -> MutexGuard<'_, WatchSettings> {
        lock(&self.settings)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::{ResourceFetcher, TableListener, WatchTarget, Watcher};
    use crate::model::{NamespaceScope, ResourceKind, ResourceRow, RowAction, TableData};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct ScriptedFetcher {
        snapshots: Mutex<VecDeque<Result<Vec<ResourceRow>>>>,
        scopes: Mutex<Vec<NamespaceScope>>,
        delay: Option<Duration>,
    }

    impl ScriptedFetcher {
        fn with(snapshots: Vec<Result<Vec<ResourceRow>>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ResourceFetcher for ScriptedFetcher {
        async fn fetch_rows(
            &self,
            _target: &WatchTarget,
            scope: &NamespaceScope,
        ) -> Result<Vec<ResourceRow>> {
            self.scopes.lock().unwrap().push(scope.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.snapshots
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct ChannelListener {
        tx: mpsc::UnboundedSender<Result<Arc<TableData>, String>>,
    }

    impl TableListener for ChannelListener {
        fn table_data_changed(&mut self, data: Arc<TableData>) {
            let _ = self.tx.send(Ok(data));
        }

        fn table_load_failed(&mut self, error: &anyhow::Error) {
            let _ = self.tx.send(Err(error.to_string()));
        }
    }

    fn namespace_row(name: &str, status: &str) -> ResourceRow {
        ResourceRow::new(name, vec![name.to_string(), status.to_string(), "1d".to_string()])
    }

    fn watcher(fetcher: ScriptedFetcher) -> Arc<Watcher> {
        Arc::new(Watcher::new(
            WatchTarget::kind(ResourceKind::Namespaces),
            Arc::new(fetcher),
            NamespaceScope::All,
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn deleted_row_is_reported_once() {
        let watcher = watcher(ScriptedFetcher::with(vec![
            Ok(vec![namespace_row("ns", "Active")]),
            Ok(Vec::new()),
            Ok(Vec::new()),
        ]));
        let token = CancellationToken::new();

        assert!(watcher.refresh(&token).await);
        assert_eq!(watcher.peek().get("ns").map(|r| r.action), Some(RowAction::New));

        assert!(watcher.refresh(&token).await);
        assert_eq!(watcher.peek().get("ns").map(|r| r.action), Some(RowAction::Delete));

        assert!(watcher.refresh(&token).await);
        assert!(!watcher.peek().contains("ns"));
        assert!(watcher.peek().is_empty());
    }

    #[tokio::test]
    async fn listeners_receive_each_cycle_and_failures() {
        let watcher = watcher(ScriptedFetcher::with(vec![
            Ok(vec![namespace_row("ns", "Active")]),
            Err(anyhow::anyhow!("boom")),
            Ok(vec![namespace_row("ns", "Terminating")]),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.add_listener(Box::new(ChannelListener { tx }));
        let token = CancellationToken::new();

        for _ in 0..3 {
            watcher.refresh(&token).await;
        }

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap_err(), "boom");
        let third = rx.recv().await.unwrap().unwrap();
        let row = third.get("ns").unwrap();
        assert_eq!(row.action, RowAction::Update);
        assert_eq!(row.deltas, vec![None, Some("Active".to_string()), None]);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_dropped() {
        let mut fetcher = ScriptedFetcher::with(vec![Ok(vec![namespace_row("ns", "Active")])]);
        fetcher.delay = Some(Duration::from_millis(100));
        let watcher = watcher(fetcher);
        let token = CancellationToken::new();

        let running = {
            let watcher = Arc::clone(&watcher);
            let token = token.clone();
            tokio::spawn(async move { watcher.refresh(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!watcher.refresh(&token).await);
        assert!(running.await.unwrap());
        assert_eq!(watcher.peek().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_suppresses_notification() {
        let mut fetcher = ScriptedFetcher::with(vec![Ok(vec![namespace_row("ns", "Active")])]);
        fetcher.delay = Some(Duration::from_millis(200));
        let watcher = watcher(fetcher);
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.add_listener(Box::new(ChannelListener { tx }));
        let token = CancellationToken::new();

        let handle = watcher.watch(token.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits")
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert!(watcher.peek().is_empty());
    }

    #[tokio::test]
    async fn namespace_change_applies_on_next_tick() {
        let watcher = watcher(ScriptedFetcher::default());
        let token = CancellationToken::new();
        watcher.refresh(&token).await;
        watcher.set_namespace(NamespaceScope::Named("kube-system".to_string()));
        assert!(!watcher.cluster_wide());
        assert!(watcher.in_namespace("kube-system"));
        watcher.refresh(&token).await;
        assert_eq!(watcher.peek().namespace, "kube-system");
    }

    #[tokio::test]
    async fn poll_loop_keeps_notifying_until_cancelled() {
        let watcher = watcher(ScriptedFetcher::with(vec![
            Ok(vec![namespace_row("a", "Active")]),
            Ok(vec![namespace_row("a", "Active"), namespace_row("b", "Active")]),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.add_listener(Box::new(ChannelListener { tx }));
        let token = CancellationToken::new();
        let handle = watcher.watch(token.clone());

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.get("b").map(|r| r.action), Some(RowAction::New));

        token.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn faster_rate_takes_effect_without_waiting_out_the_old_interval() {
        let watcher = Arc::new(Watcher::new(
            WatchTarget::kind(ResourceKind::Namespaces),
            Arc::new(ScriptedFetcher::default()),
            NamespaceScope::All,
            Duration::from_secs(3_600),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.add_listener(Box::new(ChannelListener { tx }));
        let token = CancellationToken::new();
        let handle = watcher.watch(token.clone());

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap().unwrap();
        watcher.set_refresh_rate(Duration::from_millis(20));
        assert_eq!(watcher.refresh_rate(), Duration::from_millis(20));
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("second cycle at the new rate")
            .unwrap()
            .unwrap();

        token.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
