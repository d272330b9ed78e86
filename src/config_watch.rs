//! Hot reload of the per-cluster benchmark file.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bench::BenchHost;
use crate::dispatch::{Dispatcher, FlashLevel};
use crate::error::{SkiffError, SkiffResult};

/// Watches `dir` and queues a benchmark reload whenever the file returned by
/// `expected` is created or written.
///
/// `expected` is evaluated per event so the target follows the active cluster.
pub fn watch_bench_dir<S, F>(
    dir: &Path,
    expected: F,
    dispatcher: Dispatcher<S>,
    token: CancellationToken,
) -> SkiffResult<JoinHandle<()>>
where
    S: BenchHost,
    F: Fn() -> PathBuf + Send + Sync + 'static,
{
    let setup_failure = |message: String| SkiffError::WatchSetupFailure {
        path: dir.to_path_buf(),
        message,
    };
    std::fs::create_dir_all(dir).map_err(|error| setup_failure(error.to_string()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    let _ = tx.send(event.paths);
                }
            }
            Err(error) => warn!(%error, "benchmark dir watcher error"),
        },
        notify::Config::default(),
    )
    .map_err(|error| setup_failure(error.to_string()))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|error| setup_failure(error.to_string()))?;
    info!(dir = %dir.display(), "watching benchmark configs");

    let dir = dir.to_path_buf();
    Ok(tokio::spawn(async move {
        // Dropping the watcher releases the OS handle.
        let _watcher = watcher;
        loop {
            let paths = tokio::select! {
                _ = token.cancelled() => break,
                paths = rx.recv() => match paths {
                    Some(paths) => paths,
                    None => break,
                },
            };

            let file = expected();
            let mut hit = matches_file(&paths, &file);
            while let Ok(more) = rx.try_recv() {
                hit |= matches_file(&more, &file);
            }
            if !hit {
                continue;
            }

            debug!(file = %file.display(), "benchmark config changed");
            let queued = dispatcher.queue_update(move |host: &mut S| reload(host, &file));
            if !queued {
                break;
            }
        }
        debug!(dir = %dir.display(), "benchmark dir watcher done");
    }))
}

fn matches_file(paths: &[PathBuf], file: &Path) -> bool {
    let Some(name) = file.file_name() else {
        return false;
    };
    paths.iter().any(|path| path.file_name() == Some(name))
}

fn reload<S: BenchHost>(host: &mut S, file: &Path) {
    match host.bench().reload(file) {
        Ok(()) => host.bench_config_reloaded(),
        Err(error) => {
            warn!("{error}");
            host.flash(FlashLevel::Error, error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::watch_bench_dir;
    use crate::bench::{BenchHost, BenchmarkOrchestrator, bench_config_path};
    use crate::dispatch::{Dispatcher, FlashLevel, StatusSink};
    use crate::error::SkiffError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    struct Host {
        bench: BenchmarkOrchestrator,
        flashes: Vec<(FlashLevel, String)>,
        reloads: usize,
    }

    impl StatusSink for Host {
        fn flash(&mut self, level: FlashLevel, message: String) {
            self.flashes.push((level, message));
        }

        fn status_reset(&mut self, _: &str) {}
    }

    impl BenchHost for Host {
        fn bench(&mut self) -> &mut BenchmarkOrchestrator {
            &mut self.bench
        }

        fn bench_config_reloaded(&mut self) {
            self.reloads += 1;
        }
    }

    fn host() -> Host {
        Host {
            bench: BenchmarkOrchestrator::new(CancellationToken::new(), None),
            flashes: Vec::new(),
            reloads: 0,
        }
    }

    #[tokio::test]
    async fn writing_the_cluster_file_reloads_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().to_path_buf();
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let token = CancellationToken::new();
        let cluster = Arc::new(Mutex::new("kind-staging".to_string()));
        let expected = {
            let home = home.clone();
            let cluster = Arc::clone(&cluster);
            move || bench_config_path(&home, &cluster.lock().unwrap())
        };
        let handle = watch_bench_dir(&home, expected, dispatcher, token.clone()).expect("watch");
        *cluster.lock().unwrap() = "kind-dev".to_string();

        std::fs::write(home.join("bench-other.yml"), "benchmarks: {}\n").unwrap();
        std::fs::write(
            bench_config_path(&home, "kind-dev"),
            "benchmarks:\n  defaults:\n    concurrency: 9\n",
        )
        .unwrap();

        let job = timeout(Duration::from_secs(5), queue.next())
            .await
            .expect("reload in time")
            .expect("queue open");
        let mut host = host();
        job(&mut host);
        assert_eq!(host.reloads, 1);
        assert_eq!(host.bench.resolve("ns/pod", "app").concurrency, 9);

        token.cancel();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("watcher exits on cancel")
            .expect("task");
    }

    #[tokio::test]
    async fn unreadable_config_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().to_path_buf();
        let (dispatcher, mut queue) = Dispatcher::<Host>::channel();
        let token = CancellationToken::new();
        let expected = {
            let home = home.clone();
            move || bench_config_path(&home, "kind-dev")
        };
        let _handle = watch_bench_dir(&home, expected, dispatcher, token.clone()).expect("watch");

        std::fs::write(bench_config_path(&home, "kind-dev"), "benchmarks: [").unwrap();
        let job = timeout(Duration::from_secs(5), queue.next())
            .await
            .expect("reload in time")
            .expect("queue open");
        let mut host = host();
        job(&mut host);

        assert_eq!(host.reloads, 0);
        assert_eq!(host.flashes.len(), 1);
        assert_eq!(host.flashes[0].0, FlashLevel::Error);
        token.cancel();
    }

    #[tokio::test]
    async fn setup_failure_is_typed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let not_a_dir = dir.path().join("file");
        std::fs::write(&not_a_dir, "x").unwrap();
        let (dispatcher, _queue) = Dispatcher::<Host>::channel();

        let error = watch_bench_dir(
            &not_a_dir.join("home"),
            || std::path::PathBuf::from("bench-x.yml"),
            dispatcher,
            CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(error, SkiffError::WatchSetupFailure { .. }));
    }
}
