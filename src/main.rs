mod app;
mod bench;
mod cli;
mod config;
mod config_watch;
mod dispatch;
mod error;
mod forward;
mod input;
mod k8s;
mod model;
mod sorter;
mod table;
mod ui;
mod watcher;

use anyhow::{Context, Result};
use app::{App, AppCommand, AppDeps, QueueListener};
use bench::HttpLoadGenerator;
use clap::Parser;
use cli::CliArgs;
use config::SkiffConfig;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use dispatch::{Dispatcher, FlashLevel, JobQueue, StatusSink};
use futures::StreamExt;
use k8s::KubeGateway;
use model::{NamespaceScope, ResourceKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watcher::{ResourceFetcher, WatchTarget, Watcher};

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let (config, config_error) = match SkiffConfig::load() {
        Ok((config, _)) => (config, None),
        Err(error) => (SkiffConfig::default(), Some(error)),
    };
    let home = config::resolve_home(
        args.home.as_deref(),
        std::env::var(config::HOME_ENV).ok().as_deref(),
        config.home.as_deref(),
        dirs::config_dir(),
    );
    init_tracing(&args.log_filter, &home)?;
    if let Some(error) = &config_error {
        warn!("ignoring config file: {error:#}");
    }

    let gateway = Arc::new(KubeGateway::new().await?);
    let scope = resolve_namespace_scope(&args, &gateway);
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }
    let refresh_rate = args.refresh_rate(config.refresh_ms);
    info!(home = %home.display(), ?refresh_rate, "starting skiff");

    let root = CancellationToken::new();
    let (dispatcher, mut queue) = Dispatcher::<App>::channel();
    let generator =
        Arc::new(HttpLoadGenerator::new().context("failed to build the benchmark client")?);
    let mut app = App::new(AppDeps {
        cluster: gateway.cluster().to_string(),
        context: gateway.context().to_string(),
        scope,
        start_view: config.start_view(),
        home: home.clone(),
        root: root.clone(),
        dispatcher: dispatcher.clone(),
        tunneler: gateway.clone(),
        generator,
    });
    if let Some(error) = config_error {
        app.flash(FlashLevel::Warn, format!("Config ignored: {error}"));
    }

    let mut views = ViewWatch {
        gateway,
        dispatcher,
        root: root.clone(),
        home,
        refresh_rate,
        current: None,
    };
    let result = run(&mut app, &mut queue, &mut views, refresh_rate).await;

    views.stop();
    app.shutdown();
    root.cancel();
    result
}

fn init_tracing(level_filter: &str, home: &Path) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact();

    // The terminal belongs to the UI, so logs go to a file or nowhere.
    let _ = match open_log_file(home) {
        Some(file) => builder.with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::sink).try_init(),
    };

    Ok(())
}

fn open_log_file(home: &Path) -> Option<std::fs::File> {
    std::fs::create_dir_all(home).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(home.join("skiff.log"))
        .ok()
}

fn resolve_namespace_scope(args: &CliArgs, gateway: &KubeGateway) -> NamespaceScope {
    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::parse(namespace)
    } else {
        NamespaceScope::Named(gateway.default_namespace().to_string())
    }
}

/// Owns the watcher of the active view and its cancellation token.
struct ViewWatch {
    gateway: Arc<KubeGateway>,
    dispatcher: Dispatcher<App>,
    root: CancellationToken,
    home: PathBuf,
    refresh_rate: Duration,
    current: Option<ActiveView>,
}

struct ActiveView {
    watcher: Option<Arc<Watcher>>,
    token: CancellationToken,
}

impl ViewWatch {
    fn apply(&mut self, app: &mut App, command: AppCommand) {
        match command {
            AppCommand::None => {}
            AppCommand::Watch { target, generation } => self.start(app, target, generation),
            AppCommand::SetNamespace(_) => {
                if let Some(watcher) = self.watcher() {
                    let scope = app.scope_for(watcher.target());
                    if watcher.in_namespace(scope.as_str()) {
                        return;
                    }
                    watcher.set_namespace(scope);
                    info!(
                        view = watcher.target().kind.title(),
                        cluster_wide = watcher.cluster_wide(),
                        "watcher namespace changed"
                    );
                    watcher.request_refresh();
                }
            }
            AppCommand::SetRefreshRate(rate) => {
                self.refresh_rate = rate;
                if let Some(watcher) = self.watcher() {
                    watcher.set_refresh_rate(rate);
                }
            }
            AppCommand::Refresh => {
                if let Some(watcher) = self.watcher() {
                    watcher.request_refresh();
                }
            }
        }
    }

    fn start(&mut self, app: &mut App, target: WatchTarget, generation: u64) {
        self.stop();
        let token = self.root.child_token();

        if !target.kind.polled() {
            if target.kind == ResourceKind::PortForwards {
                let expected = {
                    let gateway = Arc::clone(&self.gateway);
                    let home = self.home.clone();
                    move || bench::bench_config_path(&home, gateway.cluster())
                };
                let watched = config_watch::watch_bench_dir(
                    &self.home,
                    expected,
                    self.dispatcher.clone(),
                    token.clone(),
                );
                if let Err(error) = watched {
                    warn!("{error}");
                    app.flash(FlashLevel::Warn, error.to_string());
                }
            }
            self.current = Some(ActiveView {
                watcher: None,
                token,
            });
            return;
        }

        let fetcher: Arc<dyn ResourceFetcher> = self.gateway.clone();
        let watcher = Arc::new(Watcher::new(
            target.clone(),
            fetcher,
            app.scope_for(&target),
            self.refresh_rate,
        ));
        watcher.add_listener(Box::new(QueueListener::new(
            self.dispatcher.clone(),
            generation,
        )));
        watcher.watch(token.clone());
        self.current = Some(ActiveView {
            watcher: Some(watcher),
            token,
        });
    }

    fn watcher(&self) -> Option<&Arc<Watcher>> {
        self.current.as_ref()?.watcher.as_ref()
    }

    fn stop(&mut self) {
        if let Some(view) = self.current.take() {
            view.token.cancel();
        }
    }
}

async fn run(
    app: &mut App,
    queue: &mut JobQueue<App>,
    views: &mut ViewWatch,
    refresh_rate: Duration,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, queue, views, refresh_rate).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    queue: &mut JobQueue<App>,
    views: &mut ViewWatch,
    refresh_rate: Duration,
) -> Result<()> {
    let mut reader = EventStream::new();
    let mut ticker = interval(refresh_rate);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let command = app.initial_command();
    views.apply(app, command);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(action) = input::map_key(app.mode(), key) {
                        let command = app.apply_action(action);
                        views.apply(app, command);
                        if ticker.period() != views.refresh_rate {
                            ticker = interval(views.refresh_rate);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    return Err(error).context("failed to read terminal event");
                }
                None => break,
            },
            job = queue.next() => match job {
                Some(job) => {
                    Dispatcher::run_now(app, job);
                    queue.drain(app);
                }
                None => break,
            },
            _ = ticker.tick() => app.on_tick(),
        }
    }

    Ok(())
}
