use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REFRESH_MS: u64 = 2_000;
pub const MIN_REFRESH_MS: u64 = 500;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "skiff",
    version,
    about = "Terminal cluster browser with port-forwards and HTTP benchmarks."
)]
pub struct CliArgs {
    /// Refresh interval in milliseconds (minimum 500)
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Start in a specific namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Start with all namespaces selected
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Directory holding benchmark configs, reports and the log
    #[arg(long)]
    pub home: Option<PathBuf>,
}

impl CliArgs {
    /// Flag first, then the config file, clamped to the minimum rate.
    pub fn refresh_rate(&self, configured: Option<u64>) -> Duration {
        clamp_refresh(self.refresh_ms.or(configured).unwrap_or(DEFAULT_REFRESH_MS))
    }
}

pub fn clamp_refresh(millis: u64) -> Duration {
    Duration::from_millis(millis.max(MIN_REFRESH_MS))
}
