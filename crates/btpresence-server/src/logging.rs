//! Tracing setup for the server binary.
//!
//! Production hosts log JSON to a daily file and compact lines to stdout for
//! the journal. Everywhere else logs are pretty-printed with span events.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use btpresence_core::ServerConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "BTPRESENCE_LOG_LEVEL";

/// Filter used when neither variable is set.
const DEFAULT_FILTER: &str = "info";

/// Prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "btpresence";

// Non-blocking writers flush on drop, so the guards live as long as the process.
static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// JSON files in `dir` plus compact stdout.
    Production {
        /// Directory of the rolling files.
        dir: PathBuf,
    },
    /// Pretty stdout only.
    Development,
}

impl LogMode {
    /// Mode selected by the `server` configuration section.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        if config.production {
            Self::Production {
                dir: config.log_dir.clone().unwrap_or_else(default_log_dir),
            }
        } else {
            Self::Development
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter from `RUST_LOG` or [`LOG_LEVEL_ENV`] does
/// not parse.
pub fn init(mode: &LogMode) -> anyhow::Result<()> {
    let filter = env_filter(std::env::var(LOG_LEVEL_ENV).ok().as_deref())?;

    match mode {
        LogMode::Development => init_pretty(filter),
        LogMode::Production { dir } => match std::fs::create_dir_all(dir) {
            Ok(()) => init_json(filter, dir),
            Err(e) => {
                init_compact(filter);
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Cannot create log directory, logging to stdout only"
                );
            }
        },
    }

    Ok(())
}

/// `RUST_LOG` wins, then `fallback`, then [`DEFAULT_FILTER`].
fn env_filter(fallback: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(fallback.unwrap_or(DEFAULT_FILTER))?)
}

fn journal_writer(guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    writer
}

fn init_json(filter: EnvFilter, dir: &Path) {
    let mut guards = Vec::with_capacity(2);
    let (file, guard) =
        tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX));
    guards.push(guard);
    let stdout = journal_writer(&mut guards);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout)
                .with_ansi(false),
        )
        .init();

    let _ = GUARDS.set(guards);
}

fn init_compact(filter: EnvFilter) {
    let mut guards = Vec::with_capacity(1);
    let stdout = journal_writer(&mut guards);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout)
                .with_ansi(false),
        )
        .init();

    let _ = GUARDS.set(guards);
}

fn init_pretty(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
        )
        .init();
}

fn default_log_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/btpresence")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "btpresence")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
