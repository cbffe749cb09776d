//! `tracing` output for mirror workers.
//!
//! Events go to stdout, or to `advisory-mirror.log.<date>` under the configured
//! log directory when file logging is on.

use crate::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// sqlx statement logs and migration progress stay at `warn` unless `RUST_LOG` says otherwise.
const DEFAULT_FILTER: &str = "info,sqlx=warn,sea_orm_migration=warn";

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` overrides [`DEFAULT_FILTER`]. File output is written by a
/// background thread; keep the returned guard alive until shutdown or the last
/// buffered lines are dropped. Returns `None` for stdout output and when a
/// subscriber was already installed.
pub fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if !config.log_to_file {
        let _ = fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init();
        return None;
    }

    let appender = rolling::daily(&config.log_dir, "advisory-mirror.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .ok()
        .map(|()| guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            log_to_file: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let first = init_logging(&config);
        let second = init_logging(&config);
        // at most one subscriber wins the global slot
        assert!(first.is_none() || second.is_none());
        assert!(init_logging(&Config::default()).is_none());
    }
}
