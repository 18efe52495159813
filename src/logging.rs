//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

/// Filter used by `-v` when `RUST_LOG` is unset.
const VERBOSE_DIRECTIVE: &str = "folio=debug,tower_http=debug,info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(config: &LoggingSection, verbose: bool) -> &str {
    if verbose {
        VERBOSE_DIRECTIVE
    } else {
        config.level.as_str()
    }
}

/// Install the global subscriber: console output in the configured format,
/// plus a daily-rolling JSON file when `logging.dir` is set.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(config, verbose))
            .with_context(|| format!("Invalid log filter '{}'", config.level))?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    });

    let guard = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "folio.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
