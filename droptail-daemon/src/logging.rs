//! Logging initialization for droptail-daemon.
//!
//! Configures `tracing-subscriber` based on the `[general]` section
//! of `DroptailConfig`. Supports JSON structured logging and
//! human-readable pretty format.
//!
//! Without `RUST_LOG`, the configured level applies to the droptail crates
//! while the Kubernetes client stack is held at `warn`. The kube watch loop
//! and its HTTP transport are chatty at `debug`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use droptail_core::config::GeneralConfig;

/// Crate targets that follow `general.log_level`.
pub const DROPTAIL_TARGETS: &[&str] = &[
    "droptail_core",
    "droptail_log_pipeline",
    "droptail_workload_locator",
    "droptail_event_poster",
    "droptail_daemon",
];

/// Dependency targets capped at `warn`.
pub const CLIENT_STACK_TARGETS: &[&str] = &[
    "kube",
    "kube_client",
    "hyper",
    "hyper_util",
    "tower",
    "h2",
    "rustls",
];

/// Build the default filter directives for `level`.
///
/// Unlisted targets also use `level`. The client stack never logs below
/// `warn`, but follows `level` when it is stricter (`error`).
pub fn default_directives(level: &str) -> String {
    let client_level = if level == "error" { "error" } else { "warn" };
    let mut directives = vec![level.to_owned()];
    directives.extend(DROPTAIL_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.extend(
        CLIENT_STACK_TARGETS
            .iter()
            .map(|target| format!("{target}={client_level}")),
    );
    directives.join(",")
}

/// `RUST_LOG` if set, otherwise [`default_directives`] for `config.log_level`.
fn env_filter(config: &GeneralConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directives(&config.log_level))
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", config.log_level, e))
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (default for production)
/// * `"pretty"` - Human-readable output (for development)
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = env_filter(config)?;

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    tracing::debug!(
        level = %config.log_level,
        format = %config.log_format,
        "tracing initialized"
    );
    Ok(())
}
