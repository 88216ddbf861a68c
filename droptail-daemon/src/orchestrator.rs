//! Component orchestration -- assembly, channel wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `droptail-daemon`.
//! It validates configuration, builds the metrics collector, creates the
//! inter-component channels, spawns one task per component and waits for a
//! shutdown signal.
//!
//! # Data flow
//!
//! ```text
//! LineSource ──lines──> DropParser ──drops──> Poster ──> EventSink
//!                                               │
//!                                               └──locate──> IdentityCache
//! ```
//!
//! # Shutdown
//!
//! 1. Broadcast the shutdown signal
//! 2. The line source stops and drops its sender
//! 3. The parser drains the line channel and stops
//! 4. The poster finishes the drop in flight and stops
//!
//! A poster failure (cache warm-up timeout) is fatal and stops the daemon.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use droptail_core::config::DroptailConfig;
use droptail_core::metrics::DropMetrics;
use droptail_core::types::PacketDrop;
use droptail_event_poster::{EventSink, KubeEventSink, Poster, PosterSettings};
use droptail_log_pipeline::{
    DropParser, FileWatcher, FileWatcherConfig, JournalWatcher, JournalWatcherConfig, LineSource,
    LogPipelineError,
};
use droptail_workload_locator::source::connect;
use droptail_workload_locator::{
    DnsResolver, IdentityCache, KubeWorkloadSource, SystemResolver, WorkloadLocator,
};

use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: DroptailConfig,
    /// Metrics collector shared with every component.
    metrics: Arc<DropMetrics>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read, parsed or
    /// validated, or if the metrics endpoint cannot be started.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = DroptailConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Starts the metrics endpoint when `[metrics] enabled` is set.
    pub fn build_from_config(config: DroptailConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let metrics = metrics_server::start_metrics_exporter(&config.metrics)?;
        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!(
            source = %config.source.mode,
            identity = %config.identity.mode,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            metrics,
            shutdown_tx,
        })
    }

    /// Connect to the cluster and run until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        let client = connect(&self.config.identity.api_server)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

        let cache = IdentityCache::new(
            Arc::new(KubeWorkloadSource::new(client.clone())),
            Arc::clone(&self.metrics),
            self.config.identity.cache_sync_timeout(),
        );
        let sink = KubeEventSink::new(client, self.config.poster.component_name.clone());

        self.run_with(
            Arc::new(cache),
            Arc::new(sink),
            Arc::new(SystemResolver::new()),
            wait_for_shutdown_signal(),
        )
        .await
    }

    /// Run the pipeline with the given dependencies until `stop` resolves
    /// or the poster fails.
    pub async fn run_with<L, S, R, F>(
        &mut self,
        locator: Arc<L>,
        sink: Arc<S>,
        resolver: Arc<R>,
        stop: F,
    ) -> Result<()>
    where
        L: WorkloadLocator,
        S: EventSink,
        R: DnsResolver,
        F: Future<Output = Result<&'static str>>,
    {
        let settings = PosterSettings::from_core(&self.config)?;
        let parser = DropParser::from_core(&self.config.parser, Arc::clone(&self.metrics))?;

        let (line_tx, line_rx) = mpsc::channel::<String>(self.config.source.line_channel_capacity);
        let (drop_tx, drop_rx) =
            mpsc::channel::<PacketDrop>(self.config.poster.channel_buffer_size);

        let source_task = match self.config.source.mode.as_str() {
            "journal" => spawn_source(
                JournalWatcher::new(
                    JournalWatcherConfig::from_core(&self.config),
                    Arc::clone(&self.metrics),
                ),
                line_tx,
                self.shutdown_tx.subscribe(),
            ),
            _ => spawn_source(
                FileWatcher::new(
                    FileWatcherConfig::from_core(&self.config.source),
                    Arc::clone(&self.metrics),
                ),
                line_tx,
                self.shutdown_tx.subscribe(),
            ),
        };
        let parser_task = tokio::spawn(parser.run(line_rx, drop_tx));

        let poster = Poster::new(
            locator,
            sink,
            resolver,
            Arc::clone(&self.metrics),
            settings,
        );
        let mut poster_task = tokio::spawn(poster.run(self.shutdown_tx.subscribe(), drop_rx));

        tracing::info!("entering main event loop");
        let mut signal_error = None;
        let poster_result = tokio::select! {
            signal = stop => {
                match signal {
                    Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                    Err(e) => signal_error = Some(e),
                }
                None
            }
            joined = &mut poster_task => Some(joined),
        };

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        log_task_result("line source", source_task.await);
        log_task_result("drop parser", parser_task.await);
        let poster_result = match poster_result {
            Some(joined) => joined,
            None => poster_task.await,
        };

        if let Some(e) = signal_error {
            return Err(e);
        }
        match poster_result {
            Ok(Ok(())) => {
                tracing::info!("all components stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("event poster failed")),
            Err(e) => Err(anyhow::anyhow!("event poster task failed: {}", e)),
        }
    }

    /// Get the shared metrics collector.
    pub fn metrics(&self) -> &Arc<DropMetrics> {
        &self.metrics
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &DroptailConfig {
        &self.config
    }
}

fn spawn_source<S: LineSource>(
    source: S,
    tx: mpsc::Sender<String>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<Result<(), LogPipelineError>> {
    tracing::info!(source = source.name(), "starting line source");
    tokio::spawn(source.run(tx, shutdown))
}

fn log_task_result<E: std::fmt::Display>(
    component: &'static str,
    joined: Result<Result<(), E>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(())) => tracing::debug!(component, "component stopped"),
        Ok(Err(e)) => tracing::warn!(component, error = %e, "component stopped with error"),
        Err(e) => tracing::error!(component, error = %e, "component task failed"),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
