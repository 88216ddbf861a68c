//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint. The recorder is not installed globally:
//! it is wrapped in a [`DropMetrics`] that the orchestrator hands to each
//! component.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use droptail_core::config::MetricsConfig;
use droptail_core::metrics::DropMetrics;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Build the metrics collector and, when enabled, start the HTTP listener.
///
/// Must be called from within a Tokio runtime when `config.enabled` is set,
/// because the exporter future is spawned onto it.
///
/// # Errors
///
/// - Unsupported endpoint path
/// - Invalid listen address
/// - Socket binding fails
pub fn start_metrics_exporter(config: &MetricsConfig) -> Result<Arc<DropMetrics>> {
    if !config.enabled {
        tracing::info!("metrics endpoint disabled");
        return Ok(Arc::new(DropMetrics::new()));
    }

    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build metrics exporter: {}", e))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });

    tracing::info!(
        listen_addr = %addr,
        "Prometheus metrics endpoint active"
    );

    Ok(Arc::new(DropMetrics::from_recorder(recorder)))
}
