//! End-to-end tests: log file -> parser -> poster with mock cluster dependencies.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use droptail_core::config::DroptailConfig;
use droptail_core::metrics::DropMetrics;
use droptail_core::types::WorkloadRecord;
use droptail_daemon::orchestrator::Orchestrator;
use droptail_event_poster::{Direction, MockEventSink, packet_drop_message};
use droptail_log_pipeline::DropParser;
use droptail_workload_locator::{IdentityCache, MockDnsResolver, MockWorkloadSource};

const SAMPLE_LINE: &str = "2024-01-01T00:00:00.000000-00:00 host marker SRC=1.1.1.1 SPT=1 DST=2.2.2.2 DPT=2 PROTO=TCP IN=eth0 OUT=eth1 TTL=64";

fn fresh_line(src: &str, dst: &str) -> String {
    format!(
        "{} host marker SRC={src} SPT=1 DST={dst} DPT=2 PROTO=TCP IN=eth0 OUT=eth1 TTL=64\n",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
    )
}

fn test_config(log_path: &std::path::Path) -> DroptailConfig {
    let mut config = DroptailConfig::default();
    config.source.log_path = log_path.display().to_string();
    config.source.poll_interval_secs = 1;
    config.parser.log_prefix = "marker".to_owned();
    config.metrics.enabled = false;
    config
}

fn has_drop_counter(metrics: &DropMetrics, src: &str, dst: &str) -> bool {
    let src = format!("src=\"{src}\"");
    let dst = format!("dst=\"{dst}\"");
    metrics.render().lines().any(|line| {
        line.starts_with("packet_drops_count") && line.contains(&src) && line.contains(&dst)
    })
}

/// Resolves once the drop counter for the pair shows up, or after ~10s.
async fn until_counted(
    metrics: Arc<DropMetrics>,
    src: &'static str,
    dst: &'static str,
) -> anyhow::Result<&'static str> {
    for _ in 0..100 {
        if has_drop_counter(&metrics, src, dst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok("test")
}

#[test]
fn sample_line_yields_drop_and_message() {
    let parser = DropParser::from_core(
        &test_config(std::path::Path::new("/unused")).parser,
        Arc::new(DropMetrics::new()),
    )
    .unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();

    let drop = parser.parse_line(SAMPLE_LINE, now).unwrap().unwrap();
    assert_eq!(drop.src_ip, "1.1.1.1");
    assert_eq!(drop.dst_ip, "2.2.2.2");

    let message = packet_drop_message(Direction::Sending, &drop.dst_ip, &drop.dst_ip, &drop);
    assert!(message.contains("1.1.1.1"));
    assert!(message.contains("2.2.2.2"));
    assert!(message.contains("on port 2/TCP"));
}

#[tokio::test]
async fn unknown_endpoints_are_counted_without_notices() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("iptables.log");
    std::fs::write(&log_path, fresh_line("1.1.1.1", "2.2.2.2")).unwrap();

    let mut orchestrator = Orchestrator::build_from_config(test_config(&log_path)).unwrap();
    let metrics = Arc::clone(orchestrator.metrics());
    let cache = IdentityCache::new(
        Arc::new(MockWorkloadSource::new()),
        Arc::clone(&metrics),
        Duration::from_secs(5),
    );
    let sink = Arc::new(MockEventSink::new());

    orchestrator
        .run_with(
            Arc::new(cache),
            Arc::clone(&sink),
            Arc::new(MockDnsResolver::new()),
            until_counted(Arc::clone(&metrics), "1.1.1.1", "2.2.2.2"),
        )
        .await
        .unwrap();

    assert!(has_drop_counter(&metrics, "1.1.1.1", "2.2.2.2"));
    assert!(sink.submitted().is_empty());
}

#[tokio::test]
async fn known_workload_receives_notice() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("iptables.log");
    std::fs::write(&log_path, fresh_line("10.0.0.1", "2.2.2.2")).unwrap();

    let mut orchestrator = Orchestrator::build_from_config(test_config(&log_path)).unwrap();
    let metrics = Arc::clone(orchestrator.metrics());
    let source = MockWorkloadSource::new().with_workloads(vec![WorkloadRecord {
        name: "web-0".to_owned(),
        namespace: "shop".to_owned(),
        uid: "uid-1".to_owned(),
        ip: "10.0.0.1".to_owned(),
        ..Default::default()
    }]);
    let cache = IdentityCache::new(Arc::new(source), Arc::clone(&metrics), Duration::from_secs(5));
    let sink = Arc::new(MockEventSink::new());
    let resolver = MockDnsResolver::new().with_names("2.2.2.2", &["two.example"]);

    orchestrator
        .run_with(
            Arc::new(cache),
            Arc::clone(&sink),
            Arc::new(resolver),
            until_counted(Arc::clone(&metrics), "shop", "two.example"),
        )
        .await
        .unwrap();

    let submitted = sink.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "shop/web-0");
    assert!(
        submitted[0]
            .1
            .message
            .starts_with("Packet dropped when sending traffic to two.example (2.2.2.2) on port 2/TCP")
    );
}

#[tokio::test]
async fn cache_warm_up_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("iptables.log");
    std::fs::write(&log_path, "").unwrap();

    let mut orchestrator = Orchestrator::build_from_config(test_config(&log_path)).unwrap();
    let cache = IdentityCache::new(
        Arc::new(MockWorkloadSource::new().with_failing_list()),
        Arc::clone(orchestrator.metrics()),
        Duration::from_millis(300),
    );

    let err = orchestrator
        .run_with(
            Arc::new(cache),
            Arc::new(MockEventSink::new()),
            Arc::new(MockDnsResolver::new()),
            std::future::pending::<anyhow::Result<&'static str>>(),
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("not synced"));
}
