//! 드롭 상관 분석 및 알림 게시
//!
//! [`Poster`]는 드롭 채널을 순차적으로 소비합니다. 드롭마다
//!
//! 1. 만료/반복 여부 확인 (무시하면 끝)
//! 2. 출발지/목적지 IP를 워크로드로 해석하고 식별자 결정
//! 3. 호스트 네트워크가 아닌 쪽 워크로드에 알림 제출
//! 4. `packet_drops_count{src,dst}` 증가
//! 5. IP 쌍의 알림 시각 기록
//!
//! 2~4단계가 실패하면 드롭 전체를 지수 백오프로 재시도합니다. 재시도 예산은
//! 만료 구간과 같고, 예산을 다 쓰거나 재시도할 수 없는 에러면 드롭을 포기합니다.
//! 재시도 중에는 다음 드롭을 받지 않습니다.
//!
//! ```text
//! PacketDrop ──mpsc──> Poster ──locate──> WorkloadLocator
//!                        │
//!                        ├──submit──> EventSink
//!                        └──record──> DropMetrics
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use droptail_core::config::DroptailConfig;
use droptail_core::error::DroptailError;
use droptail_core::metrics::DropMetrics;
use droptail_core::types::{IdentityMode, PacketDrop};
use droptail_workload_locator::{DnsResolver, WorkloadLocator, resolve_identity};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::dedup::DedupTracker;
use crate::error::PosterError;
use crate::message::{Direction, Notice, packet_drop_message};
use crate::sink::EventSink;

/// 포스터 동작 설정
#[derive(Debug, Clone)]
pub struct PosterSettings {
    /// 워크로드 식별자 규칙
    pub identity: IdentityMode,
    /// 이벤트 reason
    pub event_reason: String,
    /// 같은 IP 쌍의 반복 알림 억제 구간
    pub repeat_window: TimeDelta,
    /// 드롭 만료 구간 (재시도 예산이기도 함)
    pub expiration: TimeDelta,
    /// 첫 재시도 간격
    pub backoff_initial: Duration,
    /// 재시도 간격 상한
    pub backoff_max_interval: Duration,
    /// dedup 엔트리 정리 배수 (0이면 정리하지 않음)
    pub dedup_prune_factor: u32,
}

impl PosterSettings {
    /// 전체 설정에서 포스터 설정을 만듭니다.
    pub fn from_core(config: &DroptailConfig) -> Result<Self, DroptailError> {
        Ok(Self {
            identity: config.identity_mode()?,
            event_reason: config.poster.event_reason.clone(),
            repeat_window: config.poster.repeat_window(),
            expiration: config.parser.expiration(),
            backoff_initial: config.poster.backoff_initial_interval(),
            backoff_max_interval: config.poster.backoff_max_interval(),
            dedup_prune_factor: config.poster.dedup_prune_factor,
        })
    }
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            identity: IdentityMode::Namespace,
            event_reason: "PacketDrop".to_owned(),
            repeat_window: TimeDelta::minutes(2),
            expiration: TimeDelta::minutes(10),
            backoff_initial: Duration::from_millis(500),
            backoff_max_interval: Duration::from_secs(60),
            dedup_prune_factor: 0,
        }
    }
}

/// 드롭 상관 분석기 겸 알림 게시기
pub struct Poster<L: WorkloadLocator, S: EventSink, R: DnsResolver> {
    locator: Arc<L>,
    sink: Arc<S>,
    resolver: Arc<R>,
    metrics: Arc<DropMetrics>,
    settings: PosterSettings,
    dedup: DedupTracker,
    backoff: ExponentialBackoff,
}

impl<L: WorkloadLocator, S: EventSink, R: DnsResolver> Poster<L, S, R> {
    /// 새 포스터를 생성합니다.
    pub fn new(
        locator: Arc<L>,
        sink: Arc<S>,
        resolver: Arc<R>,
        metrics: Arc<DropMetrics>,
        settings: PosterSettings,
    ) -> Self {
        let dedup = DedupTracker::new(
            settings.repeat_window,
            settings.expiration,
            settings.dedup_prune_factor,
        );
        let backoff = ExponentialBackoff::new(
            settings.backoff_initial,
            settings.backoff_max_interval,
            settings.expiration.to_std().unwrap_or(Duration::ZERO),
        );
        Self {
            locator,
            sink,
            resolver,
            metrics,
            settings,
            dedup,
            backoff,
        }
    }

    /// 로케이터를 시작한 뒤 드롭 채널을 소비합니다.
    ///
    /// 로케이터 시작 실패는 치명적 에러로 반환합니다. 종료 신호는 드롭 사이에서만
    /// 확인하므로 처리 중인 드롭(재시도 포함)은 끝까지 진행됩니다.
    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
        mut drops: mpsc::Receiver<PacketDrop>,
    ) -> Result<(), PosterError> {
        self.locator.start(shutdown.resubscribe()).await?;
        info!(identity = ?self.settings.identity, "poster started");

        loop {
            let drop = tokio::select! {
                _ = shutdown.recv() => {
                    info!("poster stopping");
                    break;
                }
                drop = drops.recv() => match drop {
                    Some(drop) => drop,
                    None => {
                        info!("drop channel closed, poster stopping");
                        break;
                    }
                },
            };
            self.process(&drop).await;
        }
        Ok(())
    }

    /// 드롭 하나를 성공하거나 포기할 때까지 처리합니다.
    pub async fn process(&mut self, drop: &PacketDrop) {
        self.backoff.reset();
        loop {
            let err = match self.handle(drop, Utc::now()).await {
                Ok(()) => return,
                Err(e) => e,
            };
            if !err.is_retryable() {
                warn!(drop = %drop, error = %err, "abandoning drop, error is not retryable");
                self.metrics.drop_abandoned();
                return;
            }
            match self.backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        drop = %drop,
                        error = %err,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying drop"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        drop = %drop,
                        error = %err,
                        elapsed_ms =
                            u64::try_from(self.backoff.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "abandoning drop after retries"
                    );
                    self.metrics.drop_abandoned();
                    return;
                }
            }
        }
    }

    /// 드롭 하나를 한 번 처리합니다. `now`는 만료/반복 판단과 기록에 쓰입니다.
    pub async fn handle(
        &mut self,
        drop: &PacketDrop,
        now: DateTime<Utc>,
    ) -> Result<(), PosterError> {
        if let Some(reason) = self.dedup.should_ignore(drop, now) {
            debug!(drop = %drop, reason = reason.as_str(), "ignoring drop");
            self.metrics.drop_ignored(reason.as_str());
            return Ok(());
        }

        let src = self.locator.locate(&drop.src_ip)?;
        let dst = self.locator.locate(&drop.dst_ip)?;
        let mode = &self.settings.identity;
        let src_id = resolve_identity(src.as_deref(), &drop.src_ip, mode, &*self.resolver).await;
        let dst_id = resolve_identity(dst.as_deref(), &drop.dst_ip, mode, &*self.resolver).await;

        if let Some(target) = src.as_deref().filter(|record| !record.host_network) {
            let notice = Notice {
                reason: self.settings.event_reason.clone(),
                message: packet_drop_message(Direction::Sending, &dst_id, &drop.dst_ip, drop),
            };
            self.sink.submit(target, &notice).await?;
            self.metrics.event_posted();
        }
        if let Some(target) = dst.as_deref().filter(|record| !record.host_network) {
            let notice = Notice {
                reason: self.settings.event_reason.clone(),
                message: packet_drop_message(Direction::Receiving, &src_id, &drop.src_ip, drop),
            };
            self.sink.submit(target, &notice).await?;
            self.metrics.event_posted();
        }

        self.metrics.record_packet_drop(&src_id, &dst_id);
        self.dedup.record(drop, now);
        debug!(src = %src_id, dst = %dst_id, "drop handled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockEventSink;
    use chrono::{FixedOffset, TimeZone};
    use droptail_core::metrics::{DROPS_ABANDONED_TOTAL, DROPS_IGNORED_TOTAL, PACKET_DROPS_COUNT};
    use droptail_core::types::WorkloadRecord;
    use droptail_workload_locator::{
        IdentityCache, LocatorError, MockDnsResolver, MockWorkloadSource,
    };

    type TestPoster = Poster<IdentityCache<MockWorkloadSource>, MockEventSink, MockDnsResolver>;

    fn pod(name: &str, namespace: &str, ip: &str, host_network: bool) -> WorkloadRecord {
        WorkloadRecord {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            uid: format!("uid-{name}"),
            ip: ip.to_owned(),
            host_network,
            node_name: "node-1".to_owned(),
            ..Default::default()
        }
    }

    fn drop_between(src: &str, dst: &str, log_time: DateTime<Utc>) -> PacketDrop {
        PacketDrop {
            log_time: log_time.with_timezone(&FixedOffset::east_opt(0).unwrap()),
            host_name: "node-1".to_owned(),
            src_ip: src.to_owned(),
            src_port: 1,
            dst_ip: dst.to_owned(),
            dst_port: 2,
            proto: "TCP".to_owned(),
            in_iface: "eth0".to_owned(),
            out_iface: String::new(),
            mac: None,
            ttl: 64,
        }
    }

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, second).unwrap()
    }

    fn metric_line<'a>(rendered: &'a str, name: &str, needles: &[&str]) -> Option<&'a str> {
        rendered
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find(|line| {
                line.starts_with(name) && needles.iter().all(|needle| line.contains(needle))
            })
    }

    async fn started_poster(
        workloads: Vec<WorkloadRecord>,
        sink: MockEventSink,
    ) -> (TestPoster, Arc<MockEventSink>, Arc<DropMetrics>) {
        let metrics = Arc::new(DropMetrics::new());
        let cache = IdentityCache::new(
            Arc::new(MockWorkloadSource::new().with_workloads(workloads)),
            Arc::clone(&metrics),
            Duration::from_secs(5),
        );
        // 송신자가 해제되면 동기화 루프는 끝나지만 인덱스는 그대로 남습니다.
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();

        let sink = Arc::new(sink);
        let poster = Poster::new(
            Arc::new(cache),
            Arc::clone(&sink),
            Arc::new(MockDnsResolver::new()),
            Arc::clone(&metrics),
            PosterSettings::default(),
        );
        (poster, sink, metrics)
    }

    fn shop_and_db() -> Vec<WorkloadRecord> {
        vec![
            pod("web-0", "shop", "10.0.0.1", false),
            pod("pg-0", "db", "10.0.0.2", false),
        ]
    }

    #[tokio::test]
    async fn notifies_both_workloads_with_identities() {
        let (mut poster, sink, metrics) = started_poster(shop_and_db(), MockEventSink::new()).await;

        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(0, 0)), at(0, 0))
            .await
            .unwrap();

        let submitted = sink.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].0, "shop/web-0");
        assert_eq!(
            submitted[0].1.message,
            "Packet dropped when sending traffic to db (10.0.0.2) on port 2/TCP: 10.0.0.1 -> 10.0.0.2"
        );
        assert_eq!(submitted[0].1.reason, "PacketDrop");
        assert_eq!(submitted[1].0, "db/pg-0");
        assert_eq!(
            submitted[1].1.message,
            "Packet dropped when receiving traffic from shop (10.0.0.1) on port 2/TCP: 10.0.0.1 -> 10.0.0.2"
        );
        assert!(
            metric_line(&metrics.render(), PACKET_DROPS_COUNT, &["src=\"shop\"", "dst=\"db\""])
                .is_some()
        );
    }

    #[tokio::test]
    async fn repeated_pair_is_suppressed_within_window() {
        let (mut poster, sink, metrics) = started_poster(shop_and_db(), MockEventSink::new()).await;

        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(0, 0)), at(0, 0))
            .await
            .unwrap();
        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(1, 0)), at(1, 0))
            .await
            .unwrap();
        assert_eq!(sink.submitted().len(), 2);
        assert!(
            metric_line(&metrics.render(), DROPS_IGNORED_TOTAL, &["reason=\"duplicate\""])
                .is_some()
        );

        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(2, 30)), at(2, 30))
            .await
            .unwrap();
        assert_eq!(sink.submitted().len(), 4);
    }

    #[tokio::test]
    async fn host_network_workload_gets_no_notice() {
        let workloads = vec![
            pod("kube-proxy", "kube-system", "10.0.0.1", true),
            pod("pg-0", "db", "10.0.0.2", false),
        ];
        let (mut poster, sink, metrics) = started_poster(workloads, MockEventSink::new()).await;

        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(0, 0)), at(0, 0))
            .await
            .unwrap();

        let submitted = sink.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, "db/pg-0");
        assert!(submitted[0].1.message.contains("from node-1 (10.0.0.1)"));
        assert!(
            metric_line(&metrics.render(), PACKET_DROPS_COUNT, &["src=\"node-1\"", "dst=\"db\""])
                .is_some()
        );
    }

    #[tokio::test]
    async fn expired_drop_is_ignored() {
        let (mut poster, sink, _metrics) =
            started_poster(shop_and_db(), MockEventSink::new()).await;
        poster
            .handle(&drop_between("10.0.0.1", "10.0.0.2", at(0, 0)), at(10, 1))
            .await
            .unwrap();
        assert!(sink.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (mut poster, sink, _metrics) =
            started_poster(shop_and_db(), MockEventSink::new().with_failures(2)).await;

        poster
            .process(&drop_between("10.0.0.1", "10.0.0.2", Utc::now()))
            .await;

        assert_eq!(sink.attempts(), 4);
        assert_eq!(sink.submitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_abandons_drop() {
        let (mut poster, sink, metrics) =
            started_poster(shop_and_db(), MockEventSink::new().with_failures(usize::MAX)).await;

        poster
            .process(&drop_between("10.0.0.1", "10.0.0.2", Utc::now()))
            .await;

        assert!(sink.attempts() > 5);
        assert!(sink.submitted().is_empty());
        assert!(
            metric_line(&metrics.render(), DROPS_ABANDONED_TOTAL, &[])
                .unwrap()
                .ends_with(" 1")
        );
    }

    #[tokio::test]
    async fn invalid_target_is_abandoned_without_retry() {
        let (mut poster, sink, metrics) =
            started_poster(shop_and_db(), MockEventSink::new().with_invalid_target()).await;

        poster
            .process(&drop_between("10.0.0.1", "10.0.0.2", Utc::now()))
            .await;

        assert_eq!(sink.attempts(), 1);
        assert!(metric_line(&metrics.render(), DROPS_ABANDONED_TOTAL, &[]).is_some());
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let metrics = Arc::new(DropMetrics::new());
        let cache = IdentityCache::new(
            Arc::new(MockWorkloadSource::new().with_workloads(shop_and_db())),
            Arc::clone(&metrics),
            Duration::from_secs(5),
        );
        let sink = Arc::new(MockEventSink::new());
        let poster = Poster::new(
            Arc::new(cache),
            Arc::clone(&sink),
            Arc::new(MockDnsResolver::new()),
            metrics,
            PosterSettings::default(),
        );

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (drop_tx, drop_rx) = mpsc::channel(4);
        drop_tx
            .send(drop_between("10.0.0.1", "10.0.0.2", Utc::now()))
            .await
            .unwrap();
        drop(drop_tx);

        poster.run(shutdown_rx, drop_rx).await.unwrap();
        assert_eq!(sink.submitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_fails_when_cache_never_syncs() {
        let metrics = Arc::new(DropMetrics::new());
        let cache = IdentityCache::new(
            Arc::new(MockWorkloadSource::new().with_failing_list()),
            Arc::clone(&metrics),
            Duration::from_secs(5),
        );
        let poster = Poster::new(
            Arc::new(cache),
            Arc::new(MockEventSink::new()),
            Arc::new(MockDnsResolver::new()),
            metrics,
            PosterSettings::default(),
        );

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (_drop_tx, drop_rx) = mpsc::channel(4);
        let err = poster.run(shutdown_rx, drop_rx).await.unwrap_err();
        assert!(matches!(
            err,
            PosterError::Locator(LocatorError::SyncTimeout { timeout_secs: 5 })
        ));
    }
}
