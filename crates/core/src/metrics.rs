//! 메트릭 상수와 드롭 메트릭 수집기
//!
//! 전역 레코더 대신 [`DropMetrics`] 인스턴스를 데몬에서 한 번 만들고
//! `Arc`로 각 단계에 주입합니다. 수집기는 자체 Prometheus 레코더를 소유하므로
//! 테스트마다 독립된 인스턴스를 만들 수 있습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 드롭 카운터: `packet_drops_count` (기존 대시보드와 호환)
//! - 운영 메트릭 접두어: `droptail_`
//! - 접미어: `_total` (counter), 없음 (gauge)

use std::sync::Arc;

use metrics::{Counter, Gauge, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 출발지 식별자 레이블 키
pub const LABEL_SRC: &str = "src";

/// 목적지 식별자 레이블 키
pub const LABEL_DST: &str = "dst";

/// 무시 사유 레이블 키 (expired, duplicate)
pub const LABEL_REASON: &str = "reason";

// ─── 메트릭 이름 ───────────────────────────────────────────────────

/// (src, dst) 식별자 쌍별 패킷 드롭 수 (counter, labels: src, dst)
pub const PACKET_DROPS_COUNT: &str = "packet_drops_count";

/// 소스에서 읽은 원시 라인 수 (counter)
pub const LINES_COLLECTED_TOTAL: &str = "droptail_lines_collected_total";

/// 파싱에 실패한 라인 수 (counter)
pub const PARSE_ERRORS_TOTAL: &str = "droptail_parse_errors_total";

/// 파싱되어 포스터로 전달된 드롭 수 (counter)
pub const DROPS_PARSED_TOTAL: &str = "droptail_packet_drops_parsed_total";

/// 무시된 드롭 수 (counter, label: reason)
pub const DROPS_IGNORED_TOTAL: &str = "droptail_packet_drops_ignored_total";

/// 제출된 이벤트 수 (counter)
pub const EVENTS_POSTED_TOTAL: &str = "droptail_events_posted_total";

/// 재시도 끝에 포기한 드롭 수 (counter)
pub const DROPS_ABANDONED_TOTAL: &str = "droptail_packet_drops_abandoned_total";

/// 캐시에 인덱싱된 워크로드 수 (gauge)
pub const WORKLOADS_CACHED: &str = "droptail_identity_cache_workloads";

/// 모든 메트릭 이름
pub const ALL_METRIC_NAMES: &[&str] = &[
    PACKET_DROPS_COUNT,
    LINES_COLLECTED_TOTAL,
    PARSE_ERRORS_TOTAL,
    DROPS_PARSED_TOTAL,
    DROPS_IGNORED_TOTAL,
    EVENTS_POSTED_TOTAL,
    DROPS_ABANDONED_TOTAL,
    WORKLOADS_CACHED,
];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// 패킷 드롭 메트릭 수집기
pub struct DropMetrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl DropMetrics {
    /// HTTP 리스너 없이 독립 레코더를 만듭니다.
    pub fn new() -> Self {
        Self::from_recorder(PrometheusBuilder::new().build_recorder())
    }

    /// 이미 만들어진 레코더(예: HTTP 리스너가 붙은 레코더)를 감쌉니다.
    pub fn from_recorder(recorder: PrometheusRecorder) -> Self {
        let handle = recorder.handle();
        let metrics = Self {
            recorder: Arc::new(recorder),
            handle,
        };
        metrics.describe_all();
        metrics
    }

    fn describe_all(&self) {
        let counters = [
            (PACKET_DROPS_COUNT, "Total number of packet drops between two identities"),
            (LINES_COLLECTED_TOTAL, "Raw log lines read from the source"),
            (PARSE_ERRORS_TOTAL, "Marked log lines that failed to parse"),
            (DROPS_PARSED_TOTAL, "Packet drops forwarded to the poster"),
            (DROPS_IGNORED_TOTAL, "Packet drops skipped as expired or duplicate"),
            (EVENTS_POSTED_TOTAL, "Workload events submitted"),
            (DROPS_ABANDONED_TOTAL, "Packet drops abandoned after retries ran out"),
        ];
        for (name, help) in counters {
            self.recorder.describe_counter(KeyName::from(name), None, SharedString::from(help));
        }
        self.recorder.describe_gauge(
            KeyName::from(WORKLOADS_CACHED),
            None,
            SharedString::from("Workloads currently indexed by IP"),
        );
    }

    fn counter(&self, name: &'static str, labels: Vec<Label>) -> Counter {
        self.recorder.register_counter(&Key::from_parts(name, labels), &METADATA)
    }

    fn gauge(&self, name: &'static str) -> Gauge {
        self.recorder.register_gauge(&Key::from_name(name), &METADATA)
    }

    /// 식별자 쌍의 드롭 카운터를 1 증가시킵니다.
    pub fn record_packet_drop(&self, src: &str, dst: &str) {
        self.counter(
            PACKET_DROPS_COUNT,
            vec![
                Label::new(LABEL_SRC, src.to_owned()),
                Label::new(LABEL_DST, dst.to_owned()),
            ],
        )
        .increment(1);
    }

    /// 로그 소스에서 읽은 원시 라인 수를 더합니다.
    pub fn lines_collected(&self, count: u64) {
        self.counter(LINES_COLLECTED_TOTAL, Vec::new()).increment(count);
    }

    /// 마커가 있지만 파싱에 실패한 라인
    pub fn parse_error(&self) {
        self.counter(PARSE_ERRORS_TOTAL, Vec::new()).increment(1);
    }

    /// 포스터로 전달된 드롭
    pub fn drop_parsed(&self) {
        self.counter(DROPS_PARSED_TOTAL, Vec::new()).increment(1);
    }

    /// `reason`은 `expired` 또는 `duplicate`
    pub fn drop_ignored(&self, reason: &'static str) {
        self.counter(DROPS_IGNORED_TOTAL, vec![Label::new(LABEL_REASON, reason)]).increment(1);
    }

    /// 워크로드에 제출한 이벤트
    pub fn event_posted(&self) {
        self.counter(EVENTS_POSTED_TOTAL, Vec::new()).increment(1);
    }

    /// 재시도 예산을 다 쓰거나 재시도할 수 없는 에러로 포기한 드롭
    pub fn drop_abandoned(&self) {
        self.counter(DROPS_ABANDONED_TOTAL, Vec::new()).increment(1);
    }

    /// IP로 인덱싱된 워크로드 수를 설정합니다.
    pub fn set_workloads_cached(&self, count: usize) {
        self.gauge(WORKLOADS_CACHED).set(count as f64);
    }

    /// Prometheus 텍스트 형식으로 렌더링합니다.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for DropMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DropMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropMetrics").finish_non_exhaustive()
    }
}
