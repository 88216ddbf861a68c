//! 워크로드 IP 캐시
//!
//! [`WorkloadIndex`]는 IP -> (소유 객체 키, 버전, 레코드) 인덱스입니다.
//! [`IdentityCache`]는 [`WorkloadSource`]를 list/watch 하는 백그라운드 동기화 루프로
//! 인덱스를 최신 상태로 유지합니다.
//!
//! # 인덱스 규칙
//! - upsert는 들어온 버전이 저장된 버전보다 오래되지 않았을 때만 교체
//! - 삭제는 해당 객체가 소유한 엔트리만 제거
//! - 객체의 IP가 바뀌면 이전 IP 엔트리를 (여전히 소유하고 있다면) 제거
//! - IP가 비어 있는 객체는 추적만 하고 인덱싱하지 않음

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use droptail_core::metrics::DropMetrics;
use droptail_core::types::WorkloadRecord;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::LocatorError;
use crate::source::{WorkloadEvent, WorkloadSource};

/// list/watch 재시도 초기 대기 시간
const DEFAULT_RETRY_INITIAL: Duration = Duration::from_secs(1);
/// list/watch 재시도 최대 대기 시간
const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(30);

struct IndexEntry {
    owner: String,
    version: u64,
    record: Arc<WorkloadRecord>,
}

#[derive(Default)]
struct IndexState {
    by_ip: HashMap<String, IndexEntry>,
    /// 객체 키(`namespace/name`) -> 마지막으로 적용된 레코드
    objects: HashMap<String, Arc<WorkloadRecord>>,
}

impl IndexState {
    fn apply(&mut self, record: WorkloadRecord) -> bool {
        let key = record.object_key();
        let previous = self
            .objects
            .get(&key)
            .map(|existing| (existing.resource_version, existing.ip.clone()));

        if let Some((version, ip)) = previous {
            if version > record.resource_version {
                debug!(object = %key, stored = version, incoming = record.resource_version, "ignoring stale workload update");
                return false;
            }
            if ip != record.ip {
                self.release(&key, &ip);
            }
        }

        let record = Arc::new(record);
        self.objects.insert(key.clone(), Arc::clone(&record));
        if !record.ip.is_empty() {
            self.claim(key, record);
        }
        true
    }

    fn claim(&mut self, owner: String, record: Arc<WorkloadRecord>) {
        let replace = match self.by_ip.get(&record.ip) {
            Some(entry) => entry.owner == owner || entry.version <= record.resource_version,
            None => true,
        };
        if replace {
            self.by_ip.insert(
                record.ip.clone(),
                IndexEntry {
                    owner,
                    version: record.resource_version,
                    record,
                },
            );
        }
    }

    /// `owner`가 소유한 `ip` 엔트리를 지우고, 같은 IP의 다른 객체가 있으면 넘겨줍니다.
    fn release(&mut self, owner: &str, ip: &str) {
        if ip.is_empty() || self.by_ip.get(ip).is_none_or(|entry| entry.owner != owner) {
            return;
        }
        self.by_ip.remove(ip);

        let successor = self
            .objects
            .iter()
            .filter(|(key, record)| key.as_str() != owner && record.ip == ip)
            .max_by_key(|(_, record)| record.resource_version)
            .map(|(key, record)| (key.clone(), Arc::clone(record)));
        if let Some((key, record)) = successor {
            self.claim(key, record);
        }
    }

    fn remove(&mut self, record: &WorkloadRecord) -> bool {
        let key = record.object_key();
        let Some(stored) = self.objects.remove(&key) else {
            return false;
        };
        self.release(&key, &stored.ip);
        if stored.ip != record.ip {
            self.release(&key, &record.ip);
        }
        true
    }
}

/// 버전/소유권 기반 IP 인덱스
///
/// 조회는 읽기 잠금 아래에서 `Arc`를 복제하므로 부분적으로 갱신된 레코드를 보지 않습니다.
#[derive(Default)]
pub struct WorkloadIndex {
    state: RwLock<IndexState>,
}

impl WorkloadIndex {
    /// 빈 인덱스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 인덱스 전체를 스냅샷으로 교체합니다.
    pub fn replace_all(&self, records: Vec<WorkloadRecord>) {
        let mut next = IndexState::default();
        for record in records {
            next.apply(record);
        }
        *self.write() = next;
    }

    /// 레코드를 추가하거나 갱신합니다. 오래된 버전이면 무시하고 `false`를 반환합니다.
    pub fn upsert(&self, record: WorkloadRecord) -> bool {
        self.write().apply(record)
    }

    /// 레코드를 제거합니다. 추적 중이던 객체였으면 `true`를 반환합니다.
    pub fn remove(&self, record: &WorkloadRecord) -> bool {
        self.write().remove(record)
    }

    /// IP로 워크로드를 조회합니다.
    pub fn get(&self, ip: &str) -> Option<Arc<WorkloadRecord>> {
        self.read()
            .by_ip
            .get(ip)
            .map(|entry| Arc::clone(&entry.record))
    }

    /// 추적 중인 객체 수
    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    /// 추적 중인 객체가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.read().objects.is_empty()
    }

    /// 인덱싱된 IP 수
    pub fn indexed_ips(&self) -> usize {
        self.read().by_ip.len()
    }
}

/// IP로 워크로드를 찾는 로케이터
///
/// 이벤트 포스터는 이 trait에만 의존합니다.
pub trait WorkloadLocator: Send + Sync + 'static {
    /// 백그라운드 동기화를 시작하고 첫 스냅샷이 적용될 때까지 기다립니다.
    fn start(
        &self,
        shutdown: broadcast::Receiver<()>,
    ) -> impl Future<Output = Result<(), LocatorError>> + Send;

    /// IP에 해당하는 워크로드를 조회합니다.
    fn locate(&self, ip: &str) -> Result<Option<Arc<WorkloadRecord>>, LocatorError>;
}

/// list/watch로 동기화되는 워크로드 캐시
pub struct IdentityCache<S: WorkloadSource> {
    source: Arc<S>,
    index: Arc<WorkloadIndex>,
    metrics: Arc<DropMetrics>,
    sync_timeout: Duration,
    retry_initial: Duration,
    retry_max: Duration,
    started: AtomicBool,
}

impl<S: WorkloadSource> IdentityCache<S> {
    /// 새 캐시를 생성합니다. `sync_timeout` 안에 첫 스냅샷이 적용되지 않으면 시작에 실패합니다.
    pub fn new(source: Arc<S>, metrics: Arc<DropMetrics>, sync_timeout: Duration) -> Self {
        Self {
            source,
            index: Arc::new(WorkloadIndex::new()),
            metrics,
            sync_timeout,
            retry_initial: DEFAULT_RETRY_INITIAL,
            retry_max: DEFAULT_RETRY_MAX,
            started: AtomicBool::new(false),
        }
    }

    /// list/watch 재시도 대기 시간을 설정합니다.
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max.max(initial);
        self
    }

    /// 내부 인덱스
    pub fn index(&self) -> &Arc<WorkloadIndex> {
        &self.index
    }
}

impl<S: WorkloadSource> WorkloadLocator for IdentityCache<S> {
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), LocatorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LocatorError::AlreadyStarted);
        }

        let (synced_tx, mut synced_rx) = watch::channel(false);
        let sync = SyncLoop {
            source: Arc::clone(&self.source),
            index: Arc::clone(&self.index),
            metrics: Arc::clone(&self.metrics),
            synced: synced_tx,
            retry_initial: self.retry_initial,
            retry_max: self.retry_max,
        };
        tokio::spawn(sync.run(shutdown));

        let warm_up = tokio::time::timeout(self.sync_timeout, async {
            synced_rx.wait_for(|synced| *synced).await.map(|_| ())
        })
        .await;
        match warm_up {
            Ok(Ok(())) => {
                info!(workloads = self.index.len(), "workload cache synced");
                Ok(())
            }
            Ok(Err(_)) => Err(LocatorError::Api(
                "cache sync stopped before the first snapshot".to_owned(),
            )),
            Err(_) => Err(LocatorError::SyncTimeout {
                timeout_secs: self.sync_timeout.as_secs(),
            }),
        }
    }

    fn locate(&self, ip: &str) -> Result<Option<Arc<WorkloadRecord>>, LocatorError> {
        Ok(self.index.get(ip))
    }
}

// ─── 동기화 루프 ──────────────────────────────────────────────────

enum WatchEnd {
    Closed,
    Expired,
    Failed(LocatorError),
}

struct SyncLoop<S: WorkloadSource> {
    source: Arc<S>,
    index: Arc<WorkloadIndex>,
    metrics: Arc<DropMetrics>,
    synced: watch::Sender<bool>,
    retry_initial: Duration,
    retry_max: Duration,
}

impl<S: WorkloadSource> SyncLoop<S> {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut delay = self.retry_initial;

        'relist: loop {
            let listed = tokio::select! {
                _ = shutdown.recv() => break 'relist,
                listed = self.source.list() => listed,
            };
            let list = match listed {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "workload list failed");
                    if !self.pause(&mut delay, &mut shutdown).await {
                        break 'relist;
                    }
                    continue 'relist;
                }
            };

            let count = list.records.len();
            self.index.replace_all(list.records);
            self.metrics.set_workloads_cached(self.index.len());
            self.synced.send_replace(true);
            delay = self.retry_initial;
            debug!(count, resource_version = %list.resource_version, "applied workload snapshot");

            let mut version = list.resource_version;
            loop {
                let opened = tokio::select! {
                    _ = shutdown.recv() => break 'relist,
                    opened = self.source.watch(&version) => opened,
                };
                let mut stream = match opened {
                    Ok(stream) => stream,
                    Err(LocatorError::WatchExpired) => {
                        info!(resource_version = %version, "watch version expired, relisting");
                        continue 'relist;
                    }
                    Err(e) => {
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "workload watch failed");
                        if !self.pause(&mut delay, &mut shutdown).await {
                            break 'relist;
                        }
                        continue;
                    }
                };

                let end = loop {
                    let next = tokio::select! {
                        _ = shutdown.recv() => break 'relist,
                        next = stream.next() => next,
                    };
                    match next {
                        None => break WatchEnd::Closed,
                        Some(Ok(event)) => {
                            self.apply(event, &mut version);
                            delay = self.retry_initial;
                        }
                        Some(Err(LocatorError::WatchExpired)) => break WatchEnd::Expired,
                        Some(Err(e)) => break WatchEnd::Failed(e),
                    }
                };

                match end {
                    WatchEnd::Closed => debug!(resource_version = %version, "watch closed, resuming"),
                    WatchEnd::Expired => {
                        info!(resource_version = %version, "watch version expired, relisting");
                        continue 'relist;
                    }
                    WatchEnd::Failed(e) => {
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "workload watch interrupted");
                        if !self.pause(&mut delay, &mut shutdown).await {
                            break 'relist;
                        }
                    }
                }
            }
        }
        info!("workload cache sync stopped");
    }

    fn apply(&self, event: WorkloadEvent, version: &mut String) {
        match event {
            WorkloadEvent::Applied(record) => {
                advance(version, &record);
                self.index.upsert(record);
            }
            WorkloadEvent::Deleted(record) => {
                advance(version, &record);
                self.index.remove(&record);
            }
            WorkloadEvent::Bookmark(next) => *version = next,
        }
        self.metrics.set_workloads_cached(self.index.len());
    }

    /// 재시도 전 대기합니다. 대기 중 종료 신호를 받으면 `false`를 반환합니다.
    async fn pause(&self, delay: &mut Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown.recv() => false,
            _ = tokio::time::sleep(*delay) => {
                *delay = (*delay * 2).min(self.retry_max);
                true
            }
        }
    }
}

fn advance(version: &mut String, record: &WorkloadRecord) {
    if record.resource_version != 0 {
        *version = record.resource_version.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockWorkloadSource;

    fn pod(name: &str, ip: &str, version: u64) -> WorkloadRecord {
        WorkloadRecord {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            uid: format!("uid-{name}"),
            ip: ip.to_owned(),
            resource_version: version,
            ..Default::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    // ─── WorkloadIndex ───

    #[test]
    fn upsert_and_get() {
        let index = WorkloadIndex::new();
        assert!(index.upsert(pod("a", "10.0.0.1", 1)));
        assert_eq!(index.get("10.0.0.1").unwrap().name, "a");
        assert!(index.get("10.0.0.2").is_none());
    }

    #[test]
    fn stale_update_is_ignored() {
        let index = WorkloadIndex::new();
        index.upsert(pod("a", "10.0.0.1", 5));
        assert!(!index.upsert(pod("a", "10.0.0.9", 4)));
        assert!(index.get("10.0.0.1").is_some());
        assert!(index.get("10.0.0.9").is_none());
    }

    #[test]
    fn ip_change_releases_old_entry() {
        let index = WorkloadIndex::new();
        index.upsert(pod("a", "10.0.0.1", 1));
        index.upsert(pod("a", "10.0.0.2", 2));
        assert!(index.get("10.0.0.1").is_none());
        assert_eq!(index.get("10.0.0.2").unwrap().resource_version, 2);
        assert_eq!(index.indexed_ips(), 1);
    }

    #[test]
    fn newer_owner_wins_ip_and_old_delete_does_not_clear_it() {
        let index = WorkloadIndex::new();
        index.upsert(pod("old", "10.0.0.1", 1));
        index.upsert(pod("new", "10.0.0.1", 2));
        assert_eq!(index.get("10.0.0.1").unwrap().name, "new");

        assert!(index.remove(&pod("old", "10.0.0.1", 3)));
        assert_eq!(index.get("10.0.0.1").unwrap().name, "new");
    }

    #[test]
    fn older_object_does_not_take_ip() {
        let index = WorkloadIndex::new();
        index.upsert(pod("new", "10.0.0.1", 9));
        index.upsert(pod("old", "10.0.0.1", 3));
        assert_eq!(index.get("10.0.0.1").unwrap().name, "new");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn removing_owner_hands_ip_to_remaining_object() {
        let index = WorkloadIndex::new();
        index.upsert(pod("new", "10.0.0.1", 9));
        index.upsert(pod("old", "10.0.0.1", 3));
        index.remove(&pod("new", "10.0.0.1", 10));
        assert_eq!(index.get("10.0.0.1").unwrap().name, "old");
    }

    #[test]
    fn empty_ip_is_tracked_but_not_indexed() {
        let index = WorkloadIndex::new();
        index.upsert(pod("pending", "", 1));
        assert_eq!(index.len(), 1);
        assert_eq!(index.indexed_ips(), 0);
        assert!(index.get("").is_none());
    }

    #[test]
    fn removing_unknown_object_is_noop() {
        let index = WorkloadIndex::new();
        index.upsert(pod("a", "10.0.0.1", 1));
        assert!(!index.remove(&pod("b", "10.0.0.1", 2)));
        assert!(index.get("10.0.0.1").is_some());
    }

    #[test]
    fn replace_all_drops_previous_state() {
        let index = WorkloadIndex::new();
        index.upsert(pod("a", "10.0.0.1", 1));
        index.replace_all(vec![pod("b", "10.0.0.2", 1)]);
        assert!(index.get("10.0.0.1").is_none());
        assert_eq!(index.len(), 1);
    }

    // ─── IdentityCache ───

    fn cache(source: MockWorkloadSource, timeout: Duration) -> IdentityCache<MockWorkloadSource> {
        IdentityCache::new(Arc::new(source), Arc::new(DropMetrics::new()), timeout)
            .with_retry_delays(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn start_waits_for_first_snapshot() {
        let cache = cache(
            MockWorkloadSource::new().with_workloads(vec![pod("a", "10.0.0.1", 1)]),
            Duration::from_secs(5),
        );
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();
        assert_eq!(cache.locate("10.0.0.1").unwrap().unwrap().name, "a");
        assert!(cache.locate("10.0.0.2").unwrap().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let cache = cache(MockWorkloadSource::new(), Duration::from_secs(5));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();
        let err = cache.start(shutdown_tx.subscribe()).await.unwrap_err();
        assert!(matches!(err, LocatorError::AlreadyStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_list_times_out_warm_up() {
        let source = Arc::new(MockWorkloadSource::new().with_failing_list());
        let cache = IdentityCache::new(
            Arc::clone(&source),
            Arc::new(DropMetrics::new()),
            Duration::from_secs(5),
        );
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let err = cache.start(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, LocatorError::SyncTimeout { timeout_secs: 5 }));
        assert!(source.list_calls() > 1);
    }

    #[tokio::test]
    async fn watch_events_update_index() {
        let source = MockWorkloadSource::new().with_workloads(vec![pod("a", "10.0.0.1", 1)]);
        let events = source.event_sender();
        let cache = cache(source, Duration::from_secs(5));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();

        events
            .send(Ok(WorkloadEvent::Applied(pod("b", "10.0.0.2", 2))))
            .unwrap();
        events
            .send(Ok(WorkloadEvent::Deleted(pod("a", "10.0.0.1", 3))))
            .unwrap();

        wait_until(|| cache.index().get("10.0.0.1").is_none()).await;
        assert_eq!(cache.locate("10.0.0.2").unwrap().unwrap().name, "b");
    }

    #[tokio::test]
    async fn expired_watch_triggers_relist() {
        let source = Arc::new(
            MockWorkloadSource::new().with_workloads(vec![pod("a", "10.0.0.1", 1)]),
        );
        let events = source.event_sender();
        let cache = IdentityCache::new(
            Arc::clone(&source),
            Arc::new(DropMetrics::new()),
            Duration::from_secs(5),
        );
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();

        source.set_workloads(vec![pod("c", "10.0.0.3", 5)]);
        events.send(Err(LocatorError::WatchExpired)).unwrap();

        wait_until(|| source.list_calls() == 2 && cache.index().get("10.0.0.3").is_some()).await;
        assert!(cache.locate("10.0.0.1").unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_sync_loop() {
        let source = Arc::new(MockWorkloadSource::new());
        let cache = IdentityCache::new(
            Arc::clone(&source),
            Arc::new(DropMetrics::new()),
            Duration::from_secs(5),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        cache.start(shutdown_rx).await.unwrap();
        shutdown_tx.send(()).unwrap();

        // 루프가 끝나면 source Arc의 복제본이 해제됩니다.
        wait_until(|| Arc::strong_count(&source) == 2).await;
    }
}
