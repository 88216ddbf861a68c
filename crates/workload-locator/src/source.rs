//! 워크로드 피드 추상화
//!
//! [`WorkloadSource`] trait은 "전체 list + 리소스 버전부터 watch" 의미를 가진
//! 원격 피드를 추상화합니다. 운영 환경은 [`KubeWorkloadSource`]를,
//! 테스트는 `MockWorkloadSource`를 사용합니다.
//!
//! 피드는 `status.phase=Running`인 파드만 다룹니다. 파드가 다른 단계로 넘어가면
//! watch는 삭제 이벤트로 알려줍니다.

use std::future::Future;

use droptail_core::types::WorkloadRecord;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use tracing::debug;

use crate::error::LocatorError;

/// 실행 중인 파드만 선택하는 필드 셀렉터
pub const RUNNING_SELECTOR: &str = "status.phase=Running";

/// 서버 쪽 watch 타임아웃 (초). 만료되면 스트림이 정상 종료되고 다시 watch합니다.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// list 결과 스냅샷
#[derive(Debug, Clone, Default)]
pub struct WorkloadList {
    /// 현재 워크로드 전체
    pub records: Vec<WorkloadRecord>,
    /// watch를 이어갈 리소스 버전
    pub resource_version: String,
}

/// watch 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadEvent {
    /// 추가 또는 변경
    Applied(WorkloadRecord),
    /// 삭제 (또는 셀렉터 범위를 벗어남)
    Deleted(WorkloadRecord),
    /// 변경 없이 리소스 버전만 전진
    Bookmark(String),
}

/// list + watch 피드
pub trait WorkloadSource: Send + Sync + 'static {
    /// 현재 워크로드 전체와 리소스 버전을 가져옵니다.
    fn list(&self) -> impl Future<Output = Result<WorkloadList, LocatorError>> + Send;

    /// `resource_version` 이후의 변경 스트림을 엽니다.
    ///
    /// 스트림 안에서 [`LocatorError::WatchExpired`]가 나오면 다시 list해야 합니다.
    fn watch(
        &self,
        resource_version: &str,
    ) -> impl Future<
        Output = Result<BoxStream<'static, Result<WorkloadEvent, LocatorError>>, LocatorError>,
    > + Send;
}

/// API 서버 클라이언트를 만듭니다.
///
/// in-cluster 설정 또는 kubeconfig를 자동으로 감지하고,
/// `api_server`가 비어 있지 않으면 클러스터 주소만 덮어씁니다.
pub async fn connect(api_server: &str) -> Result<kube::Client, LocatorError> {
    let mut config = kube::Config::infer()
        .await
        .map_err(|e| LocatorError::Client(e.to_string()))?;
    if !api_server.is_empty() {
        config.cluster_url = api_server.parse().map_err(|e| {
            LocatorError::Client(format!("invalid api server '{api_server}': {e}"))
        })?;
    }
    kube::Client::try_from(config).map_err(|e| LocatorError::Client(e.to_string()))
}

/// Kubernetes 파드 피드
#[derive(Clone)]
pub struct KubeWorkloadSource {
    pods: Api<Pod>,
}

impl KubeWorkloadSource {
    /// 모든 네임스페이스의 파드를 감시하는 소스를 만듭니다.
    pub fn new(client: kube::Client) -> Self {
        Self {
            pods: Api::all(client),
        }
    }
}

impl WorkloadSource for KubeWorkloadSource {
    async fn list(&self) -> Result<WorkloadList, LocatorError> {
        let pods = self
            .pods
            .list(&ListParams::default().fields(RUNNING_SELECTOR))
            .await
            .map_err(api_error)?;
        let resource_version = pods.metadata.resource_version.clone().unwrap_or_default();
        let records = pods.items.iter().map(record_from_pod).collect();
        Ok(WorkloadList {
            records,
            resource_version,
        })
    }

    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WorkloadEvent, LocatorError>>, LocatorError> {
        let params = WatchParams::default()
            .fields(RUNNING_SELECTOR)
            .timeout(WATCH_TIMEOUT_SECS);
        debug!(resource_version, "opening pod watch");
        let stream = self
            .pods
            .watch(&params, resource_version)
            .await
            .map_err(api_error)?;
        Ok(stream
            .map(|event| match event {
                Ok(WatchEvent::Added(pod) | WatchEvent::Modified(pod)) => {
                    Ok(WorkloadEvent::Applied(record_from_pod(&pod)))
                }
                Ok(WatchEvent::Deleted(pod)) => Ok(WorkloadEvent::Deleted(record_from_pod(&pod))),
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    Ok(WorkloadEvent::Bookmark(bookmark.metadata.resource_version))
                }
                Ok(WatchEvent::Error(e)) if e.code == 410 => Err(LocatorError::WatchExpired),
                Ok(WatchEvent::Error(e)) => Err(LocatorError::Api(e.message)),
                Err(e) => Err(api_error(e)),
            })
            .boxed())
    }
}

fn api_error(err: kube::Error) -> LocatorError {
    match err {
        kube::Error::Api(response) if response.code == 410 => LocatorError::WatchExpired,
        other => LocatorError::Api(other.to_string()),
    }
}

/// 파드 객체를 워크로드 레코드로 변환합니다.
pub fn record_from_pod(pod: &Pod) -> WorkloadRecord {
    let meta = &pod.metadata;
    let spec = pod.spec.as_ref();
    WorkloadRecord {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        ip: pod
            .status
            .as_ref()
            .and_then(|status| status.pod_ip.clone())
            .unwrap_or_default(),
        host_network: spec.and_then(|spec| spec.host_network).unwrap_or(false),
        node_name: spec
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        resource_version: meta
            .resource_version
            .as_deref()
            .and_then(|version| version.parse().ok())
            .unwrap_or(0),
    }
}

// ─── 테스트용 mock ────────────────────────────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockWorkloadSource;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use futures::stream::{self, BoxStream};
    use tokio::sync::mpsc;

    use super::{WorkloadEvent, WorkloadList, WorkloadSource};
    use crate::error::LocatorError;
    use droptail_core::types::WorkloadRecord;

    type EventResult = Result<WorkloadEvent, LocatorError>;

    /// 테스트용 워크로드 피드
    ///
    /// `list`는 설정된 레코드를 돌려주고, 첫 `watch`는 [`event_sender`](Self::event_sender)로
    /// 보낸 이벤트를 흘려보냅니다. 이후 `watch`는 끝나지 않는 빈 스트림입니다.
    pub struct MockWorkloadSource {
        records: Mutex<Vec<WorkloadRecord>>,
        fail_list: bool,
        events_tx: mpsc::UnboundedSender<EventResult>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
        list_calls: AtomicUsize,
        watch_calls: AtomicUsize,
    }

    impl Default for MockWorkloadSource {
        fn default() -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                records: Mutex::new(Vec::new()),
                fail_list: false,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                list_calls: AtomicUsize::new(0),
                watch_calls: AtomicUsize::new(0),
            }
        }
    }

    impl MockWorkloadSource {
        /// 빈 워크로드 목록으로 mock 소스를 생성합니다.
        pub fn new() -> Self {
            Self::default()
        }

        /// list가 반환할 워크로드를 설정합니다.
        pub fn with_workloads(self, records: Vec<WorkloadRecord>) -> Self {
            self.set_workloads(records);
            self
        }

        /// list 호출이 항상 실패하도록 설정합니다.
        pub fn with_failing_list(mut self) -> Self {
            self.fail_list = true;
            self
        }

        /// 다음 list가 반환할 워크로드를 바꿉니다.
        pub fn set_workloads(&self, records: Vec<WorkloadRecord>) {
            if let Ok(mut guard) = self.records.lock() {
                *guard = records;
            }
        }

        /// watch 스트림에 이벤트를 넣는 송신자
        pub fn event_sender(&self) -> mpsc::UnboundedSender<EventResult> {
            self.events_tx.clone()
        }

        /// list 호출 횟수
        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        /// watch 호출 횟수
        pub fn watch_calls(&self) -> usize {
            self.watch_calls.load(Ordering::SeqCst)
        }
    }

    impl WorkloadSource for MockWorkloadSource {
        async fn list(&self) -> Result<WorkloadList, LocatorError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(LocatorError::Api("mock list failure".to_owned()));
            }
            let records = self
                .records
                .lock()
                .map(|guard| guard.clone())
                .unwrap_or_default();
            Ok(WorkloadList {
                records,
                resource_version: "1".to_owned(),
            })
        }

        async fn watch(
            &self,
            _resource_version: &str,
        ) -> Result<BoxStream<'static, EventResult>, LocatorError> {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            let rx = self.events_rx.lock().ok().and_then(|mut guard| guard.take());
            match rx {
                Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                })
                .boxed()),
                None => Ok(stream::pending().boxed()),
            }
        }
    }
}
