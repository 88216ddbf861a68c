//! 알림 싱크 추상화
//!
//! [`EventSink`] trait은 워크로드에 알림을 남기는 외부 시스템을 추상화합니다.
//! 운영 환경은 `core/v1` Event 객체를 만드는 [`KubeEventSink`]를,
//! 테스트는 `MockEventSink`를 사용합니다.

use std::future::Future;

use chrono::Utc;
use droptail_core::types::WorkloadRecord;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, PostParams};
use tracing::debug;

use crate::error::PosterError;
use crate::message::Notice;

/// 알림 싱크
pub trait EventSink: Send + Sync + 'static {
    /// `target` 워크로드에 알림을 남깁니다.
    fn submit(
        &self,
        target: &WorkloadRecord,
        notice: &Notice,
    ) -> impl Future<Output = Result<(), PosterError>> + Send;
}

/// Kubernetes Event 싱크
#[derive(Clone)]
pub struct KubeEventSink {
    client: kube::Client,
    component: String,
}

impl KubeEventSink {
    /// 새 싱크를 생성합니다. `component`는 이벤트의 source component입니다.
    pub fn new(client: kube::Client, component: impl Into<String>) -> Self {
        Self {
            client,
            component: component.into(),
        }
    }

    fn build_event(&self, target: &WorkloadRecord, notice: &Notice) -> Event {
        let now = Time(Utc::now());
        Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}.", target.name)),
                namespace: Some(target.namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some("v1".to_owned()),
                kind: Some("Pod".to_owned()),
                name: Some(target.name.clone()),
                namespace: Some(target.namespace.clone()),
                uid: (!target.uid.is_empty()).then(|| target.uid.clone()),
                ..Default::default()
            },
            type_: Some("Warning".to_owned()),
            reason: Some(notice.reason.clone()),
            message: Some(notice.message.clone()),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                host: None,
            }),
            reporting_component: Some(self.component.clone()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        }
    }
}

impl EventSink for KubeEventSink {
    async fn submit(&self, target: &WorkloadRecord, notice: &Notice) -> Result<(), PosterError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), &target.namespace);
        let event = self.build_event(target, notice);
        events
            .create(&PostParams::default(), &event)
            .await
            .map_err(|e| classify(target, e))?;
        debug!(target = %target.object_key(), reason = %notice.reason, "event created");
        Ok(())
    }
}

fn classify(target: &WorkloadRecord, err: kube::Error) -> PosterError {
    match err {
        kube::Error::Api(response) if response.code == 404 || response.code == 422 => {
            PosterError::InvalidTarget {
                target: target.object_key(),
                reason: response.message,
            }
        }
        other => PosterError::Submit {
            target: target.object_key(),
            reason: other.to_string(),
        },
    }
}

// ─── 테스트용 mock ────────────────────────────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockEventSink;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use droptail_core::types::WorkloadRecord;

    use super::EventSink;
    use crate::error::PosterError;
    use crate::message::Notice;

    /// 테스트용 알림 싱크
    ///
    /// 성공한 제출을 `(namespace/name, Notice)`로 기록합니다.
    #[derive(Default)]
    pub struct MockEventSink {
        submitted: Mutex<Vec<(String, Notice)>>,
        failures_left: AtomicUsize,
        invalid_target: bool,
        attempts: AtomicUsize,
    }

    impl MockEventSink {
        /// 항상 성공하는 싱크를 생성합니다.
        pub fn new() -> Self {
            Self::default()
        }

        /// 처음 `count`번의 제출이 재시도 가능한 에러로 실패하도록 설정합니다.
        pub fn with_failures(self, count: usize) -> Self {
            self.failures_left.store(count, Ordering::SeqCst);
            self
        }

        /// 모든 제출이 잘못된 대상 에러로 실패하도록 설정합니다.
        pub fn with_invalid_target(mut self) -> Self {
            self.invalid_target = true;
            self
        }

        /// 성공한 제출 목록
        pub fn submitted(&self) -> Vec<(String, Notice)> {
            self.submitted
                .lock()
                .map(|guard| guard.clone())
                .unwrap_or_default()
        }

        /// 전체 제출 시도 횟수
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl EventSink for MockEventSink {
        async fn submit(
            &self,
            target: &WorkloadRecord,
            notice: &Notice,
        ) -> Result<(), PosterError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.invalid_target {
                return Err(PosterError::InvalidTarget {
                    target: target.object_key(),
                    reason: "mock: not found".to_owned(),
                });
            }
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(PosterError::Submit {
                    target: target.object_key(),
                    reason: "mock: connection reset".to_owned(),
                });
            }
            if let Ok(mut guard) = self.submitted.lock() {
                guard.push((target.object_key(), notice.clone()));
            }
            Ok(())
        }
    }
}
