//! 식별자 해석
//!
//! 캐시에서 찾은 워크로드(또는 찾지 못한 IP)를 사람이 읽을 수 있는 식별자로 바꿉니다.
//!
//! - 호스트 네트워크가 아닌 워크로드: [`IdentityMode`] 규칙
//! - 호스트 네트워크 워크로드: 노드 이름
//! - 그 외: 역방향 DNS 첫 번째 이름, 실패하면 IP 그대로

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use droptail_core::types::{IdentityMode, WorkloadRecord};
use tracing::debug;

use crate::error::LocatorError;

/// 역방향 DNS 조회 제한 시간
const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// 역방향 DNS 리졸버
pub trait DnsResolver: Send + Sync + 'static {
    /// IP에 대한 호스트 이름 목록을 조회합니다.
    fn lookup_addr(&self, ip: &str)
    -> impl Future<Output = Result<Vec<String>, LocatorError>> + Send;
}

/// 시스템 리졸버 (`getnameinfo`)
///
/// 조회는 blocking 스레드에서 수행합니다.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    timeout: Option<Duration>,
}

impl SystemResolver {
    /// 기본 제한 시간(3초)으로 리졸버를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 조회 제한 시간을 설정합니다.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl DnsResolver for SystemResolver {
    async fn lookup_addr(&self, ip: &str) -> Result<Vec<String>, LocatorError> {
        let addr: IpAddr = ip.parse().map_err(|e| LocatorError::Dns {
            ip: ip.to_owned(),
            reason: format!("invalid address: {e}"),
        })?;
        let timeout = self.timeout.unwrap_or(DNS_LOOKUP_TIMEOUT);

        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));
        let joined = tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| LocatorError::Dns {
                ip: ip.to_owned(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })?;
        let name = joined
            .map_err(|e| LocatorError::Dns {
                ip: ip.to_owned(),
                reason: format!("lookup task failed: {e}"),
            })?
            .map_err(|e| LocatorError::Dns {
                ip: ip.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(vec![name])
    }
}

/// 워크로드 레코드와 IP로 식별자를 결정합니다.
pub async fn resolve_identity<R: DnsResolver>(
    record: Option<&WorkloadRecord>,
    ip: &str,
    mode: &IdentityMode,
    resolver: &R,
) -> String {
    match record {
        Some(record) if !record.host_network => return mode.identify(record),
        Some(record) if !record.node_name.is_empty() => return record.node_name.clone(),
        _ => {}
    }

    match resolver.lookup_addr(ip).await {
        Ok(names) => match names.into_iter().find(|name| !name.is_empty()) {
            Some(name) => name,
            None => ip.to_owned(),
        },
        Err(e) => {
            debug!(ip, error = %e, "reverse dns lookup failed, using ip");
            ip.to_owned()
        }
    }
}

// ─── 테스트용 mock ────────────────────────────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockDnsResolver;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::DnsResolver;
    use crate::error::LocatorError;

    /// 테스트용 DNS 리졸버
    ///
    /// 등록되지 않은 IP는 조회 실패를 반환합니다.
    #[derive(Default)]
    pub struct MockDnsResolver {
        names: HashMap<String, Vec<String>>,
        lookups: AtomicUsize,
    }

    impl MockDnsResolver {
        /// 모든 조회가 실패하는 리졸버를 생성합니다.
        pub fn new() -> Self {
            Self::default()
        }

        /// IP에 대한 응답을 등록합니다.
        pub fn with_names(mut self, ip: &str, names: &[&str]) -> Self {
            self.names.insert(
                ip.to_owned(),
                names.iter().map(|name| (*name).to_owned()).collect(),
            );
            self
        }

        /// 조회 횟수
        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl DnsResolver for MockDnsResolver {
        async fn lookup_addr(&self, ip: &str) -> Result<Vec<String>, LocatorError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.names.get(ip).cloned().ok_or_else(|| LocatorError::Dns {
                ip: ip.to_owned(),
                reason: "no such host".to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(host_network: bool, node_name: &str) -> WorkloadRecord {
        WorkloadRecord {
            name: "web-0".to_owned(),
            namespace: "shop".to_owned(),
            ip: "10.0.0.7".to_owned(),
            host_network,
            node_name: node_name.to_owned(),
            labels: BTreeMap::from([("app".to_owned(), "web".to_owned())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pod_network_uses_identity_mode() {
        let resolver = MockDnsResolver::new();
        let pod = record(false, "node-1");

        let id = resolve_identity(Some(&pod), "10.0.0.7", &IdentityMode::Namespace, &resolver).await;
        assert_eq!(id, "shop");
        let id = resolve_identity(
            Some(&pod),
            "10.0.0.7",
            &IdentityMode::Label("app".to_owned()),
            &resolver,
        )
        .await;
        assert_eq!(id, "web");
        assert_eq!(resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn host_network_uses_node_name() {
        let resolver = MockDnsResolver::new();
        let pod = record(true, "node-1");
        let id = resolve_identity(Some(&pod), "10.0.0.7", &IdentityMode::Name, &resolver).await;
        assert_eq!(id, "node-1");
    }

    #[tokio::test]
    async fn host_network_without_node_falls_back_to_dns() {
        let resolver = MockDnsResolver::new().with_names("10.0.0.7", &["node-1.internal."]);
        let pod = record(true, "");
        let id = resolve_identity(Some(&pod), "10.0.0.7", &IdentityMode::Name, &resolver).await;
        assert_eq!(id, "node-1.internal.");
    }

    #[tokio::test]
    async fn unknown_ip_uses_first_dns_name() {
        let resolver = MockDnsResolver::new().with_names("1.1.1.1", &["one.one.one.one", "alt"]);
        let id = resolve_identity(None, "1.1.1.1", &IdentityMode::Namespace, &resolver).await;
        assert_eq!(id, "one.one.one.one");
    }

    #[tokio::test]
    async fn failed_or_empty_lookup_returns_ip() {
        let resolver = MockDnsResolver::new().with_names("2.2.2.2", &[]);
        let id = resolve_identity(None, "1.1.1.1", &IdentityMode::Namespace, &resolver).await;
        assert_eq!(id, "1.1.1.1");
        let id = resolve_identity(None, "2.2.2.2", &IdentityMode::Namespace, &resolver).await;
        assert_eq!(id, "2.2.2.2");
    }

    #[tokio::test]
    async fn system_resolver_rejects_invalid_address() {
        let err = SystemResolver::new().lookup_addr("not-an-ip").await.unwrap_err();
        assert!(matches!(err, LocatorError::Dns { .. }));
    }
}
