//! droptail 워크로드 로케이터
//!
//! 클러스터 워크로드(파드)를 IP로 찾는 캐시와, 찾은 결과를 사람이 읽을 수 있는
//! 식별자로 바꾸는 규칙을 제공합니다.
//!
//! # 모듈 구성
//!
//! - [`source`]: list + watch 피드 추상화 ([`WorkloadSource`])와 Kubernetes 구현
//! - [`cache`]: 버전/소유권 기반 IP 인덱스와 백그라운드 동기화 ([`IdentityCache`])
//! - [`identity`]: 식별자 해석 규칙과 역방향 DNS ([`DnsResolver`])
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! API server --list/watch--> sync loop --upsert/remove--> WorkloadIndex <--locate-- poster
//! ```

pub mod cache;
pub mod error;
pub mod identity;
pub mod source;

pub use cache::{IdentityCache, WorkloadIndex, WorkloadLocator};
pub use error::LocatorError;
pub use identity::{DnsResolver, SystemResolver, resolve_identity};
pub use source::{KubeWorkloadSource, WorkloadEvent, WorkloadList, WorkloadSource};

#[cfg(any(test, feature = "test-util"))]
pub use identity::MockDnsResolver;
#[cfg(any(test, feature = "test-util"))]
pub use source::MockWorkloadSource;
