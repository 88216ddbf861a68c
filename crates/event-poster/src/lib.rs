//! droptail 이벤트 포스터
//!
//! 파싱된 패킷 드롭을 워크로드와 연결하고, 반복을 억제한 뒤
//! 관련 워크로드에 Kubernetes Warning 이벤트를 남깁니다.
//!
//! # 모듈 구성
//!
//! - [`poster`]: 드롭 채널 소비 루프와 재시도 ([`Poster`])
//! - [`dedup`]: (출발지, 목적지) 쌍별 반복 억제 ([`DedupTracker`])
//! - [`backoff`]: 지수 백오프 ([`ExponentialBackoff`])
//! - [`message`]: 알림 메시지 생성
//! - [`sink`]: 알림 싱크 추상화 ([`EventSink`])와 Kubernetes 구현
//! - [`error`]: 도메인 에러 타입

pub mod backoff;
pub mod dedup;
pub mod error;
pub mod message;
pub mod poster;
pub mod sink;

pub use backoff::ExponentialBackoff;
pub use dedup::{DedupTracker, IgnoreReason};
pub use error::PosterError;
pub use message::{Direction, Notice, packet_drop_message};
pub use poster::{Poster, PosterSettings};
pub use sink::{EventSink, KubeEventSink};

#[cfg(any(test, feature = "test-util"))]
pub use sink::MockEventSink;
