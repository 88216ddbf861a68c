//! 도메인 타입 -- 파이프라인 단계 사이에서 주고받는 값
//!
//! [`PacketDrop`]은 파서가 만들고 포스터가 한 번 소비하는 불변 레코드이고,
//! [`WorkloadRecord`]는 워크로드 캐시가 관리하는 읽기 전용 스냅샷입니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 방화벽 로그 한 줄에서 추출한 패킷 드롭
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDrop {
    /// 로그에 기록된 시각
    pub log_time: DateTime<FixedOffset>,
    /// 로그를 남긴 호스트명
    pub host_name: String,
    /// 출발지 IP
    pub src_ip: String,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 IP
    pub dst_ip: String,
    /// 목적지 포트
    pub dst_port: u16,
    /// 프로토콜 (TCP, UDP, ICMP ...)
    pub proto: String,
    /// 수신 인터페이스
    pub in_iface: String,
    /// 송신 인터페이스
    pub out_iface: String,
    /// MAC 주소 (로그에 없을 수 있음)
    pub mac: Option<String>,
    /// TTL
    pub ttl: u8,
}

impl PacketDrop {
    /// `now` 기준으로 `window`보다 오래된 드롭인지 확인합니다.
    pub fn is_expired_at(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now.signed_duration_since(self.log_time.with_timezone(&Utc)) > window
    }
}

impl fmt::Display for PacketDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} proto={} at={}",
            self.host_name,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.proto,
            self.log_time.to_rfc3339(),
        )
    }
}

/// 워크로드(파드) 식별 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    /// 이름
    pub name: String,
    /// 네임스페이스
    pub namespace: String,
    /// UID
    pub uid: String,
    /// 워크로드 IP (할당 전이면 빈 문자열)
    pub ip: String,
    /// 노드 네트워크 네임스페이스 공유 여부
    pub host_network: bool,
    /// 스케줄된 노드 이름
    pub node_name: String,
    /// 레이블
    pub labels: BTreeMap<String, String>,
    /// 리소스 버전 (알 수 없으면 0)
    pub resource_version: u64,
}

impl WorkloadRecord {
    /// 캐시 내부에서 객체를 구분하는 키 (`namespace/name`)
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// 워크로드를 어떤 이름으로 표시할지 결정하는 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityMode {
    /// 워크로드 이름
    Name,
    /// 지정한 레이블의 값 (레이블이 없으면 이름)
    Label(String),
    /// 네임스페이스
    Namespace,
    /// `namespace/name`
    NamespaceName,
}

impl IdentityMode {
    /// 설정 값에서 식별 방식을 만듭니다.
    pub fn from_config(mode: &str, label_key: &str) -> Result<Self, ConfigError> {
        match mode {
            "name" => Ok(Self::Name),
            "namespace" => Ok(Self::Namespace),
            "namespace-name" => Ok(Self::NamespaceName),
            "label" if label_key.is_empty() => Err(ConfigError::InvalidValue {
                field: "identity.label_key".to_owned(),
                reason: "label_key is required when identity.mode is 'label'".to_owned(),
            }),
            "label" => Ok(Self::Label(label_key.to_owned())),
            other => Err(ConfigError::InvalidValue {
                field: "identity.mode".to_owned(),
                reason: format!(
                    "unknown mode '{other}', must be one of: name, label, namespace, namespace-name"
                ),
            }),
        }
    }

    /// 호스트 네트워크를 쓰지 않는 워크로드의 식별 문자열
    pub fn identify(&self, record: &WorkloadRecord) -> String {
        match self {
            Self::Name => record.name.clone(),
            Self::Label(key) => record
                .labels
                .get(key)
                .cloned()
                .unwrap_or_else(|| record.name.clone()),
            Self::Namespace => record.namespace.clone(),
            Self::NamespaceName => record.object_key(),
        }
    }
}
