//! 알림 메시지 생성

use std::fmt;

use droptail_core::types::PacketDrop;

/// 대상 워크로드 기준의 트래픽 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 대상 워크로드가 보낸 트래픽 (대상 = 출발지)
    Sending,
    /// 대상 워크로드가 받은 트래픽 (대상 = 목적지)
    Receiving,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending => f.write_str("sending traffic to"),
            Self::Receiving => f.write_str("receiving traffic from"),
        }
    }
}

/// 한 워크로드에 붙일 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// 이벤트 reason
    pub reason: String,
    /// 사람이 읽는 메시지
    pub message: String,
}

/// 드롭 메시지를 만듭니다.
///
/// `peer`는 상대편 식별자, `peer_ip`는 상대편 IP입니다.
/// 식별자가 IP와 같으면 괄호 안의 IP는 생략합니다.
pub fn packet_drop_message(
    direction: Direction,
    peer: &str,
    peer_ip: &str,
    drop: &PacketDrop,
) -> String {
    let peer = if peer == peer_ip {
        peer.to_owned()
    } else {
        format!("{peer} ({peer_ip})")
    };
    format!(
        "Packet dropped when {direction} {peer} on port {}/{}: {} -> {}",
        drop.dst_port, drop.proto, drop.src_ip, drop.dst_ip
    )
}
