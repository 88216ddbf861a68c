//! 반복 드롭 억제
//!
//! 같은 (출발지 IP, 목적지 IP) 쌍에 대해 마지막 알림 이후 억제 구간 안에 기록된
//! 드롭은 다시 알리지 않습니다. 비교 기준은 드롭의 로그 시각이고, 기록되는 값은
//! 알림을 마친 시각입니다.
//!
//! 기본적으로 엔트리는 지워지지 않습니다. `prune_factor`가 0보다 크면
//! 억제 구간 × factor보다 오래된 엔트리를 기록 시점에 정리합니다.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use droptail_core::types::PacketDrop;
use tracing::debug;

/// 드롭을 무시하는 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 만료 구간보다 오래된 드롭
    Expired,
    /// 억제 구간 안의 반복 드롭
    Duplicate,
}

impl IgnoreReason {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Duplicate => "duplicate",
        }
    }
}

type PairKey = (String, String);

/// (출발지, 목적지) 쌍별 마지막 알림 시각 추적기
#[derive(Debug)]
pub struct DedupTracker {
    last_notified: HashMap<PairKey, DateTime<Utc>>,
    window: TimeDelta,
    expiration: TimeDelta,
    prune_factor: u32,
}

impl DedupTracker {
    /// 새 추적기를 생성합니다.
    pub fn new(window: TimeDelta, expiration: TimeDelta, prune_factor: u32) -> Self {
        Self {
            last_notified: HashMap::new(),
            window,
            expiration,
            prune_factor,
        }
    }

    /// 드롭을 무시해야 하면 그 이유를 반환합니다.
    pub fn should_ignore(&self, drop: &PacketDrop, now: DateTime<Utc>) -> Option<IgnoreReason> {
        if drop.is_expired_at(now, self.expiration) {
            return Some(IgnoreReason::Expired);
        }
        let last = self
            .last_notified
            .get(&(drop.src_ip.clone(), drop.dst_ip.clone()))?;
        let since_last = drop.log_time.with_timezone(&Utc) - *last;
        (since_last <= self.window).then_some(IgnoreReason::Duplicate)
    }

    /// 드롭의 IP 쌍에 대해 알림 시각을 기록합니다.
    pub fn record(&mut self, drop: &PacketDrop, now: DateTime<Utc>) {
        self.last_notified
            .insert((drop.src_ip.clone(), drop.dst_ip.clone()), now);
        if self.prune_factor > 0 {
            self.prune(now);
        }
    }

    /// 억제 구간 × `prune_factor`보다 오래된 엔트리를 제거합니다.
    ///
    /// 곱이 `TimeDelta` 범위를 넘으면 아무것도 제거하지 않습니다.
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = i32::try_from(self.prune_factor)
            .ok()
            .and_then(|factor| self.window.checked_mul(factor))
            .unwrap_or(TimeDelta::MAX);
        let before = self.last_notified.len();
        self.last_notified.retain(|_, last| now - *last <= horizon);
        let removed = before - self.last_notified.len();
        if removed > 0 {
            debug!(removed, remaining = self.last_notified.len(), "pruned dedup entries");
        }
    }

    /// 추적 중인 쌍 수
    pub fn len(&self) -> usize {
        self.last_notified.len()
    }

    /// 추적 중인 쌍이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.last_notified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, second).unwrap()
    }

    fn drop_at(src: &str, dst: &str, time: DateTime<Utc>) -> PacketDrop {
        PacketDrop {
            log_time: time.with_timezone(&FixedOffset::east_opt(0).unwrap()),
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

    fn tracker(prune_factor: u32) -> DedupTracker {
        DedupTracker::new(TimeDelta::minutes(2), TimeDelta::minutes(10), prune_factor)
    }

    #[test]
    fn first_drop_is_not_ignored() {
        let tracker = tracker(0);
        assert_eq!(tracker.should_ignore(&drop_at("a", "b", at(0, 0)), at(0, 1)), None);
    }

    #[test]
    fn expired_drop_is_ignored() {
        let tracker = tracker(0);
        let drop = drop_at("a", "b", at(0, 0));
        assert_eq!(
            tracker.should_ignore(&drop, at(10, 1)),
            Some(IgnoreReason::Expired)
        );
    }

    #[test]
    fn repeat_within_window_is_duplicate() {
        let mut tracker = tracker(0);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 1));

        let repeat = drop_at("a", "b", at(2, 1));
        assert_eq!(
            tracker.should_ignore(&repeat, at(2, 2)),
            Some(IgnoreReason::Duplicate)
        );
        let outside = drop_at("a", "b", at(2, 2));
        assert_eq!(tracker.should_ignore(&outside, at(2, 3)), None);
    }

    #[test]
    fn pairs_are_tracked_independently() {
        let mut tracker = tracker(0);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 0));
        assert_eq!(tracker.should_ignore(&drop_at("b", "a", at(0, 1)), at(0, 2)), None);
        assert_eq!(tracker.should_ignore(&drop_at("a", "c", at(0, 1)), at(0, 2)), None);
    }

    #[test]
    fn entries_are_kept_without_prune_factor() {
        let mut tracker = tracker(0);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 0));
        tracker.record(&drop_at("c", "d", at(50, 0)), at(50, 0));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn prune_factor_evicts_old_entries() {
        let mut tracker = tracker(2);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 0));
        tracker.record(&drop_at("c", "d", at(3, 0)), at(3, 0));
        assert_eq!(tracker.len(), 2);

        tracker.record(&drop_at("e", "f", at(5, 0)), at(5, 0));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.should_ignore(&drop_at("a", "b", at(5, 0)), at(5, 0)), None);
    }

    #[test]
    fn huge_window_and_prune_factor_do_not_overflow() {
        let mut tracker =
            DedupTracker::new(TimeDelta::minutes(72_000), TimeDelta::minutes(10), u32::MAX);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 0));
        tracker.record(&drop_at("c", "d", at(5, 0)), at(5, 0));
        assert_eq!(tracker.len(), 2);

        let mut tracker = DedupTracker::new(TimeDelta::MAX, TimeDelta::minutes(10), 2);
        tracker.record(&drop_at("a", "b", at(0, 0)), at(0, 0));
        assert_eq!(tracker.len(), 1);
    }
}
