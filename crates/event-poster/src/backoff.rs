//! 지수 백오프
//!
//! 간격은 `initial`에서 시작해 매번 2배가 되고 `max_interval`에서 멈춥니다.
//! 첫 시도 이후 경과 시간이 `max_elapsed`를 넘으면 [`ExponentialBackoff::next_backoff`]가
//! `None`을 반환합니다. jitter는 없습니다.

use std::time::Duration;

use tokio::time::Instant;

const MULTIPLIER: u32 = 2;

/// 지수 백오프 상태
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max_interval: Duration,
    max_elapsed: Duration,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    /// 새 백오프를 생성합니다. 경과 시간은 지금부터 측정합니다.
    pub fn new(initial: Duration, max_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial,
            max_interval,
            max_elapsed,
            current: initial,
            started: Instant::now(),
        }
    }

    /// 다음 대기 시간. 재시도 예산을 다 썼으면 `None`.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.started.elapsed() > self.max_elapsed {
            return None;
        }
        let delay = self.current.min(self.max_interval);
        self.current = self
            .current
            .checked_mul(MULTIPLIER)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);
        Some(delay)
    }

    /// 간격과 경과 시간을 처음 상태로 되돌립니다.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.started = Instant::now();
    }

    /// 마지막 reset 이후 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
