//! 指数退避：min(base * 2^(attempt-1), cap)，移位上限 8

use std::time::Duration;

const MAX_SHIFT: u32 = 8;

/// attempt 从 1 开始计数；attempt 0 与 1 等价
pub fn compute_backoff_ms(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(MAX_SHIFT);
    base_ms.saturating_mul(1_u64 << shift).min(cap_ms)
}

/// 退避参数（模型重试与 Worker 重启共用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    pub fn delay_ms(&self, attempt: u32) -> u64 {
        compute_backoff_ms(self.base_ms, self.cap_ms, attempt)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }
}
