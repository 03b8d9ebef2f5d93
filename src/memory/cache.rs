//! 缓存成本模型
//!
//! 上次模型调用后不久，上下文前缀大概率仍在服务端缓存中，保留它比重新提交便宜。
//! 此时放宽剪枝目标；硬上限 TOKEN_LIMIT 不变。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::memory::TokenBudget;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheCostModel {
    enabled: bool,
    expiry: Duration,
    /// 缓存命中价格 / 正常价格，取值 (0, 1]
    price_ratio: f64,
}

impl CacheCostModel {
    pub fn new(enabled: bool, expiry: Duration, price_ratio: f64) -> Self {
        Self {
            enabled,
            expiry,
            price_ratio: price_ratio.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO, 1.0)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 距上次模型调用的时长；从未调用过返回 None，时钟回拨按 0 处理
    pub fn since_last_call(
        last_model_call_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let last = last_model_call_at?;
        Some((now - last).to_std().unwrap_or(Duration::ZERO))
    }

    /// 缓存是否仍然有效
    pub fn is_warm(&self, since_last_call: Option<Duration>) -> bool {
        self.enabled && since_last_call.is_some_and(|since| since < self.expiry)
    }

    /// 本次剪枝的目标 token 数
    ///
    /// 缓存有效时，目标从 expected_usage 向 token_limit 移动 (1 - price_ratio) 比例；
    /// price_ratio = 1 时缓存无折扣，不放宽。结果始终不超过 token_limit。
    pub fn prune_target(&self, budget: &TokenBudget, since_last_call: Option<Duration>) -> usize {
        let expected = budget.expected_usage();
        if !self.is_warm(since_last_call) {
            return expected;
        }
        let headroom = budget.token_limit().saturating_sub(expected) as f64;
        let relaxed = expected + (headroom * (1.0 - self.price_ratio)).floor() as usize;
        relaxed.min(budget.token_limit())
    }
}

impl Default for CacheCostModel {
    fn default() -> Self {
        Self::disabled()
    }
}
