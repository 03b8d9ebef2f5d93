//! Token 预算控制
//!
//! TOKEN_LIMIT 是硬上限，EXPECTED_TOKEN_USAGE 是剪枝目标。目标低于上限，
//! 剪枝后留出余量，避免下一条消息立刻再次触发剪枝。

use crate::core::AgentError;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut tokens = 0;
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        tokens += ascii_chars / 4;
        tokens += (non_ascii_chars as f64 / 1.5).ceil() as usize;

        tokens.max(1)
    }
}

/// Token 预算：硬上限与期望用量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    token_limit: usize,
    expected_usage: usize,
}

impl TokenBudget {
    /// 要求 token_limit > 0 且 0 < expected_usage < token_limit
    pub fn new(token_limit: usize, expected_usage: usize) -> Result<Self, AgentError> {
        if token_limit == 0 {
            return Err(AgentError::ConfigError("token_limit must be > 0".to_string()));
        }
        if expected_usage == 0 || expected_usage >= token_limit {
            return Err(AgentError::ConfigError(format!(
                "expected_token_usage must be in (0, {token_limit}), got {expected_usage}"
            )));
        }
        Ok(Self {
            token_limit,
            expected_usage,
        })
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn expected_usage(&self) -> usize {
        self.expected_usage
    }

    /// 严格超过硬上限时需要剪枝
    pub fn needs_pruning(&self, usage: usize) -> bool {
        usage > self.token_limit
    }

    /// 距硬上限的剩余量
    pub fn remaining(&self, usage: usize) -> usize {
        self.token_limit.saturating_sub(usage)
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            token_limit: 16_000,
            expected_usage: 8_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_token_estimator_chinese() {
        let text = "你好世界，这是一个测试。";
        assert_eq!(TokenEstimator::estimate(text), 8);
    }

    #[test]
    fn test_token_estimator_never_zero() {
        assert_eq!(TokenEstimator::estimate(""), 1);
    }

    #[test]
    fn test_budget_validation() {
        assert!(TokenBudget::new(0, 0).is_err());
        assert!(TokenBudget::new(100, 0).is_err());
        assert!(TokenBudget::new(100, 100).is_err());
        assert!(TokenBudget::new(100, 60).is_ok());
    }

    #[test]
    fn test_needs_pruning_is_strict() {
        let budget = TokenBudget::new(100, 60).unwrap();
        assert!(!budget.needs_pruning(100));
        assert!(budget.needs_pruning(101));
        assert_eq!(budget.remaining(130), 0);
        assert_eq!(budget.remaining(40), 60);
    }
}
