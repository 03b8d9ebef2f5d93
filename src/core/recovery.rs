//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 SessionRegistry 决定是提示重试、停止会话还是直接终止本轮。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::LockTimeout(_)
            | AgentError::ModelCallFailed(_)
            | AgentError::DeliveryFailed(_) => RecoveryAction::Retry,
            AgentError::BudgetExceededAfterPruning { .. } => RecoveryAction::Continue,
            AgentError::UnknownNode(name) => {
                RecoveryAction::HaltSession(format!("workflow references unknown node '{name}'"))
            }
            AgentError::CycleDetected(name) => {
                RecoveryAction::HaltSession(format!("workflow revisits node '{name}' within one turn"))
            }
            AgentError::InvalidMessage(_)
            | AgentError::Cancelled
            | AgentError::SessionHalted(_)
            | AgentError::NodeFailed(_)
            | AgentError::ConfigError(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_transient_errors_retry() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::LockTimeout("c1".into())), RecoveryAction::Retry);
        assert_eq!(
            engine.handle(&AgentError::ModelCallFailed("503".into())),
            RecoveryAction::Retry
        );
    }

    #[test]
    fn test_recovery_structural_errors_halt() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::UnknownNode("ghost".into())) {
            RecoveryAction::HaltSession(reason) => assert!(reason.contains("ghost")),
            other => panic!("Expected HaltSession, got {other:?}"),
        }
        assert!(matches!(
            engine.handle(&AgentError::CycleDetected("loop".into())),
            RecoveryAction::HaltSession(_)
        ));
    }

    #[test]
    fn test_recovery_budget_warning_continues() {
        let engine = RecoveryEngine::new();
        let err = AgentError::BudgetExceededAfterPruning { usage: 120, target: 60 };
        assert_eq!(engine.handle(&err), RecoveryAction::Continue);
    }

    #[test]
    fn test_recovery_invalid_message_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidMessage("unknown role 'robot'".into());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
        assert_eq!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort);
    }

    #[test]
    fn test_error_classification() {
        assert!(AgentError::LockTimeout("c".into()).is_transient());
        assert!(!AgentError::LockTimeout("c".into()).is_structural());
        assert!(AgentError::CycleDetected("a".into()).is_structural());
        assert!(!AgentError::InvalidMessage("x".into()).is_transient());
    }
}
