//! Agent 错误类型
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定重试 / 继续 / 停止该会话 / 终止本轮。

use thiserror::Error;

use crate::llm::LlmError;
use crate::workflow::WorkflowError;

/// 一轮对话中可能出现的错误（消息非法、图结构缺陷、模型调用失败、会话锁超时等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 追加的消息不合法（负 token、未知角色、重复 ID），本轮中止，Ledger 不变
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Cycle detected at node: {0}")]
    CycleDetected(String),

    /// 非致命：剪枝后仍高于目标，作为警告随 TurnOutcome 返回
    #[error("Budget exceeded after pruning: {usage} tokens left, target {target}")]
    BudgetExceededAfterPruning { usage: usize, target: usize },

    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    /// 会话锁在限定时间内未获取到，调用方可重试
    #[error("Lock timeout for chat {0}")]
    LockTimeout(String),

    #[error("Turn cancelled")]
    Cancelled,

    /// 工作流结构缺陷后该会话被暂停，替换图定义后恢复
    #[error("Session halted: {0}")]
    SessionHalted(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Node failed: {0}")]
    NodeFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 可由调用方原样重发同一条入站事件来重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::LockTimeout(_) | AgentError::ModelCallFailed(_) | AgentError::DeliveryFailed(_)
        )
    }

    /// 工作流配置缺陷，需要修复图定义
    pub fn is_structural(&self) -> bool {
        matches!(self, AgentError::UnknownNode(_) | AgentError::CycleDetected(_))
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        AgentError::ModelCallFailed(err.to_string())
    }
}

impl From<WorkflowError> for AgentError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::UnknownNode(name) => AgentError::UnknownNode(name),
            WorkflowError::CycleDetected(name) => AgentError::CycleDetected(name),
            other => AgentError::ConfigError(other.to_string()),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 暂时性失败，调用方可重发同一事件
    Retry,
    /// 仅警告，本轮照常完成
    Continue,
    /// 图定义有缺陷，停止处理该会话直到图被替换
    HaltSession(String),
    /// 终止当前轮次（状态已回滚）
    Abort,
}
