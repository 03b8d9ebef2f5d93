//! 状态投影：命令层 /context、/token 看到的只读快照，以及单轮执行的阶段
//!
//! 快照由 SessionRegistry::inspect 生成，是会话状态的拷贝，持有它不会阻塞后续轮次。

use serde::Serialize;

use crate::memory::Message;

/// 会话上下文的只读快照
#[derive(Clone, Debug, Serialize)]
pub struct ContextSnapshot {
    pub chat_id: String,
    pub messages: Vec<Message>,
    pub current_usage: usize,
}

/// 单轮执行阶段：Ready(entry) → Running(node) → {Running(next) | Suspended(等待流) | Terminal}
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TurnPhase {
    Ready(String),
    Running(String),
    Suspended(String),
    Terminal,
}
