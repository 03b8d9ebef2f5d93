//! 工作流类型定义
//!
//! 定义节点名、边（下一节点 / 条件路由 / 终止）、单轮执行结果与图构建错误

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::AgentError;
use crate::memory::MessageId;
use crate::session::SessionState;

pub type NodeName = String;

/// 边的落点：某个节点或终止标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(NodeName),
    End,
}

impl Target {
    pub fn node(name: impl Into<NodeName>) -> Self {
        Target::Node(name.into())
    }
}

/// 条件路由函数：根据当前状态返回路由键
pub type Router = Arc<dyn Fn(&SessionState) -> String + Send + Sync>;

/// 出边
#[derive(Clone)]
pub enum Edge {
    /// 固定下一节点
    Next(NodeName),
    /// 终止（当前图到此结束）
    End,
    /// 条件边：路由键 -> 落点，编译时检查所有落点存在
    Branch {
        router: Router,
        routes: BTreeMap<String, Target>,
    },
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Next(name) => f.debug_tuple("Next").field(name).finish(),
            Edge::End => f.write_str("End"),
            Edge::Branch { routes, .. } => f.debug_struct("Branch").field("routes", routes).finish(),
        }
    }
}

/// 一轮执行的结果
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// 本轮经过的节点（子图节点以 `graph/node` 形式记录）
    pub visited: Vec<NodeName>,
    /// 发往投递端的完整回复
    pub reply: String,
    /// 根图退出时按删除通道移除的消息
    pub deleted: Vec<MessageId>,
    /// 超出硬上限后剪枝移除的消息
    pub pruned: Vec<MessageId>,
    /// 非致命警告（BudgetExceededAfterPruning）
    pub warnings: Vec<AgentError>,
    /// 本轮结束时的 token 用量
    pub usage: usize,
}

/// 图构建错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeName),
    #[error("Cycle detected at node: {0}")]
    CycleDetected(NodeName),
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeName),
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
}
