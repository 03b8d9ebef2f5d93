//! 节点：Leaf（异步计算单元，可调用模型、可流式输出）与 Subgraph（包装一张已编译的图）
//!
//! 两种节点共用同一调用约定：拿到当前会话状态与删除通道，更新状态并可向通道追加待删除 ID。

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{StreamEvent, Usage};
use crate::memory::Message;
use crate::session::{InboundEvent, SessionState};
use crate::workflow::{DeletionChannel, Graph};

/// 流式节点交给引擎的片段流：有限、不可重启，由引擎逐个拉取
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AgentError>> + Send>>;

/// Leaf 节点单次执行的产出
pub enum NodeStep {
    /// 无输出，继续下一节点
    Continue,
    /// 整段输出，由引擎投递
    Emit(String),
    /// 流式输出：引擎拉取完毕后调用 LeafNode::finish_stream
    Stream(FragmentStream),
}

impl fmt::Debug for NodeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStep::Continue => f.write_str("Continue"),
            NodeStep::Emit(text) => f.debug_tuple("Emit").field(text).finish(),
            NodeStep::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// 流结束后汇总的文本与用量
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub text: String,
    pub usage: Option<Usage>,
}

/// 节点执行上下文：本轮的会话状态（工作副本）、删除通道与入站事件，显式传递
pub struct NodeContext<'a> {
    state: &'a mut SessionState,
    deletions: &'a mut DeletionChannel,
    event: &'a InboundEvent,
    graph: &'a str,
    depth: usize,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        state: &'a mut SessionState,
        deletions: &'a mut DeletionChannel,
        event: &'a InboundEvent,
        graph: &'a str,
        depth: usize,
    ) -> Self {
        Self {
            state,
            deletions,
            event,
            graph,
            depth,
        }
    }

    pub fn state(&self) -> &SessionState {
        &*self.state
    }

    // 节点拿不到 &mut SessionState：只能追加消息、读写辅助字段，删除必须经过删除通道

    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        self.state.append(message)
    }

    pub fn set_aux(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state.set_aux(key, value)
    }

    pub fn remove_aux(&mut self, key: &str) -> Option<Value> {
        self.state.remove_aux(key)
    }

    pub fn record_model_call(&mut self, at: DateTime<Utc>) {
        self.state.record_model_call(at);
    }

    /// 请求在根图退出时删除该消息
    pub fn mark_for_deletion(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if !self.deletions.mark(id.clone()) {
            return false;
        }
        self.state.track_pending_deletion(id);
        true
    }

    pub fn deletions(&self) -> &DeletionChannel {
        &*self.deletions
    }

    pub fn event(&self) -> &InboundEvent {
        self.event
    }

    /// 当前所在图的名字
    pub fn graph_name(&self) -> &str {
        self.graph
    }

    /// 子图嵌套深度，根图为 0
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[async_trait]
pub trait LeafNode: Send + Sync {
    async fn run(&self, ctx: &mut NodeContext<'_>) -> Result<NodeStep, AgentError>;

    /// run 返回 NodeStep::Stream 时，流耗尽后由引擎调用
    async fn finish_stream(
        &self,
        _ctx: &mut NodeContext<'_>,
        _summary: StreamSummary,
    ) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 同步闭包节点
pub struct FnNode<F>(F);

impl<F> FnNode<F>
where
    F: Fn(&mut NodeContext<'_>) -> Result<NodeStep, AgentError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> LeafNode for FnNode<F>
where
    F: Fn(&mut NodeContext<'_>) -> Result<NodeStep, AgentError> + Send + Sync,
{
    async fn run(&self, ctx: &mut NodeContext<'_>) -> Result<NodeStep, AgentError> {
        (self.0)(ctx)
    }
}

#[derive(Clone)]
pub enum Node {
    Leaf(Arc<dyn LeafNode>),
    Subgraph(Arc<Graph>),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Leaf(_) => f.write_str("Leaf"),
            Node::Subgraph(graph) => f.debug_tuple("Subgraph").field(&graph.name()).finish(),
        }
    }
}
