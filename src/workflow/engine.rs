//! 工作流引擎
//!
//! 从入口开始沿边执行一张已编译的图。子图节点递归进入同一个引擎，共享同一个删除通道；
//! 只有根帧退出时构造 RootExit，应用删除并完成预算核算。

use std::collections::HashSet;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::core::{AgentError, TurnPhase};
use crate::delivery::DeliverySink;
use crate::llm::StreamEvent;
use crate::memory::{CacheCostModel, TokenBudget};
use crate::session::{InboundEvent, SessionState};
use crate::workflow::node::{Node, NodeContext, NodeStep, StreamSummary};
use crate::workflow::types::*;
use crate::workflow::{DeletionChannel, Graph, RootExit};

/// 工作流引擎：持有预算与缓存成本模型，本身无会话状态，可在会话间共享
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngine {
    budget: TokenBudget,
    cache: CacheCostModel,
}

/// 单次递归帧共享的执行环境
struct Frame<'a> {
    event: &'a InboundEvent,
    sink: &'a dyn DeliverySink,
}

impl WorkflowEngine {
    pub fn new(budget: TokenBudget, cache: CacheCostModel) -> Self {
        Self { budget, cache }
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn cache(&self) -> &CacheCostModel {
        &self.cache
    }

    /// 执行一轮：运行根图，根图退出时应用删除、必要时剪枝，最后关闭投递端
    ///
    /// 出错时 `state` 可能已被部分修改，调用方应在工作副本上执行并丢弃失败的副本。
    pub async fn run(
        &self,
        graph: &Graph,
        state: &mut SessionState,
        event: &InboundEvent,
        sink: &dyn DeliverySink,
    ) -> Result<TurnOutcome, AgentError> {
        // 以本轮开始前的模型调用时间判断缓存是否仍然有效
        let since_last_call = state.since_last_call(Utc::now());
        let mut channel = DeletionChannel::new();
        let mut outcome = TurnOutcome::default();
        let frame = Frame { event, sink };

        debug!(chat_id = %state.chat_id(), phase = ?TurnPhase::Ready(graph.entry().to_string()), "turn ready");
        self.run_graph(graph, state, &mut channel, &frame, 0, &mut outcome).await?;

        let exit = RootExit::new();
        let ids = channel.into_ids(&exit);
        if !ids.is_empty() {
            outcome.deleted = state.apply_pending_deletions(ids, &exit);
            info!(chat_id = %state.chat_id(), deleted = outcome.deleted.len(), "applied deletions at root exit");
        }

        let usage = state.ledger().current_usage();
        if self.budget.needs_pruning(usage) {
            let target = self.cache.prune_target(&self.budget, since_last_call);
            outcome.pruned = state.prune_to_target(target, &exit);
            let remaining = state.ledger().current_usage();
            info!(
                chat_id = %state.chat_id(),
                before = usage,
                after = remaining,
                target,
                pruned = outcome.pruned.len(),
                "pruned context"
            );
            if remaining > target {
                warn!(chat_id = %state.chat_id(), usage = remaining, target, "budget still exceeded after pruning");
                outcome.warnings.push(AgentError::BudgetExceededAfterPruning {
                    usage: remaining,
                    target,
                });
            }
        }

        sink.close().await?;
        outcome.usage = state.ledger().current_usage();
        debug!(chat_id = %state.chat_id(), phase = ?TurnPhase::Terminal, visited = ?outcome.visited, "turn finished");
        Ok(outcome)
    }

    fn run_graph<'a>(
        &'a self,
        graph: &'a Graph,
        state: &'a mut SessionState,
        channel: &'a mut DeletionChannel,
        frame: &'a Frame<'a>,
        depth: usize,
        outcome: &'a mut TurnOutcome,
    ) -> BoxFuture<'a, Result<(), AgentError>> {
        Box::pin(async move {
            let mut visited: HashSet<NodeName> = HashSet::new();
            let mut current: NodeName = graph.entry().to_string();

            loop {
                let path = if depth == 0 {
                    current.clone()
                } else {
                    format!("{}/{}", graph.name(), current)
                };
                if !visited.insert(current.clone()) {
                    return Err(AgentError::CycleDetected(path));
                }
                let node = graph
                    .node(&current)
                    .ok_or_else(|| AgentError::UnknownNode(path.clone()))?;

                debug!(chat_id = %state.chat_id(), phase = ?TurnPhase::Running(path.clone()), depth, "enter node");
                outcome.visited.push(path.clone());

                match node {
                    Node::Leaf(leaf) => {
                        let mut ctx = NodeContext::new(state, channel, frame.event, graph.name(), depth);
                        match leaf.run(&mut ctx).await? {
                            NodeStep::Continue => {}
                            NodeStep::Emit(text) => {
                                if !text.is_empty() {
                                    frame.sink.send(&text).await?;
                                    outcome.reply.push_str(&text);
                                }
                            }
                            NodeStep::Stream(mut stream) => {
                                debug!(phase = ?TurnPhase::Suspended(path.clone()), "awaiting stream");
                                let mut summary = StreamSummary::default();
                                while let Some(event) = stream.next().await {
                                    match event? {
                                        StreamEvent::Delta(text) => {
                                            if text.is_empty() {
                                                continue;
                                            }
                                            frame.sink.send(&text).await?;
                                            summary.text.push_str(&text);
                                        }
                                        StreamEvent::Usage(usage) => summary.usage = Some(usage),
                                    }
                                }
                                outcome.reply.push_str(&summary.text);
                                leaf.finish_stream(&mut ctx, summary).await?;
                            }
                        }
                    }
                    Node::Subgraph(sub) => {
                        self.run_graph(sub, state, channel, frame, depth + 1, outcome).await?;
                    }
                }

                match graph.next(&current, state)? {
                    Target::End => return Ok(()),
                    Target::Node(next) => current = next,
                }
            }
        })
    }
}
