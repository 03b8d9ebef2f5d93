//! 工作流图引擎：节点、图构建、执行与删除传播

pub mod builder;
pub mod channel;
pub mod engine;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod types;

pub use builder::GraphBuilder;
pub use channel::{DeletionChannel, RootExit};
pub use engine::WorkflowEngine;
pub use graph::Graph;
pub use node::{FnNode, FragmentStream, LeafNode, Node, NodeContext, NodeStep, StreamSummary};
pub use nodes::{
    budget_router, default_workflow, summarize_subgraph, CallLlmNode, DefaultWorkflowOptions, PlanSummaryNode,
    WriteSummaryNode,
};
pub use types::*;
