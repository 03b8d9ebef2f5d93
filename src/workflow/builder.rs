//! 工作流构建器
//!
//! 提供流畅的API来声明节点与边，build() 时一次性校验并编译成不可变的 Graph

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::AgentError;
use crate::session::SessionState;
use crate::workflow::node::{FnNode, LeafNode, Node, NodeContext, NodeStep};
use crate::workflow::types::*;
use crate::workflow::Graph;

/// 图构建器
pub struct GraphBuilder {
    name: String,
    entry: Option<NodeName>,
    nodes: HashMap<NodeName, Node>,
    edges: HashMap<NodeName, Edge>,
    /// 链式调用中遇到的第一个错误，build() 时返回
    error: Option<WorkflowError>,
}

impl GraphBuilder {
    /// 创建新的图构建器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            error: None,
        }
    }

    fn insert_node(mut self, name: NodeName, node: Node) -> Self {
        if self.nodes.contains_key(&name) {
            self.error.get_or_insert(WorkflowError::DuplicateNode(name));
        } else {
            self.nodes.insert(name, node);
        }
        self
    }

    fn insert_edge(mut self, from: NodeName, edge: Edge) -> Self {
        if self.edges.contains_key(&from) {
            self.error.get_or_insert(WorkflowError::InvalidConfiguration(format!(
                "node '{from}' already has an outgoing edge"
            )));
        } else {
            self.edges.insert(from, edge);
        }
        self
    }

    /// 添加 Leaf 节点
    pub fn leaf(self, name: impl Into<NodeName>, node: impl LeafNode + 'static) -> Self {
        self.insert_node(name.into(), Node::Leaf(Arc::new(node)))
    }

    /// 以同步闭包添加 Leaf 节点
    pub fn leaf_fn<F>(self, name: impl Into<NodeName>, f: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>) -> Result<NodeStep, AgentError> + Send + Sync + 'static,
    {
        self.leaf(name, FnNode::new(f))
    }

    /// 添加子图节点
    pub fn subgraph(self, name: impl Into<NodeName>, graph: impl Into<Arc<Graph>>) -> Self {
        self.insert_node(name.into(), Node::Subgraph(graph.into()))
    }

    /// 设置入口节点
    pub fn entry(mut self, name: impl Into<NodeName>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// 固定边 from -> to
    pub fn edge(self, from: impl Into<NodeName>, to: impl Into<NodeName>) -> Self {
        self.insert_edge(from.into(), Edge::Next(to.into()))
    }

    /// from 执行完后当前图结束
    pub fn end(self, from: impl Into<NodeName>) -> Self {
        self.insert_edge(from.into(), Edge::End)
    }

    /// 条件边：router 返回的键在 routes 中查落点
    pub fn branch<R, K>(self, from: impl Into<NodeName>, router: R, routes: impl IntoIterator<Item = (K, Target)>) -> Self
    where
        R: Fn(&SessionState) -> String + Send + Sync + 'static,
        K: Into<String>,
    {
        let routes: BTreeMap<String, Target> = routes.into_iter().map(|(k, t)| (k.into(), t)).collect();
        self.insert_edge(
            from.into(),
            Edge::Branch {
                router: Arc::new(router),
                routes,
            },
        )
    }

    /// 构建图：检查重复节点、入口、边的落点与静态环路
    pub fn build(self) -> Result<Graph, WorkflowError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let entry = self
            .entry
            .ok_or_else(|| WorkflowError::InvalidConfiguration(format!("graph '{}' has no entry", self.name)))?;
        if !self.nodes.contains_key(&entry) {
            return Err(WorkflowError::UnknownNode(entry));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(WorkflowError::UnknownNode(from.clone()));
            }
            match edge {
                Edge::Next(to) if !self.nodes.contains_key(to) => {
                    return Err(WorkflowError::UnknownNode(to.clone()));
                }
                Edge::Branch { routes, .. } => {
                    if routes.is_empty() {
                        return Err(WorkflowError::InvalidConfiguration(format!(
                            "branch from '{from}' has no routes"
                        )));
                    }
                    for target in routes.values() {
                        if let Target::Node(to) = target {
                            if !self.nodes.contains_key(to) {
                                return Err(WorkflowError::UnknownNode(to.clone()));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let graph = Graph::new(self.name, self.nodes, entry, self.edges);
        if let Some(node) = graph.find_static_cycle() {
            return Err(WorkflowError::CycleDetected(node));
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut NodeContext<'_>) -> Result<NodeStep, AgentError> {
        Ok(NodeStep::Continue)
    }

    #[test]
    fn test_linear_graph_builds() {
        let graph = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .leaf_fn("b", noop)
            .entry("a")
            .edge("a", "b")
            .end("b")
            .build()
            .unwrap();

        assert_eq!(graph.name(), "main");
        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.len(), 2);
        let state = SessionState::new("c1");
        assert_eq!(graph.next("a", &state).unwrap(), Target::node("b"));
        assert_eq!(graph.next("b", &state).unwrap(), Target::End);
    }

    #[test]
    fn test_missing_entry() {
        let result = GraphBuilder::new("main").leaf_fn("a", noop).build();
        assert!(matches!(result, Err(WorkflowError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_duplicate_node() {
        let result = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .leaf_fn("a", noop)
            .entry("a")
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let result = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .entry("a")
            .edge("a", "ghost")
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::UnknownNode("ghost".into()));
    }

    #[test]
    fn test_branch_to_unknown_node() {
        let result = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .entry("a")
            .branch("a", |_| "x".to_string(), [("x", Target::node("ghost")), ("y", Target::End)])
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::UnknownNode("ghost".into()));
    }

    #[test]
    fn test_static_cycle_rejected() {
        let result = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .leaf_fn("b", noop)
            .leaf_fn("c", noop)
            .entry("a")
            .edge("a", "b")
            .edge("b", "c")
            .branch("c", |_| "back".to_string(), [("back", Target::node("b")), ("done", Target::End)])
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::CycleDetected("b".into()));
    }

    #[test]
    fn test_self_loop_rejected() {
        let result = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .entry("a")
            .edge("a", "a")
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::CycleDetected("a".into()));
    }

    #[test]
    fn test_router_returning_unlisted_key() {
        let graph = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .entry("a")
            .branch("a", |_| "nowhere".to_string(), [("done", Target::End)])
            .build()
            .unwrap();
        let state = SessionState::new("c1");
        assert!(matches!(graph.next("a", &state), Err(AgentError::UnknownNode(_))));
    }

    #[test]
    fn test_subgraph_node() {
        let inner = GraphBuilder::new("inner").leaf_fn("c", noop).entry("c").build().unwrap();
        let graph = GraphBuilder::new("main")
            .leaf_fn("a", noop)
            .subgraph("sub", inner)
            .entry("a")
            .edge("a", "sub")
            .build()
            .unwrap();
        assert!(matches!(graph.node("sub"), Some(Node::Subgraph(g)) if g.name() == "inner"));
    }
}
