//! 已编译的工作流图
//!
//! 节点表 + 入口 + 边表，编译后不可变。编译时用邻接表和入度表（拓扑排序）拒绝静态环路。

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::core::AgentError;
use crate::session::SessionState;
use crate::workflow::types::*;
use crate::workflow::Node;

#[derive(Debug)]
pub struct Graph {
    name: String,
    nodes: HashMap<NodeName, Node>,
    entry: NodeName,
    edges: HashMap<NodeName, Edge>,
}

impl Graph {
    pub(crate) fn new(
        name: String,
        nodes: HashMap<NodeName, Node>,
        entry: NodeName,
        edges: HashMap<NodeName, Edge>,
    ) -> Self {
        Self {
            name,
            nodes,
            entry,
            edges,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 根据边表选择下一落点；没有出边的节点视为终止
    pub fn next(&self, from: &str, state: &SessionState) -> Result<Target, AgentError> {
        match self.edges.get(from) {
            None | Some(Edge::End) => Ok(Target::End),
            Some(Edge::Next(name)) => Ok(Target::Node(name.clone())),
            Some(Edge::Branch { router, routes }) => {
                let key = router(state);
                routes
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| AgentError::UnknownNode(format!("{}: route '{key}' from '{from}'", self.name)))
            }
        }
    }

    /// 所有可能的后继（条件边的全部落点）
    pub(crate) fn successors(&self, from: &str) -> Vec<&str> {
        match self.edges.get(from) {
            None | Some(Edge::End) => Vec::new(),
            Some(Edge::Next(name)) => vec![name.as_str()],
            Some(Edge::Branch { routes, .. }) => routes
                .values()
                .filter_map(|t| match t {
                    Target::Node(name) => Some(name.as_str()),
                    Target::End => None,
                })
                .collect(),
        }
    }

    /// 拓扑排序检测环路，返回环上（或环下游无法排序的）字典序最小的节点名
    pub(crate) fn find_static_cycle(&self) -> Option<NodeName> {
        let mut in_degree: HashMap<&str, usize> = self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        for name in self.nodes.keys() {
            for succ in self.successors(name) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree += 1;
                }
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut sorted = 0;
        while let Some(name) = ready.pop_front() {
            sorted += 1;
            for succ in self.successors(name) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(succ);
                    }
                }
            }
        }

        if sorted == self.nodes.len() {
            return None;
        }
        in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(name, _)| name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .next()
            .map(String::from)
    }
}
