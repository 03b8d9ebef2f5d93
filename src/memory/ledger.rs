//! 短期记忆：消息账本（Message Ledger）
//!
//! 按插入顺序保存一个会话的全部消息，插入顺序即发送给模型的上下文顺序。
//! total_tokens 随 append / 删除增量维护，verify_consistency 仅作一致性检查。

use std::collections::HashSet;

use crate::core::AgentError;
use crate::memory::{Message, MessageId, TokenBudget};

#[derive(Clone, Debug, Default)]
pub struct MessageLedger {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    total_tokens: usize,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条消息；ID 为空或已存在时返回 InvalidMessage，账本保持不变
    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        if message.id().trim().is_empty() {
            return Err(AgentError::InvalidMessage("empty message id".to_string()));
        }
        if self.ids.contains(message.id()) {
            return Err(AgentError::InvalidMessage(format!(
                "duplicate message id '{}'",
                message.id()
            )));
        }
        self.total_tokens += message.token_cost();
        self.ids.insert(message.id().to_string());
        self.messages.push(message);
        Ok(())
    }

    pub fn current_usage(&self) -> usize {
        self.total_tokens
    }

    pub fn needs_pruning(&self, budget: &TokenBudget) -> bool {
        budget.needs_pruning(self.total_tokens)
    }

    /// 计算 prune_to_target 会移除哪些消息，不修改账本
    ///
    /// 从最旧的非固定消息开始，直到累计释放的 token 足以降到目标以下；
    /// 可移除的消息耗尽时返回已选中的部分。
    pub fn plan_prune(&self, target_tokens: usize) -> Vec<MessageId> {
        let mut remaining = self.total_tokens;
        let mut selected = Vec::new();
        for message in &self.messages {
            if remaining <= target_tokens {
                break;
            }
            if message.is_pinned() {
                continue;
            }
            remaining -= message.token_cost();
            selected.push(message.id().to_string());
        }
        selected
    }

    /// 移除最旧的非固定消息直到 total_tokens <= target_tokens，返回按原顺序排列的已移除 ID
    pub fn prune_to_target(&mut self, target_tokens: usize) -> Vec<MessageId> {
        let planned = self.plan_prune(target_tokens);
        self.apply_deletions(&planned)
    }

    /// 按 ID 删除消息；不存在的 ID 忽略（幂等），返回实际删除的 ID
    pub fn apply_deletions<'a, I>(&mut self, ids: I) -> Vec<MessageId>
    where
        I: IntoIterator<Item = &'a MessageId>,
    {
        let targets: HashSet<&str> = ids
            .into_iter()
            .map(String::as_str)
            .filter(|id| self.ids.contains(*id))
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(targets.len());
        let mut freed = 0;
        self.messages.retain(|m| {
            if targets.contains(m.id()) {
                freed += m.token_cost();
                removed.push(m.id().to_string());
                false
            } else {
                true
            }
        });
        for id in &removed {
            self.ids.remove(id);
        }
        self.total_tokens -= freed;
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 全量重算 token 合计，与增量值比对
    pub fn verify_consistency(&self) -> bool {
        let sum: usize = self.messages.iter().map(Message::token_cost).sum();
        sum == self.total_tokens && self.ids.len() == self.messages.len()
    }
}
