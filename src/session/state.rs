//! 会话状态
//!
//! 每个 chat_id 一份：消息账本、待删除集合、上次模型调用时间，以及扩展节点可读写的辅助字段。
//! 节点只能追加消息、读写辅助字段；删除与剪枝需要 RootExit，只在根图退出时发生。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{AgentError, ContextSnapshot};
use crate::memory::{CacheCostModel, Message, MessageId, MessageLedger, Role, TokenEstimator, PERSONA_MESSAGE_ID};
use crate::workflow::RootExit;

#[derive(Clone, Debug)]
pub struct SessionState {
    chat_id: String,
    ledger: MessageLedger,
    pending_deletions: Vec<MessageId>,
    last_model_call_at: Option<DateTime<Utc>>,
    aux: HashMap<String, Value>,
}

impl SessionState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ledger: MessageLedger::new(),
            pending_deletions: Vec::new(),
            last_model_call_at: None,
            aux: HashMap::new(),
        }
    }

    /// 新会话带上人设（固定 ID，固定在上下文开头）
    pub fn with_persona(chat_id: impl Into<String>, persona: &str) -> Result<Self, AgentError> {
        let mut state = Self::new(chat_id);
        if !persona.trim().is_empty() {
            let cost = TokenEstimator::estimate(persona);
            state
                .ledger
                .append(Message::with_id(PERSONA_MESSAGE_ID, Role::System, persona, cost))?;
        }
        Ok(state)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn messages(&self) -> &[Message] {
        self.ledger.messages()
    }

    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        self.ledger.append(message)
    }

    /// 本轮已标记、尚未应用的删除 ID（删除通道的只读镜像）；轮次之外恒为空
    pub fn pending_deletions(&self) -> &[MessageId] {
        &self.pending_deletions
    }

    pub(crate) fn track_pending_deletion(&mut self, id: MessageId) {
        self.pending_deletions.push(id);
    }

    pub fn last_model_call_at(&self) -> Option<DateTime<Utc>> {
        self.last_model_call_at
    }

    pub fn record_model_call(&mut self, at: DateTime<Utc>) {
        self.last_model_call_at = Some(at);
    }

    pub fn since_last_call(&self, now: DateTime<Utc>) -> Option<Duration> {
        CacheCostModel::since_last_call(self.last_model_call_at, now)
    }

    pub fn aux(&self, key: &str) -> Option<&Value> {
        self.aux.get(key)
    }

    pub fn set_aux(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.aux.insert(key.into(), value)
    }

    pub fn remove_aux(&mut self, key: &str) -> Option<Value> {
        self.aux.remove(key)
    }

    /// 根图退出：应用删除通道中的 ID，返回实际删除的 ID，并清空待删除集合
    pub fn apply_pending_deletions(&mut self, ids: Vec<MessageId>, _exit: &RootExit) -> Vec<MessageId> {
        let removed = self.ledger.apply_deletions(&ids);
        self.pending_deletions.clear();
        removed
    }

    /// 根图退出：剪枝到目标 token 数
    pub fn prune_to_target(&mut self, target_tokens: usize, _exit: &RootExit) -> Vec<MessageId> {
        self.ledger.prune_to_target(target_tokens)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            chat_id: self.chat_id.clone(),
            messages: self.ledger.messages().to_vec(),
            current_usage: self.ledger.current_usage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_is_first_and_pinned() {
        let state = SessionState::with_persona("c1", "你是一个友好的助手").unwrap();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].id(), PERSONA_MESSAGE_ID);
        assert!(state.messages()[0].is_pinned());
    }

    #[test]
    fn test_blank_persona_skipped() {
        let state = SessionState::with_persona("c1", "   ").unwrap();
        assert!(state.ledger().is_empty());
    }

    #[test]
    fn test_aux_fields() {
        let mut state = SessionState::new("c1");
        assert!(state.set_aux("mood", serde_json::json!("happy")).is_none());
        assert_eq!(state.aux("mood"), Some(&serde_json::json!("happy")));
        assert!(state.remove_aux("mood").is_some());
        assert!(state.aux("mood").is_none());
    }

    #[test]
    fn test_snapshot_copies_usage() {
        let mut state = SessionState::new("c1");
        state.append(Message::new(Role::User, "hi", 7)).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.current_usage, 7);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(state.pending_deletions().is_empty());
    }
}
