//! 对话消息
//!
//! Message 创建后不可变：ID、角色、内容、token 开销与创建时间只在构造时确定。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::TokenEstimator;

/// 消息 ID（会话内唯一）
pub type MessageId = String;

/// 人设消息的固定 ID，摘要时保留
pub const PERSONA_MESSAGE_ID: &str = "system_prompt";

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// system 消息（人设、上下文摘要）不参与剪枝
    pub fn is_pinned(&self) -> bool {
        matches!(self, Role::System)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(AgentError::InvalidMessage(format!("unknown role '{other}'"))),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    token_cost: usize,
    created_at: DateTime<Utc>,
}

impl Message {
    /// 指定 token 开销创建消息（开销通常来自模型传输层的用量统计）
    pub fn new(role: Role, content: impl Into<String>, token_cost: usize) -> Self {
        Self::with_id(format!("msg_{}", uuid::Uuid::new_v4()), role, content, token_cost)
    }

    pub fn with_id(
        id: impl Into<MessageId>,
        role: Role,
        content: impl Into<String>,
        token_cost: usize,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            token_cost,
            created_at: Utc::now(),
        }
    }

    /// 无用量统计时按字符估算 token 开销
    pub fn estimated(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let cost = TokenEstimator::estimate(&content);
        Self::new(role, content, cost)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::estimated(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::estimated(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::estimated(Role::System, content)
    }

    /// 从外部原始字段构造（入站事件、传输层回报），校验角色与开销
    pub fn from_raw(role: &str, content: impl Into<String>, token_cost: i64) -> Result<Self, AgentError> {
        let role = role.parse::<Role>()?;
        let token_cost = usize::try_from(token_cost).map_err(|_| {
            AgentError::InvalidMessage(format!("negative token cost {token_cost}"))
        })?;
        Ok(Self::new(role, content, token_cost))
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn token_cost(&self) -> usize {
        self.token_cost
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_pinned(&self) -> bool {
        self.role.is_pinned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("ai".parse::<Role>().unwrap(), Role::Assistant);
        assert!(matches!("robot".parse::<Role>(), Err(AgentError::InvalidMessage(_))));
    }

    #[test]
    fn test_from_raw_rejects_negative_cost() {
        let err = Message::from_raw("user", "hi", -3).unwrap_err();
        assert!(matches!(err, AgentError::InvalidMessage(_)));

        let msg = Message::from_raw("tool", "result", 12).unwrap();
        assert_eq!(msg.role(), Role::Tool);
        assert_eq!(msg.token_cost(), 12);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::user("same");
        let b = Message::user("same");
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("msg_"));
    }

    #[test]
    fn test_only_system_is_pinned() {
        assert!(Message::system("persona").is_pinned());
        assert!(!Message::user("hi").is_pinned());
        assert!(!Message::new(Role::Tool, "x", 1).is_pinned());
    }
}
