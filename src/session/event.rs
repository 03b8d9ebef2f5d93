//! 入站事件：协议客户端投递的 {chat_id, role, content, timestamp}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{Message, TokenEstimator};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        chat_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(chat_id, "user", content)
    }

    /// 转为账本消息；角色无法识别时返回 InvalidMessage
    pub fn to_message(&self) -> Result<Message, AgentError> {
        let cost = TokenEstimator::estimate(&self.content) as i64;
        Ok(Message::from_raw(&self.role, self.content.clone(), cost)?.with_created_at(self.timestamp))
    }
}
