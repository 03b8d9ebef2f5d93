//! 记忆层：对话消息、消息账本、Token 预算、缓存成本模型
//!
//! 仅进程内存，不做持久化。

pub mod cache;
pub mod conversation;
pub mod ledger;
pub mod token_budget;

pub use cache::CacheCostModel;
pub use conversation::{Message, MessageId, Role, PERSONA_MESSAGE_ID};
pub use ledger::MessageLedger;
pub use token_budget::{TokenBudget, TokenEstimator};
