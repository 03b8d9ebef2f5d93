//! echq - 多会话对话智能体核心
//!
//! 模块划分：
//! - **agent**: 无头运行时（模型后端选择、默认工作流组装、消息路由）
//! - **commands**: /help、/context、/token 只读指令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态投影、会话监管
//! - **delivery**: 投递端与流式分段
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息、Token 预算、上下文账本与缓存成本模型
//! - **session**: 入站事件、会话状态与注册表
//! - **workflow**: 工作流图引擎与删除传播

pub mod agent;
pub mod commands;
pub mod config;
pub mod core;
pub mod delivery;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod session;
pub mod workflow;

pub use agent::AgentRuntime;
pub use session::SessionRegistry;
pub use workflow::{Graph, GraphBuilder, WorkflowEngine};
