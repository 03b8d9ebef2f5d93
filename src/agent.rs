//! Headless Agent 运行时
//!
//! 供协议客户端（QQ / 标准输入演示等）调用：create_llm_from_config 选择模型后端，
//! AgentRuntime::from_config 组装默认工作流与会话注册表，handle_message 把一条入站消息
//! 路由到指令层或一轮对话，回复按分段符切分后投递。

use std::sync::Arc;

use tracing::{info, warn};

use crate::commands;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::delivery::{ChunkSplitter, ChunkedSink, DeliverySink};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::session::{InboundEvent, SessionRegistry};
use crate::workflow::{default_workflow, TurnOutcome, WorkflowEngine};

/// 根据 [llm] 段创建模型客户端；openai 需要 api_key_env 指向的环境变量
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider_name().as_str() {
        "openai" => {
            let api_key = std::env::var(&cfg.llm.api_key_env).map_err(|_| {
                AgentError::ConfigError(format!("llm.provider = openai but {} is not set", cfg.llm.api_key_env))
            })?;
            info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(api_key.as_str()),
            )))
        }
        "mock" => {
            warn!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
        other => Err(AgentError::ConfigError(format!("unknown llm.provider '{other}'"))),
    }
}

/// 一条入站消息的处理结果
#[derive(Debug)]
pub enum Handled {
    /// 指令回复（不进入上下文）
    Command(String),
    /// 一轮对话
    Turn(TurnOutcome),
}

pub struct AgentRuntime {
    registry: SessionRegistry,
    delimiters: Vec<String>,
    commands_enabled: bool,
}

impl AgentRuntime {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            delimiters: vec!["\n".to_string()],
            commands_enabled: true,
        }
    }

    pub fn with_delimiters(mut self, delimiters: Vec<String>) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_commands(mut self, enabled: bool) -> Self {
        self.commands_enabled = enabled;
        self
    }

    /// 校验配置并组装：模型后端 → 默认工作流 → 引擎（预算 + 缓存模型）→ 会话注册表
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self, AgentError> {
        cfg.validate()?;
        let graph = default_workflow(llm, &cfg.workflow_options())?;
        let engine = WorkflowEngine::new(cfg.budget()?, cfg.cache_model());
        let registry = SessionRegistry::new(Arc::new(graph), engine)
            .with_persona(cfg.persona_text()?)
            .with_lock_timeout(cfg.lock_timeout());
        Ok(Self::new(registry).with_delimiters(cfg.agent.stream_delimiters.clone()))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 处理一条入站消息：`/` 开头走指令层，否则执行一轮对话
    pub async fn handle_message<S: DeliverySink>(&self, event: InboundEvent, sink: S) -> Result<Handled, AgentError> {
        if self.commands_enabled {
            if let Some(parsed) = commands::parse(&event.content) {
                info!(chat_id = %event.chat_id, command = ?parsed.command, "command received");
                let reply = commands::execute(&self.registry, &event.chat_id, &parsed).await?;
                sink.send(&reply).await?;
                sink.close().await?;
                return Ok(Handled::Command(reply));
            }
        }

        let sink = ChunkedSink::new(sink, ChunkSplitter::new(self.delimiters.clone()));
        let outcome = self.registry.run_turn(&event, &sink).await?;
        Ok(Handled::Turn(outcome))
    }
}
