//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ECHQ__*` 覆盖（双下划线表示嵌套，如 `ECHQ__MEMORY__TOKEN_LIMIT=32000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::memory::{CacheCostModel, TokenBudget};
use crate::workflow::DefaultWorkflowOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub memory: MemorySection,
    pub llm: LlmSection,
    pub agent: AgentSection,
}

/// [memory] 段：上下文预算与缓存成本
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 硬上限，超过后在根图退出时剪枝
    pub token_limit: usize,
    /// 剪枝目标
    pub expected_token_usage: usize,
    pub enable_cache_management: bool,
    pub cache_expiry_seconds: u64,
    /// 缓存命中价格 / 正常价格
    pub cache_price_ratio: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            token_limit: 16000,
            expected_token_usage: 8000,
            enable_cache_management: false,
            cache_expiry_seconds: 300,
            cache_price_ratio: 0.1,
        }
    }
}

/// [llm] 段：后端选择与采样温度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点，未设置时用官方地址
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub summary_temperature: f32,
    pub streaming: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            summary_temperature: 0.3,
            streaming: true,
        }
    }
}

impl LlmSection {
    /// 归一化后的后端名（去空白、小写）
    pub fn provider_name(&self) -> String {
        self.provider.trim().to_lowercase()
    }
}

/// [agent] 段：人设、时间提示、会话锁与分段投递
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub persona: Option<String>,
    /// 人设文件，优先于 persona
    pub persona_file: Option<PathBuf>,
    pub can_see_datetime: bool,
    pub lock_timeout_secs: u64,
    /// 流式输出的分段符
    pub stream_delimiters: Vec<String>,
    /// 上下文超限时先总结再剪枝
    pub summarize_on_overflow: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            persona: None,
            persona_file: None,
            can_see_datetime: false,
            lock_timeout_secs: 30,
            stream_delimiters: vec!["\n".to_string()],
            summarize_on_overflow: true,
        }
    }
}

impl AppConfig {
    /// 校验取值约束：token_limit > 0，0 < expected < limit，cache_price_ratio ∈ (0, 1]
    pub fn validate(&self) -> Result<(), AgentError> {
        let m = &self.memory;
        if m.token_limit == 0 {
            return Err(AgentError::ConfigError("memory.token_limit must be > 0".into()));
        }
        if m.expected_token_usage == 0 || m.expected_token_usage >= m.token_limit {
            return Err(AgentError::ConfigError(format!(
                "memory.expected_token_usage must be in (0, {}), got {}",
                m.token_limit, m.expected_token_usage
            )));
        }
        if !(m.cache_price_ratio > 0.0 && m.cache_price_ratio <= 1.0) {
            return Err(AgentError::ConfigError(format!(
                "memory.cache_price_ratio must be in (0, 1], got {}",
                m.cache_price_ratio
            )));
        }
        match self.llm.provider_name().as_str() {
            "mock" | "openai" => {}
            other => {
                return Err(AgentError::ConfigError(format!("unknown llm.provider '{other}'")));
            }
        }
        if self.agent.lock_timeout_secs == 0 {
            return Err(AgentError::ConfigError("agent.lock_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn budget(&self) -> Result<TokenBudget, AgentError> {
        TokenBudget::new(self.memory.token_limit, self.memory.expected_token_usage)
    }

    pub fn cache_model(&self) -> CacheCostModel {
        CacheCostModel::new(
            self.memory.enable_cache_management,
            Duration::from_secs(self.memory.cache_expiry_seconds),
            self.memory.cache_price_ratio,
        )
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.lock_timeout_secs)
    }

    /// 人设文本：persona_file 优先，其次 persona；空白视为未配置
    pub fn persona_text(&self) -> Result<Option<String>, AgentError> {
        let text = match &self.agent.persona_file {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                AgentError::ConfigError(format!("failed to read persona file {}: {e}", path.display()))
            })?),
            None => self.agent.persona.clone(),
        };
        Ok(text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    pub fn workflow_options(&self) -> DefaultWorkflowOptions {
        DefaultWorkflowOptions {
            token_limit: self.memory.token_limit,
            temperature: self.llm.temperature,
            summary_temperature: self.llm.summary_temperature,
            streaming: self.llm.streaming,
            can_see_datetime: self.agent.can_see_datetime,
            summarize_on_overflow: self.agent.summarize_on_overflow,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ECHQ__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 ECHQ__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ECHQ")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
