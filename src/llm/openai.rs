//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；流式输出逐片段转发，
//! 服务端回报的 usage 转为 StreamEvent::Usage。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionStreamOptions,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{Completion, CompletionOptions, CompletionStream, LlmClient, LlmError, StreamEvent, Usage};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role() {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    // 工具结果没有对应的 tool_call_id，作为带前缀的 system 消息提交
                    Role::Tool => ChatCompletionRequestSystemMessageArgs::default()
                        .content(format!("[tool] {}", m.content()))
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::InvalidRequest(e.to_string()))
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        streaming: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(options.temperature)
            .stream(streaming)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        // 不设 include_usage 时服务端不会在流末尾回报 usage
        if streaming {
            request.stream_options = Some(ChatCompletionStreamOptions {
                include_usage: Some(true),
                include_obfuscation: None,
            });
        }
        Ok(request)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let request = self.build_request(messages, options, false)?;
        tracing::debug!(tag = options.tag, model = %self.model, "chat completion request");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let usage = response.usage.as_ref().map(|u| {
            let usage = Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64);
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
            usage
        });

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(Completion { content, usage })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionStream, LlmError> {
        let request = self.build_request(messages, options, true)?;
        tracing::debug!(tag = options.tag, model = %self.model, "chat completion stream request");

        let upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let totals = self.usage.clone();
        let events = upstream.flat_map(move |item| {
            let batch: Vec<Result<StreamEvent, LlmError>> = match item {
                Ok(chunk) => {
                    let mut batch = Vec::new();
                    if let Some(text) = chunk.choices.first().and_then(|c| c.delta.content.clone()) {
                        if !text.is_empty() {
                            batch.push(Ok(StreamEvent::Delta(text)));
                        }
                    }
                    if let Some(u) = chunk.usage {
                        let usage = Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64);
                        totals.add(usage.prompt_tokens, usage.completion_tokens);
                        batch.push(Ok(StreamEvent::Usage(usage)));
                    }
                    batch
                }
                Err(e) => vec![Err(LlmError::Stream(e.to_string()))],
            };
            stream::iter(batch)
        });

        Ok(Box::pin(events))
    }
}
