//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! 默认回显最后一条 User 消息；可预置回复脚本、注入延迟与失败，并记录每次收到的 prompt。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{Completion, CompletionOptions, CompletionStream, LlmClient, LlmError, StreamEvent, Usage};
use crate::memory::{Message, Role, TokenEstimator};

/// 流式回复时每段字符数
const CHUNK_CHARS: usize = 6;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    delay: Duration,
    /// 接下来多少次调用直接失败
    failures: AtomicUsize,
    /// 流式输出第一段后中断
    break_stream: bool,
    prompts: Mutex<Vec<Vec<Message>>>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回的回复，用完后回到回显模式
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.replies.lock().unwrap_or_else(|e| e.into_inner()) =
            replies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_times(self, times: usize) -> Self {
        self.failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_broken_stream(mut self) -> Self {
        self.break_stream = true;
        self
    }

    /// 每次调用收到的 prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn respond(&self, messages: &[Message]) -> Result<(String, Usage), LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(LlmError::Request("mock failure".to_string()));
        }

        let scripted = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let content = scripted.unwrap_or_else(|| {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role() == Role::User)
                .map(|m| m.content())
                .unwrap_or("(no input)");
            format!("Echo: {last_user}")
        });

        let prompt: usize = messages.iter().map(Message::token_cost).sum();
        let usage = Usage::new(prompt as u64, TokenEstimator::estimate(&content) as u64);
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        Ok((content, usage))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let (content, usage) = self.respond(messages).await?;
        Ok(Completion {
            content,
            usage: Some(usage),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionStream, LlmError> {
        let (content, usage) = self.respond(messages).await?;

        let chars: Vec<char> = content.chars().collect();
        let mut events: Vec<Result<StreamEvent, LlmError>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(StreamEvent::Delta(c.iter().collect())))
            .collect();
        if self.break_stream {
            events.truncate(1);
            events.push(Err(LlmError::Stream("mock connection reset".to_string())));
        } else {
            events.push(Ok(StreamEvent::Usage(usage)));
        }

        let delay = self.delay;
        let stream = stream::iter(events).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay / 10).await;
            }
            event
        });
        Ok(Box::pin(stream))
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}
