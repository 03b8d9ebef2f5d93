//! 内置节点与默认工作流
//!
//! 默认工作流：call_llm → [上下文是否超出上限] → summarize_context（子图：plan_summary → write_summary）→ 结束。
//! 总结子图只通过删除通道请求删除旧消息，真正的删除在根图退出时发生。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::AgentError;
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{Message, Role, TokenEstimator, PERSONA_MESSAGE_ID};
use crate::session::SessionState;
use crate::workflow::node::{LeafNode, NodeContext, NodeStep, StreamSummary};
use crate::workflow::types::{Target, WorkflowError};
use crate::workflow::{Graph, GraphBuilder};

/// 总结子图在两个节点之间传递对话文本的辅助字段
const SUMMARY_TRANSCRIPT_KEY: &str = "summary_transcript";

const SUMMARY_PROMPT: &str = "You are a summary assistant. \
Your ONLY task is to produce a concise summary of the following conversation in its original language. \
Do NOT extend the dialogue, answer questions, or generate new sentences. \
Output the summary and NOTHING else. \
Replace \"assistant\" with \"you\".";

/// `<current_time>YYYY-MM-DD HH:MM</current_time>`，本地时间
pub fn current_time_hint() -> String {
    format!("<current_time>{}</current_time>", Local::now().format("%Y-%m-%d %H:%M"))
}

/// 调用模型生成回复并追加到上下文
pub struct CallLlmNode {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
    streaming: bool,
    can_see_datetime: bool,
}

impl CallLlmNode {
    pub fn new(llm: Arc<dyn LlmClient>, options: CompletionOptions) -> Self {
        Self {
            llm,
            options,
            streaming: false,
            can_see_datetime: false,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// 在 prompt 末尾附加当前时间（不写入上下文）
    pub fn with_datetime(mut self, can_see_datetime: bool) -> Self {
        self.can_see_datetime = can_see_datetime;
        self
    }

    fn prompt(&self, state: &SessionState) -> Vec<Message> {
        let mut prompt = state.messages().to_vec();
        if self.can_see_datetime {
            prompt.push(Message::system(current_time_hint()));
        }
        prompt
    }

    fn commit_reply(&self, ctx: &mut NodeContext<'_>, content: String, completion_tokens: Option<u64>) -> Result<(), AgentError> {
        let cost = completion_tokens
            .map(|t| t as usize)
            .unwrap_or_else(|| TokenEstimator::estimate(&content));
        ctx.append(Message::new(Role::Assistant, content, cost))?;
        ctx.record_model_call(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl LeafNode for CallLlmNode {
    async fn run(&self, ctx: &mut NodeContext<'_>) -> Result<NodeStep, AgentError> {
        let prompt = self.prompt(ctx.state());
        debug!(chat_id = %ctx.state().chat_id(), messages = prompt.len(), tag = self.options.tag, "calling model");

        if self.streaming {
            let stream = self.llm.complete_stream(&prompt, &self.options).await?;
            return Ok(NodeStep::Stream(Box::pin(stream.map(|event| event.map_err(AgentError::from)))));
        }

        let completion = self.llm.complete(&prompt, &self.options).await?;
        let reply = completion.content.clone();
        self.commit_reply(
            ctx,
            completion.content,
            completion.usage.map(|u| u.completion_tokens),
        )?;
        Ok(NodeStep::Emit(reply))
    }

    async fn finish_stream(&self, ctx: &mut NodeContext<'_>, summary: StreamSummary) -> Result<(), AgentError> {
        self.commit_reply(
            ctx,
            summary.text,
            summary.usage.map(|u| u.completion_tokens),
        )
    }
}

/// 总结准备：把人设以外的全部消息标记为待删除，并整理成对话文本交给 write_summary
pub struct PlanSummaryNode;

#[async_trait]
impl LeafNode for PlanSummaryNode {
    async fn run(&self, ctx: &mut NodeContext<'_>) -> Result<NodeStep, AgentError> {
        let (ids, transcript): (Vec<String>, Vec<String>) = ctx
            .state()
            .messages()
            .iter()
            .filter(|m| m.id() != PERSONA_MESSAGE_ID)
            .map(|m| (m.id().to_string(), format!("{}: {}", m.role(), m.content())))
            .unzip();

        for id in ids {
            ctx.mark_for_deletion(id);
        }
        ctx.set_aux(SUMMARY_TRANSCRIPT_KEY, Value::String(transcript.join("\n")));
        Ok(NodeStep::Continue)
    }
}

/// 调用模型总结对话，并把结果作为 `<context_summary>` 系统消息追加到上下文
pub struct WriteSummaryNode {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
}

impl WriteSummaryNode {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self {
            llm,
            options: CompletionOptions::new(temperature, "summary"),
        }
    }
}

#[async_trait]
impl LeafNode for WriteSummaryNode {
    async fn run(&self, ctx: &mut NodeContext<'_>) -> Result<NodeStep, AgentError> {
        let transcript = match ctx.remove_aux(SUMMARY_TRANSCRIPT_KEY) {
            Some(Value::String(text)) if !text.is_empty() => text,
            _ => return Ok(NodeStep::Continue),
        };

        let prompt = vec![
            Message::system(SUMMARY_PROMPT),
            Message::user(format!("<conversation>\n{transcript}\n</conversation>")),
        ];
        let completion = self.llm.complete(&prompt, &self.options).await?;
        let content = format!(
            "<context_summary summary_time={}>\n{}\n</context_summary>",
            Local::now().format("%Y-%m-%d %H:%M"),
            completion.content.trim()
        );
        let cost = completion
            .usage
            .map(|u| u.completion_tokens as usize)
            .unwrap_or_else(|| TokenEstimator::estimate(&content));

        info!(chat_id = %ctx.state().chat_id(), marked = ctx.deletions().len(), "context summarized");
        ctx.append(Message::new(Role::System, content, cost))?;
        Ok(NodeStep::Continue)
    }
}

/// 上下文超过硬上限时路由到 "summarize"，否则 "done"
pub fn budget_router(token_limit: usize) -> impl Fn(&SessionState) -> String + Send + Sync + 'static {
    move |state: &SessionState| {
        if state.ledger().current_usage() > token_limit {
            "summarize".to_string()
        } else {
            "done".to_string()
        }
    }
}

/// 默认工作流的参数
#[derive(Debug, Clone)]
pub struct DefaultWorkflowOptions {
    pub token_limit: usize,
    pub temperature: f32,
    pub summary_temperature: f32,
    pub streaming: bool,
    pub can_see_datetime: bool,
    /// 关闭后超限只靠根图退出时的剪枝
    pub summarize_on_overflow: bool,
}

impl Default for DefaultWorkflowOptions {
    fn default() -> Self {
        Self {
            token_limit: 16000,
            temperature: 0.7,
            summary_temperature: 0.3,
            streaming: true,
            can_see_datetime: false,
            summarize_on_overflow: true,
        }
    }
}

/// 总结子图：plan_summary → write_summary
pub fn summarize_subgraph(llm: Arc<dyn LlmClient>, temperature: f32) -> Result<Graph, WorkflowError> {
    GraphBuilder::new("summarize_context")
        .leaf("plan_summary", PlanSummaryNode)
        .leaf("write_summary", WriteSummaryNode::new(llm, temperature))
        .entry("plan_summary")
        .edge("plan_summary", "write_summary")
        .end("write_summary")
        .build()
}

/// 默认对话工作流
pub fn default_workflow(llm: Arc<dyn LlmClient>, options: &DefaultWorkflowOptions) -> Result<Graph, WorkflowError> {
    let call_llm = CallLlmNode::new(
        Arc::clone(&llm),
        CompletionOptions::new(options.temperature, "chat_response"),
    )
    .streaming(options.streaming)
    .with_datetime(options.can_see_datetime);

    let builder = GraphBuilder::new("default").leaf("call_llm", call_llm).entry("call_llm");
    if !options.summarize_on_overflow {
        return builder.end("call_llm").build();
    }

    builder
        .subgraph("summarize_context", summarize_subgraph(llm, options.summary_temperature)?)
        .branch(
            "call_llm",
            budget_router(options.token_limit),
            [
                ("summarize", Target::node("summarize_context")),
                ("done", Target::End),
            ],
        )
        .end("summarize_context")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::CollectingSink;
    use crate::llm::MockLlmClient;
    use crate::memory::TokenBudget;
    use crate::session::InboundEvent;
    use crate::workflow::WorkflowEngine;

    fn options(token_limit: usize, streaming: bool) -> DefaultWorkflowOptions {
        DefaultWorkflowOptions {
            token_limit,
            streaming,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_call_llm_appends_reply() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["你好呀"]));
        let graph = default_workflow(llm.clone(), &options(1000, false)).unwrap();
        let mut state = SessionState::with_persona("c1", "你是一个友好的助手").unwrap();
        state.append(Message::user("你好")).unwrap();

        let sink = CollectingSink::new();
        let outcome = WorkflowEngine::default()
            .run(&graph, &mut state, &InboundEvent::user("c1", "你好"), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.reply, "你好呀");
        assert_eq!(outcome.visited, vec!["call_llm"]);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.ledger().last().map(Message::role), Some(Role::Assistant));
        assert!(state.last_model_call_at().is_some());
        assert!(state.ledger().verify_consistency());
    }

    #[tokio::test]
    async fn test_streaming_reply_committed_after_stream() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["abcdefghijklm"]));
        let graph = default_workflow(llm, &options(1000, true)).unwrap();
        let mut state = SessionState::new("c1");
        state.append(Message::user("hi")).unwrap();

        let sink = CollectingSink::new();
        WorkflowEngine::default()
            .run(&graph, &mut state, &InboundEvent::user("c1", "hi"), &sink)
            .await
            .unwrap();
        assert_eq!(sink.fragments(), vec!["abcdef", "ghijkl", "m"]);
        assert_eq!(state.ledger().last().map(Message::content), Some("abcdefghijklm"));
    }

    #[tokio::test]
    async fn test_datetime_hint_is_transient() {
        let llm = Arc::new(MockLlmClient::new());
        let mut opts = options(1000, false);
        opts.can_see_datetime = true;
        let graph = default_workflow(llm.clone(), &opts).unwrap();
        let mut state = SessionState::new("c1");
        state.append(Message::user("几点了")).unwrap();

        WorkflowEngine::default()
            .run(&graph, &mut state, &InboundEvent::user("c1", "几点了"), &CollectingSink::new())
            .await
            .unwrap();

        let prompt = &llm.prompts()[0];
        assert!(prompt.last().is_some_and(|m| m.content().starts_with("<current_time>")));
        assert!(!state.messages().iter().any(|m| m.content().starts_with("<current_time>")));
    }

    #[tokio::test]
    async fn test_overflow_summarizes_through_deletion_channel() {
        let llm = Arc::new(MockLlmClient::new().with_replies(["a long reply", "they talked about rust"]));
        let graph = default_workflow(llm.clone(), &options(30, false)).unwrap();
        let mut state = SessionState::with_persona("c1", "persona").unwrap();
        state.append(Message::new(Role::User, "old", 20)).unwrap();
        state.append(Message::new(Role::User, "new", 20)).unwrap();

        let engine = WorkflowEngine::new(TokenBudget::new(1000, 500).unwrap(), Default::default());
        let outcome = engine
            .run(&graph, &mut state, &InboundEvent::user("c1", "new"), &CollectingSink::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.visited,
            vec!["call_llm", "summarize_context", "summarize_context/plan_summary", "summarize_context/write_summary"]
        );
        assert_eq!(outcome.deleted.len(), 3);
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].id(), PERSONA_MESSAGE_ID);
        assert!(state.messages()[1].content().starts_with("<context_summary"));
        assert!(state.messages()[1].content().contains("they talked about rust"));
        assert!(state.aux(SUMMARY_TRANSCRIPT_KEY).is_none());
        assert!(state.ledger().verify_consistency());

        let summary_prompt = &llm.prompts()[1];
        assert!(summary_prompt[1].content().contains("user: old"));
        assert!(!summary_prompt[1].content().contains("persona"));
    }

    #[tokio::test]
    async fn test_model_failure_appends_nothing() {
        let llm = Arc::new(MockLlmClient::new().failing_times(1));
        let graph = default_workflow(llm, &options(1000, true)).unwrap();
        let mut state = SessionState::new("c1");
        state.append(Message::user("hi")).unwrap();

        let result = WorkflowEngine::default()
            .run(&graph, &mut state, &InboundEvent::user("c1", "hi"), &CollectingSink::new())
            .await;
        assert!(matches!(result, Err(AgentError::ModelCallFailed(_))));
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_budget_router() {
        let router = budget_router(10);
        let mut state = SessionState::new("c1");
        state.append(Message::new(Role::User, "hi", 10)).unwrap();
        assert_eq!(router(&state), "done");
        state.append(Message::new(Role::User, "again", 1)).unwrap();
        assert_eq!(router(&state), "summarize");
    }
}
