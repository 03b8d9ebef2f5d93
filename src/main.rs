//! echq 演示入口
//!
//! 从标准输入逐行读取 `chat_id: 消息`，每行一个任务并发处理（同一 chat_id 自动串行），
//! 回复按分段打印到标准输出；以 `/` 开头的消息走指令层。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use echq::agent::{create_llm_from_config, AgentRuntime, Handled};
use echq::config::load_config;
use echq::core::AgentError;
use echq::delivery::DeliverySink;
use echq::session::InboundEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

/// 把分段写到标准输出
struct StdoutSink {
    chat_id: String,
}

#[async_trait]
impl DeliverySink for StdoutSink {
    async fn send(&self, fragment: &str) -> Result<(), AgentError> {
        println!("[{}] {}", self.chat_id, fragment);
        Ok(())
    }
}

/// `chat_id: text`；没有冒号时归入 default 会话
fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(':') {
        Some((chat_id, text)) if !chat_id.trim().is_empty() && !text.trim().is_empty() => {
            Some((chat_id.trim().to_string(), text.trim().to_string()))
        }
        Some(_) => None,
        None => Some(("default".to_string(), line.to_string())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    echq::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let llm = create_llm_from_config(&cfg).context("Failed to create LLM client")?;
    let runtime = Arc::new(AgentRuntime::from_config(&cfg, llm).context("Failed to create agent runtime")?);

    tracing::info!("echq ready, reading `chat_id: message` lines from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let Some((chat_id, text)) = parse_line(&line) else {
            continue;
        };
        let runtime = Arc::clone(&runtime);
        tasks.spawn(async move {
            let sink = StdoutSink {
                chat_id: chat_id.clone(),
            };
            match runtime.handle_message(InboundEvent::user(chat_id.as_str(), text), sink).await {
                Ok(Handled::Turn(outcome)) => {
                    for warning in &outcome.warnings {
                        tracing::warn!(%chat_id, "{warning}");
                    }
                }
                Ok(Handled::Command(_)) => {}
                Err(err) => {
                    tracing::error!(%chat_id, error = %err, "message failed");
                    println!("[{chat_id}] ❌ {err}");
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.context("Message task panicked")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("c1: 你好"), Some(("c1".into(), "你好".into())));
        assert_eq!(parse_line("just text"), Some(("default".into(), "just text".into())));
        assert_eq!(parse_line("c1:   "), None);
        assert_eq!(parse_line("   "), None);
    }
}
