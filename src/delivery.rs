//! 投递端：模型输出（整段或流式片段）发往协议客户端的出口
//!
//! 引擎对每个片段 `send().await`，接收方慢时引擎随之等待（背压）。

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::AgentError;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(&self, fragment: &str) -> Result<(), AgentError>;

    /// 本轮输出结束
    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 投递事件（可序列化为 JSON 交给协议客户端）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// 回复的一小段
    MessageChunk { chat_id: String, text: String },
    /// 回复结束
    MessageDone { chat_id: String },
}

/// 有界 mpsc 通道投递端，通道满时 send 等待
pub struct ChannelSink {
    chat_id: String,
    tx: mpsc::Sender<DeliveryEvent>,
}

impl ChannelSink {
    pub fn new(chat_id: impl Into<String>, tx: mpsc::Sender<DeliveryEvent>) -> Self {
        Self {
            chat_id: chat_id.into(),
            tx,
        }
    }

    /// 创建投递端与接收端
    pub fn channel(chat_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<DeliveryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(chat_id, tx), rx)
    }
}

#[async_trait]
impl DeliverySink for ChannelSink {
    async fn send(&self, fragment: &str) -> Result<(), AgentError> {
        self.tx
            .send(DeliveryEvent::MessageChunk {
                chat_id: self.chat_id.clone(),
                text: fragment.to_string(),
            })
            .await
            .map_err(|_| AgentError::DeliveryFailed(format!("receiver for chat {} dropped", self.chat_id)))
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.tx
            .send(DeliveryEvent::MessageDone {
                chat_id: self.chat_id.clone(),
            })
            .await
            .map_err(|_| AgentError::DeliveryFailed(format!("receiver for chat {} dropped", self.chat_id)))
    }
}

/// 收集全部片段，测试与命令层使用
#[derive(Debug, Default)]
pub struct CollectingSink {
    fragments: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> Vec<String> {
        self.fragments.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        self.fragments().concat()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

#[async_trait]
impl DeliverySink for CollectingSink {
    async fn send(&self, fragment: &str) -> Result<(), AgentError> {
        self.fragments
            .lock()
            .map_err(|_| AgentError::DeliveryFailed("collector poisoned".into()))?
            .push(fragment.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
        Ok(())
    }
}

/// 丢弃所有输出
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl DeliverySink for NullSink {
    async fn send(&self, _fragment: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 按分隔符切分流式片段：累积到缓冲区，遇到任一分隔符就切出一段（去首尾空白，空段跳过）
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    delimiters: Vec<String>,
    buffer: String,
}

impl ChunkSplitter {
    /// 分隔符为空时退化为按换行切分
    pub fn new(delimiters: Vec<String>) -> Self {
        let mut delimiters: Vec<String> = delimiters.into_iter().filter(|d| !d.is_empty()).collect();
        if delimiters.is_empty() {
            delimiters.push("\n".to_string());
        }
        Self {
            delimiters,
            buffer: String::new(),
        }
    }

    /// 追加一个片段，返回可以立即发送的完整段
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut segments = Vec::new();
        while let Some((pos, len)) = self.first_delimiter() {
            let segment: String = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..pos + len);
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
        segments
    }

    /// 输出结束时取出剩余内容
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    fn first_delimiter(&self) -> Option<(usize, usize)> {
        self.delimiters
            .iter()
            .filter_map(|d| self.buffer.find(d.as_str()).map(|pos| (pos, d.len())))
            .min_by_key(|(pos, _)| *pos)
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self::new(vec!["\n".to_string()])
    }
}

/// 分段投递：把流式片段按分隔符重新切分后交给内层投递端
pub struct ChunkedSink<S> {
    inner: S,
    splitter: Mutex<ChunkSplitter>,
}

impl<S: DeliverySink> ChunkedSink<S> {
    pub fn new(inner: S, splitter: ChunkSplitter) -> Self {
        Self {
            inner,
            splitter: Mutex::new(splitter),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn with_splitter<T>(&self, f: impl FnOnce(&mut ChunkSplitter) -> T) -> Result<T, AgentError> {
        let mut splitter = self
            .splitter
            .lock()
            .map_err(|_| AgentError::DeliveryFailed("chunk splitter poisoned".into()))?;
        Ok(f(&mut splitter))
    }
}

#[async_trait]
impl<S: DeliverySink> DeliverySink for ChunkedSink<S> {
    async fn send(&self, fragment: &str) -> Result<(), AgentError> {
        let segments = self.with_splitter(|s| s.push(fragment))?;
        for segment in segments {
            self.inner.send(&segment).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        let rest = self.with_splitter(|s| s.finish())?;
        if let Some(rest) = rest {
            self.inner.send(&rest).await?;
        }
        self.inner.close().await
    }
}
