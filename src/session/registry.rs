//! 会话注册表
//!
//! chat_id -> 会话句柄。注册表 map 是唯一跨会话共享的结构；每个会话自带一把 tokio Mutex，
//! 整轮持有，保证同一会话的轮次串行、不同会话并行。
//! 每轮在状态的工作副本上执行，成功才整体提交；出错或被取消时丢弃副本，Ledger 保持轮次开始时的样子。

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::core::{AgentError, ContextSnapshot, RecoveryAction, RecoveryEngine, SessionSupervisor};
use crate::delivery::DeliverySink;
use crate::session::{InboundEvent, SessionState};
use crate::workflow::{Graph, TurnOutcome, WorkflowEngine};

/// 默认会话锁等待时间
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// 单个会话：状态（整轮持锁）与监管器（取消 / 暂停）
#[derive(Debug)]
pub struct SessionHandle {
    chat_id: String,
    state: Mutex<SessionState>,
    supervisor: SessionSupervisor,
}

impl SessionHandle {
    fn new(state: SessionState) -> Self {
        Self {
            chat_id: state.chat_id().to_string(),
            state: Mutex::new(state),
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }
}

/// 会话注册表
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    graph: StdRwLock<Arc<Graph>>,
    engine: WorkflowEngine,
    recovery: RecoveryEngine,
    persona: Option<String>,
    lock_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(graph: Arc<Graph>, engine: WorkflowEngine) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            graph: StdRwLock::new(graph),
            engine,
            recovery: RecoveryEngine::new(),
            persona: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// 新会话创建时插入的人设提示词
    pub fn with_persona(mut self, persona: Option<String>) -> Self {
        self.persona = persona.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// 当前生效的图定义
    pub fn graph(&self) -> Arc<Graph> {
        let graph = self.graph.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&graph)
    }

    /// 替换图定义，并恢复所有因图缺陷被暂停的会话；进行中的轮次继续使用旧图
    pub async fn replace_graph(&self, graph: Arc<Graph>) {
        {
            let mut current = self.graph.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = graph;
        }
        let sessions = self.sessions.read().await;
        for handle in sessions.values() {
            if handle.supervisor.halted_reason().is_some() {
                info!(chat_id = %handle.chat_id, "resuming halted session after graph replacement");
                handle.supervisor.resume();
            }
        }
    }

    /// 获取或创建会话；不会隐式销毁已有会话
    pub async fn get_or_create(&self, chat_id: &str) -> Result<Arc<SessionHandle>, AgentError> {
        if let Some(handle) = self.sessions.read().await.get(chat_id) {
            return Ok(Arc::clone(handle));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(chat_id) {
            return Ok(Arc::clone(handle));
        }
        let state = match &self.persona {
            Some(persona) => SessionState::with_persona(chat_id, persona)?,
            None => SessionState::new(chat_id),
        };
        let handle = Arc::new(SessionHandle::new(state));
        sessions.insert(chat_id.to_string(), Arc::clone(&handle));
        info!(chat_id, sessions = sessions.len(), "session created");
        Ok(handle)
    }

    pub async fn get(&self, chat_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(chat_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 执行一轮：追加入站消息并运行当前图
    ///
    /// 同一 chat_id 同一时刻至多一个轮次；等锁超过 lock_timeout 返回 LockTimeout。
    pub async fn run_turn(&self, event: &InboundEvent, sink: &dyn DeliverySink) -> Result<TurnOutcome, AgentError> {
        let handle = self.get_or_create(&event.chat_id).await?;
        if let Some(reason) = handle.supervisor.halted_reason() {
            return Err(AgentError::SessionHalted(reason));
        }

        let mut guard = tokio::time::timeout(self.lock_timeout, handle.state.lock())
            .await
            .map_err(|_| AgentError::LockTimeout(event.chat_id.clone()))?;
        // 等锁期间前一轮可能暂停了会话
        if let Some(reason) = handle.supervisor.halted_reason() {
            return Err(AgentError::SessionHalted(reason));
        }

        let graph = self.graph();
        let turn = handle.supervisor.begin_turn();
        let mut working = guard.clone();
        info!(chat_id = %event.chat_id, graph = graph.name(), "turn started");

        let result = tokio::select! {
            biased;
            _ = turn.token().cancelled() => Err(AgentError::Cancelled),
            result = self.execute(&graph, &mut working, event, sink) => result,
        };
        drop(turn);

        match result {
            Ok(outcome) => {
                *guard = working;
                info!(
                    chat_id = %event.chat_id,
                    usage = outcome.usage,
                    deleted = outcome.deleted.len(),
                    pruned = outcome.pruned.len(),
                    "turn committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                match self.recovery.handle(&err) {
                    RecoveryAction::HaltSession(reason) => {
                        warn!(chat_id = %event.chat_id, %reason, "session halted");
                        handle.supervisor.halt(reason);
                    }
                    RecoveryAction::Retry => {
                        warn!(chat_id = %event.chat_id, error = %err, "turn failed, retryable");
                    }
                    RecoveryAction::Continue | RecoveryAction::Abort => {
                        warn!(chat_id = %event.chat_id, error = %err, "turn aborted");
                    }
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        graph: &Graph,
        working: &mut SessionState,
        event: &InboundEvent,
        sink: &dyn DeliverySink,
    ) -> Result<TurnOutcome, AgentError> {
        let message = event.to_message()?;
        working.append(message)?;
        self.engine.run(graph, working, event, sink).await
    }

    /// 取消该会话正在执行的轮次
    pub async fn cancel(&self, chat_id: &str) -> bool {
        match self.get(chat_id).await {
            Some(handle) => handle.supervisor.cancel_turn(),
            None => false,
        }
    }

    /// 只读快照；等待进行中的轮次提交后再读取
    pub async fn inspect(&self, chat_id: &str) -> Result<Option<ContextSnapshot>, AgentError> {
        let Some(handle) = self.get(chat_id).await else {
            return Ok(None);
        };
        let state = tokio::time::timeout(self.lock_timeout, handle.state.lock())
            .await
            .map_err(|_| AgentError::LockTimeout(chat_id.to_string()))?;
        Ok(Some(state.snapshot()))
    }

    /// 会话暂停原因
    pub async fn halted_reason(&self, chat_id: &str) -> Option<String> {
        self.get(chat_id).await.and_then(|h| h.supervisor.halted_reason())
    }
}
