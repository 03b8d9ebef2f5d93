//! 会话监管：轮次取消、结构性故障后的暂停
//!
//! 每个会话一个 SessionSupervisor。每轮开始时派生子 token，调用方（如连接断开）可取消正在执行的轮次；
//! 图定义缺陷导致的暂停原因也记录在这里，替换图定义后清除。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌与暂停状态
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 会话根 token，cancel_all 时触发
    cancel_token: CancellationToken,
    /// 当前轮次的子 token
    current_turn: Mutex<Option<CancellationToken>>,
    /// 暂停原因（None 表示正常）
    halted: Mutex<Option<String>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            current_turn: Mutex::new(None),
            halted: Mutex::new(None),
        }
    }

    /// 开始新一轮：创建子 token（用于本轮的取消）
    ///
    /// 返回的 TurnGuard 析构时结束本轮，调用方丢弃 future 时也不会留下过期 token。
    pub fn begin_turn(&self) -> TurnGuard<'_> {
        let token = self.cancel_token.child_token();
        *lock(&self.current_turn) = Some(token.clone());
        TurnGuard {
            supervisor: self,
            token,
        }
    }

    fn end_turn(&self) {
        lock(&self.current_turn).take();
    }

    /// 是否有进行中的轮次
    pub fn turn_in_flight(&self) -> bool {
        lock(&self.current_turn).is_some()
    }

    /// 取消正在执行的轮次；没有进行中的轮次时返回 false
    pub fn cancel_turn(&self) -> bool {
        match lock(&self.current_turn).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn halt(&self, reason: String) {
        *lock(&self.halted) = Some(reason);
    }

    pub fn resume(&self) {
        lock(&self.halted).take();
    }

    pub fn halted_reason(&self) -> Option<String> {
        lock(&self.halted).clone()
    }
}

/// 一个轮次的存续期
#[derive(Debug)]
pub struct TurnGuard<'a> {
    supervisor: &'a SessionSupervisor,
    token: CancellationToken,
}

impl TurnGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.end_turn();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 持锁期间不会 panic，中毒时直接取回数据
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_only_affects_current_turn() {
        let supervisor = SessionSupervisor::new();
        assert!(!supervisor.cancel_turn());

        let first = supervisor.begin_turn();
        assert!(supervisor.cancel_turn());
        assert!(first.token().is_cancelled());
        drop(first);
        assert!(!supervisor.turn_in_flight());

        let second = supervisor.begin_turn();
        assert!(!second.token().is_cancelled());
    }

    #[test]
    fn test_dropped_turn_clears_token() {
        let supervisor = SessionSupervisor::new();
        {
            let _turn = supervisor.begin_turn();
            assert!(supervisor.turn_in_flight());
        }
        assert!(!supervisor.turn_in_flight());
        assert!(!supervisor.cancel_turn());
    }

    #[test]
    fn test_halt_and_resume() {
        let supervisor = SessionSupervisor::default();
        assert!(supervisor.halted_reason().is_none());
        supervisor.halt("bad graph".to_string());
        assert_eq!(supervisor.halted_reason().as_deref(), Some("bad graph"));
        supervisor.resume();
        assert!(supervisor.halted_reason().is_none());
    }
}
