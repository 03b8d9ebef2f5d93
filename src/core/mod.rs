//! 核心层：错误与恢复、状态投影、会话监管

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use state::{ContextSnapshot, TurnPhase};
