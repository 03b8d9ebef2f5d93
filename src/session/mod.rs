//! 会话层：入站事件、会话状态与注册表

pub mod event;
pub mod registry;
pub mod state;

pub use event::InboundEvent;
pub use registry::{SessionHandle, SessionRegistry, DEFAULT_LOCK_TIMEOUT};
pub use state::SessionState;
