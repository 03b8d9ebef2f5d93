//! 指令层：/help、/context、/token
//!
//! 只读：基于 SessionRegistry::inspect 的快照生成回复，从不修改会话状态。

use crate::core::AgentError;
use crate::session::SessionRegistry;

const HELP_TEXT: &str = "可用指令:\n/help - 显示此帮助信息\n/context - 查看当前上下文记忆\n/token - 查看当前上下文记忆的 token 数量";
const UNKNOWN_COMMAND: &str = "🤔 未知指令, 发送 /help 获取帮助";

/// 解析后的指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Context,
    Token,
    Unknown(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name {
            "help" => Command::Help,
            "context" => Command::Context,
            "token" => Command::Token,
            other => Command::Unknown(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            Command::Help => "help",
            Command::Context => "context",
            Command::Token => "token",
            Command::Unknown(name) => name,
        }
    }
}

/// 以 `/` 开头的消息：指令与参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub args: Vec<String>,
}

/// 不是指令时返回 None
pub fn parse(text: &str) -> Option<ParsedCommand> {
    let rest = text.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?;
    Some(ParsedCommand {
        command: Command::from_name(name),
        args: parts.map(String::from).collect(),
    })
}

/// 执行指令并返回回复文本
pub async fn execute(
    registry: &SessionRegistry,
    chat_id: &str,
    parsed: &ParsedCommand,
) -> Result<String, AgentError> {
    if let Command::Unknown(_) = parsed.command {
        return Ok(UNKNOWN_COMMAND.to_string());
    }
    if !parsed.args.is_empty() {
        return Ok(format!("❌ 指令 /{} 不接受任何参数", parsed.command.name()));
    }

    match parsed.command {
        Command::Help => Ok(HELP_TEXT.to_string()),
        Command::Context => {
            let mut reply = String::from("当前上下文记忆:");
            if let Some(snapshot) = registry.inspect(chat_id).await? {
                for msg in &snapshot.messages {
                    reply.push_str(&format!("\n[{}] {}", msg.role(), msg.content()));
                }
            }
            Ok(reply)
        }
        Command::Token => {
            let usage = registry
                .inspect(chat_id)
                .await?
                .map(|s| s.current_usage)
                .unwrap_or(0);
            Ok(format!("当前上下文记忆的 token 数量: {usage}"))
        }
        Command::Unknown(_) => Ok(UNKNOWN_COMMAND.to_string()),
    }
}
