//! 可分发任务与执行结果
//!
//! AgentTask 由 Schedule 阶段产生、Act 阶段消费，仅存在于单轮循环内；
//! AgentResult 是 Success(value) / Failure(reason) 二选一，Failure 永远不会以错误形式上抛。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 命名参数表
pub type Arguments = serde_json::Map<String, Value>;

/// 一个具体的分发单元：agent 名 + 参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub agent_name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

impl AgentTask {
    pub fn new(agent_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            agent_name: agent_name.into(),
            arguments,
        }
    }

    /// 从 JSON 对象构造参数（非对象时参数为空）
    pub fn with_json(agent_name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Arguments::new(),
        };
        Self::new(agent_name, arguments)
    }
}

/// Agent 执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum AgentResult {
    Success(Value),
    Failure(String),
}

impl AgentResult {
    pub fn success(value: impl Into<Value>) -> Self {
        AgentResult::Success(value.into())
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        AgentResult::Failure(reason.into())
    }

    pub fn cancelled() -> Self {
        AgentResult::Failure("cancelled".to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentResult::Success(_))
    }

    /// 单行文本形式（用于 Compose prompt 与写回摘要）
    pub fn display_line(&self) -> String {
        match self {
            AgentResult::Success(Value::String(s)) => format!("ok: {s}"),
            AgentResult::Success(v) => format!("ok: {v}"),
            AgentResult::Failure(reason) => format!("failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_json_non_object() {
        let task = AgentTask::with_json("echo", serde_json::json!("oops"));
        assert!(task.arguments.is_empty());
    }

    #[test]
    fn test_display_line() {
        assert_eq!(AgentResult::success("hi").display_line(), "ok: hi");
        assert_eq!(AgentResult::success(3).display_line(), "ok: 3");
        assert_eq!(AgentResult::cancelled().display_line(), "failed: cancelled");
    }
}
