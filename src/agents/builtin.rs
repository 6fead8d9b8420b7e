//! 内置 Agent：echo（测试 / 回显）与 web_search（占位搜索）

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{AgentHandler, AgentRegistry, AgentResult, Arguments};

/// Echo Agent：回显 args["x"]（或 args["text"]）
pub struct EchoAgent;

#[async_trait]
impl AgentHandler for EchoAgent {
    async fn handle(&self, args: &Arguments) -> AgentResult {
        match args.get("x").or_else(|| args.get("text")) {
            Some(v) => AgentResult::Success(v.clone()),
            None => AgentResult::failure("echo: missing argument 'x'"),
        }
    }

    fn description(&self) -> &str {
        "Echo a value back. Args: {\"x\": <value>}"
    }
}

/// 占位搜索 Agent：不发起网络请求，只返回一段说明文本
pub struct WebSearchAgent;

#[async_trait]
impl AgentHandler for WebSearchAgent {
    async fn handle(&self, args: &Arguments) -> AgentResult {
        match args.get("query").and_then(Value::as_str).map(str::trim) {
            Some(q) if !q.is_empty() => {
                tracing::debug!(query = %q, "web_search placeholder");
                AgentResult::success(format!("Search results for '{q}' would appear here."))
            }
            _ => AgentResult::failure("web_search: missing argument 'query'"),
        }
    }

    fn description(&self) -> &str {
        "Search the web (placeholder). Args: {\"query\": \"text\"}"
    }
}

/// 注册全部内置 Agent
pub fn register_builtin_agents(registry: &AgentRegistry) {
    registry.register("echo", EchoAgent);
    registry.register("web_search", WebSearchAgent);
}
