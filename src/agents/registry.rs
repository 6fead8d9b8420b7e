//! Agent 注册表与分发器
//!
//! 所有 Agent 实现 AgentHandler（handle / description），由 AgentRegistry 按名注册与查找。
//! 注册表在多会话间共享：读（dispatch）可并发，写（register / unregister）互斥，
//! 查找时只在读锁内克隆 Arc，执行 handler 时不持有任何锁。
//!
//! 重复注册同名 Agent 会替换旧 handler（后写者胜），register 返回是否发生了替换。
//! dispatch 永不返回错误：未找到、超时、handler panic 都转为 AgentResult::Failure。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::time::timeout;

use crate::agents::{AgentResult, AgentTask, Arguments};
use crate::core::CoreError;

/// 默认单次分发超时（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// Agent trait：接收命名参数，返回 Success / Failure
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, args: &Arguments) -> AgentResult;

    /// Agent 描述（写入 Plan prompt，供生成端选择 Agent）
    fn description(&self) -> &str {
        ""
    }
}

/// 将普通闭包包装为 AgentHandler
pub struct FnAgent<F> {
    f: F,
    description: String,
}

impl<F> FnAgent<F>
where
    F: Fn(&Arguments) -> AgentResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F> AgentHandler for FnAgent<F>
where
    F: Fn(&Arguments) -> AgentResult + Send + Sync,
{
    async fn handle(&self, args: &Arguments) -> AgentResult {
        (self.f)(args)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Agent 注册表：名称 -> Arc<dyn AgentHandler>，读写锁保护
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
    timeout: Duration,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// 设置单次分发超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 安装或替换 name 下的 handler；返回是否替换了已有 handler
    pub fn register(&self, name: impl Into<String>, handler: impl AgentHandler + 'static) -> bool {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(&self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> bool {
        let name = name.into();
        let replaced = self
            .agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handler)
            .is_some();
        if replaced {
            tracing::info!(agent = %name, "Agent handler replaced (last registration wins)");
        } else {
            tracing::debug!(agent = %name, "Agent registered");
        }
        replaced
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentHandler>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 已注册的 Agent 名（排序后，保证 prompt 稳定）
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// 返回排序后的 (name, description) 列表，用于生成 Plan prompt 中的 Available agents 段落
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, agent)| (name.clone(), agent.description().to_string()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn dispatch_task(&self, task: &AgentTask) -> AgentResult {
        self.dispatch(&task.agent_name, &task.arguments).await
    }

    /// 按名执行 Agent；未找到 / 超时 / panic 均转为 Failure，并输出 JSON 审计日志
    pub async fn dispatch(&self, name: &str, args: &Arguments) -> AgentResult {
        if name.trim().is_empty() {
            let err = CoreError::Validation("malformed task: empty agent name".to_string());
            tracing::warn!(error = %err, "dispatch rejected");
            return AgentResult::failure(err.to_string());
        }

        let Some(handler) = self.get(name) else {
            let err = CoreError::NotFound(format!("agent {name}"));
            tracing::warn!(agent = %name, error = %err, "dispatch to unknown agent");
            return AgentResult::failure(format!("agent not found: {name}"));
        };

        let start = Instant::now();
        let outcome = timeout(
            self.timeout,
            AssertUnwindSafe(handler.handle(args)).catch_unwind(),
        )
        .await;

        let (result, label) = match outcome {
            Ok(Ok(result)) => {
                let label = if result.is_success() { "ok" } else { "error" };
                (result, label)
            }
            Ok(Err(panic)) => {
                let msg = panic_message(panic.as_ref());
                (AgentResult::failure(format!("agent '{name}' panicked: {msg}")), "panic")
            }
            Err(_) => (
                AgentResult::failure(format!("agent '{name}' timed out after {:?}", self.timeout)),
                "timeout",
            ),
        };

        let audit = serde_json::json!({
            "event": "agent_audit",
            "agent": name,
            "ok": result.is_success(),
            "outcome": label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "agent");

        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Arguments) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: serde_json::Value) -> Arguments {
        match v {
            serde_json::Value::Object(m) => m,
            _ => Arguments::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_agent() {
        let registry = AgentRegistry::new();
        let result = registry.dispatch("no_such_agent", &Arguments::new()).await;
        assert_eq!(result, AgentResult::failure("agent not found: no_such_agent"));
    }

    #[tokio::test]
    async fn test_register_overwrite_last_wins() {
        let registry = AgentRegistry::new();
        assert!(!registry.register("x", FnAgent::new(|_| AgentResult::success("h1"))));
        assert!(registry.register("x", FnAgent::new(|_| AgentResult::success("h2"))));
        let result = registry.dispatch("x", &Arguments::new()).await;
        assert_eq!(result, AgentResult::success("h2"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_passes_arguments() {
        let registry = AgentRegistry::new();
        registry.register(
            "echo",
            FnAgent::new(|a: &Arguments| match a.get("x") {
                Some(v) => AgentResult::Success(v.clone()),
                None => AgentResult::failure("missing x"),
            }),
        );
        let result = registry.dispatch("echo", &args(json!({"x": "hi"}))).await;
        assert_eq!(result, AgentResult::success("hi"));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_failure() {
        let registry = AgentRegistry::new();
        registry.register("boom", FnAgent::new(|_| panic!("kaboom")));
        match registry.dispatch("boom", &Arguments::new()).await {
            AgentResult::Failure(reason) => assert!(reason.contains("kaboom")),
            other => panic!("expected failure, got {other:?}"),
        }
        // 注册表在 panic 之后仍可用
        registry.register("ok", FnAgent::new(|_| AgentResult::success(1)));
        assert!(registry.dispatch("ok", &Arguments::new()).await.is_success());
    }

    struct SlowAgent;

    #[async_trait]
    impl AgentHandler for SlowAgent {
        async fn handle(&self, _args: &Arguments) -> AgentResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            AgentResult::success("late")
        }
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let registry = AgentRegistry::new().with_timeout(Duration::from_millis(20));
        registry.register("slow", SlowAgent);
        match registry.dispatch("slow", &Arguments::new()).await {
            AgentResult::Failure(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_name_is_validation_failure() {
        let registry = AgentRegistry::new();
        match registry.dispatch("  ", &Arguments::new()).await {
            AgentResult::Failure(reason) => assert!(reason.contains("Validation")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_names_sorted_and_unregister() {
        let registry = AgentRegistry::new();
        registry.register("b", FnAgent::new(|_| AgentResult::success(0)).with_description("B"));
        registry.register("a", FnAgent::new(|_| AgentResult::success(0)));
        assert_eq!(registry.agent_names(), vec!["a", "b"]);
        assert_eq!(registry.descriptions()[1], ("b".to_string(), "B".to_string()));
        assert!(registry.unregister("a"));
        assert!(!registry.contains("a"));
    }
}
