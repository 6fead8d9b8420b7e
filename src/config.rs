//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AETHER__*` 覆盖（双下划线表示嵌套，如 `AETHER__CYCLE__TOP_K=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::memory::RetentionPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub cycle: CycleSection,
    pub memory: MemorySection,
    pub llm: LlmSection,
}

/// [app] 段：名称与人设前言
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 写入每个生成 prompt 开头的人设前言
    pub system_prompt: Option<String>,
}

/// 规划输出无法解析时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPlanPolicy {
    /// 放弃本轮（与 Reflect / Compose 失败一致）
    #[default]
    Abort,
    /// 重新调用生成端，最多 plan_retries 次，仍失败则放弃本轮
    Retry,
    /// 视为空计划继续执行
    EmptyPlan,
}

/// [cycle] 段：检索条数、Act 并发、分发超时、规划与组合失败策略
#[derive(Debug, Clone, Deserialize)]
pub struct CycleSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// 单次 Agent 分发超时（秒）
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default)]
    pub malformed_plan: MalformedPlanPolicy,
    #[serde(default = "default_plan_retries")]
    pub plan_retries: u32,
    /// 设置后，Compose 生成失败时用此句替代，而不是放弃本轮
    pub compose_fallback: Option<String>,
}

impl Default for CycleSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_concurrent_agents: default_max_concurrent_agents(),
            agent_timeout_secs: default_agent_timeout_secs(),
            malformed_plan: MalformedPlanPolicy::default(),
            plan_retries: default_plan_retries(),
            compose_fallback: None,
        }
    }
}

fn default_top_k() -> usize {
    3
}

fn default_max_concurrent_agents() -> usize {
    3
}

fn default_agent_timeout_secs() -> u64 {
    30
}

fn default_plan_retries() -> u32 {
    1
}

/// [memory] 段：嵌入维度、保留策略、快照路径
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// 最多保留条数，0 表示不限
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    pub ttl_secs: Option<u64>,
    /// 设置后启动时恢复、退出时保存
    pub snapshot_path: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            embedding_dim: default_embedding_dim(),
            max_records: default_max_records(),
            ttl_secs: None,
            snapshot_path: None,
        }
    }
}

fn default_embedding_dim() -> usize {
    256
}

fn default_max_records() -> usize {
    crate::memory::retention::DEFAULT_MAX_RECORDS
}

impl MemorySection {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_records: (self.max_records > 0).then_some(self.max_records),
            ttl: self.ttl_secs.map(Duration::from_secs),
        }
    }
}

/// [llm] 段：后端选择（openai / mock）、模型、嵌入模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// 从 config 目录加载配置，环境变量 AETHER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AETHER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AETHER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cycle.top_k, 3);
        assert_eq!(cfg.cycle.malformed_plan, MalformedPlanPolicy::Abort);
        assert_eq!(cfg.memory.embedding_dim, 256);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[cycle]
top_k = 5
malformed_plan = "retry"
plan_retries = 2

[memory]
embedding_dim = 64
max_records = 0
ttl_secs = 3600
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.cycle.top_k, 5);
        assert_eq!(cfg.cycle.malformed_plan, MalformedPlanPolicy::Retry);
        assert_eq!(cfg.cycle.plan_retries, 2);
        assert_eq!(cfg.memory.embedding_dim, 64);
        let retention = cfg.memory.retention_policy();
        assert_eq!(retention.max_records, None);
        assert_eq!(retention.ttl, Some(Duration::from_secs(3600)));
    }
}
