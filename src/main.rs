//! Aether - Rust 认知编排循环
//!
//! 入口：初始化日志、加载配置、恢复记忆快照、注册内置 Agent，
//! 从 stdin 逐行读取输入并把回复打印到 stdout，Ctrl+C / SIGTERM / EOF 时停止并保存快照。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aether::agents::{register_builtin_agents, AgentRegistry};
use aether::config::{load_config, AppConfig};
use aether::core::{
    LoopController, MemorySnapshotCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use aether::io::{StdinInput, StdoutSink};
use aether::llm::{create_embedder_from_config, create_llm_from_config};
use aether::memory::{MemorySnapshot, MemoryStore};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    aether::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    let speaker = cfg.app.name.clone().unwrap_or_else(|| "AETHERIUS".to_string());

    let embedder = create_embedder_from_config(&cfg.llm, &cfg.memory);
    let memory = Arc::new(
        MemoryStore::new(embedder, cfg.memory.embedding_dim)
            .with_retention(cfg.memory.retention_policy()),
    );
    let snapshot = cfg.memory.snapshot_path.as_ref().map(MemorySnapshot::new);
    if let Some(snapshot) = &snapshot {
        match snapshot.load_into(&memory) {
            Ok(count) => tracing::info!(records = count, "memory restored"),
            Err(e) => tracing::warn!(error = %e, "memory snapshot not restored, starting empty"),
        }
    }

    let registry = Arc::new(
        AgentRegistry::new().with_timeout(Duration::from_secs(cfg.cycle.agent_timeout_secs)),
    );
    register_builtin_agents(&registry);

    let llm = create_llm_from_config(&cfg.llm, cfg.app.system_prompt.as_deref());

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let controller = LoopController::builder()
        .memory(memory.clone())
        .registry(registry)
        .llm(llm)
        .input(StdinInput::new().with_prompt("> "))
        .sink(StdoutSink::new(speaker))
        .config(cfg.cycle.clone())
        .shutdown_token(shutdown.token())
        .build()
        .context("failed to build loop controller")?;

    let summary = controller.run().await;
    shutdown.shutdown(ShutdownReason::InputClosed);
    tracing::info!(
        completed = summary.cycles_completed,
        aborted = summary.cycles_aborted,
        delivered = summary.responses_delivered,
        "loop finished"
    );

    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    if let Some(snapshot) = snapshot {
        coordinator.register(MemorySnapshotCleanup::new(memory, snapshot));
    }
    let report = coordinator.run_cleanup().await;
    if report.failed + report.timed_out > 0 {
        tracing::warn!(?report, "cleanup incomplete");
    }

    // stdin 的阻塞读无法取消；信号触发的退出不等待下一行输入
    if shutdown.reason() != Some(ShutdownReason::InputClosed) {
        std::process::exit(0);
    }
    Ok(())
}
