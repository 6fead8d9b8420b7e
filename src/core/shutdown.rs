//! 优雅关闭
//!
//! Ctrl+C / SIGTERM / 输入结束都落到同一个 CancellationToken：
//! 主控循环在阶段边界观察到后退出，随后 ShutdownCoordinator 依次执行清理任务（记忆快照保存等），
//! 每个任务有独立超时，失败只记日志。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::memory::{MemorySnapshot, MemoryStore};

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 输入源已耗尽（如 stdin EOF）
    InputClosed,
    FatalError(String),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserInitiated => f.write_str("user initiated"),
            ShutdownReason::Signal => f.write_str("signal"),
            ShutdownReason::InputClosed => f.write_str("input closed"),
            ShutdownReason::FatalError(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

/// 关闭信号管理器：只记录第一次触发的原因
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
            reason_tx,
        }
    }

    /// 关闭 token，交给 LoopBuilder::shutdown_token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；重复触发不覆盖第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
        }
        tracing::info!(reason = %reason, "shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理器
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("received Ctrl+C, stopping at next phase boundary");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM, stopping at next phase boundary");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 退出时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中的任务名
    fn name(&self) -> &'static str;
}

/// 清理结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// 关闭协调器：按注册顺序执行清理任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    /// 单个清理任务的超时（秒）
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        tracing::info!(
            tasks = self.tasks.len(),
            reason = %self.manager.reason().map(|r| r.to_string()).unwrap_or_else(|| "none".to_string()),
            "running cleanup"
        );

        for task in &self.tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    report.succeeded += 1;
                    tracing::info!(task = name, "cleanup finished");
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(task = name, error = %e, "cleanup failed");
                }
                Err(_) => {
                    report.timed_out += 1;
                    tracing::warn!(task = name, timeout = ?self.timeout, "cleanup timed out");
                }
            }
        }
        report
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 退出时把记忆库写入快照文件
pub struct MemorySnapshotCleanup {
    store: Arc<MemoryStore>,
    snapshot: MemorySnapshot,
}

impl MemorySnapshotCleanup {
    pub fn new(store: Arc<MemoryStore>, snapshot: MemorySnapshot) -> Self {
        Self { store, snapshot }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for MemorySnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.snapshot.save(&self.store)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_snapshot"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::llm::HashEmbedder;

    #[test]
    fn test_shutdown_keeps_first_reason() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());

        manager.shutdown(ShutdownReason::InputClosed);
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::InputClosed));
    }

    #[tokio::test]
    async fn test_subscribe_receives_reason() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::FatalError("disk full".to_string()));
        assert_eq!(
            rx.recv().await.unwrap(),
            ShutdownReason::FatalError("disk full".to_string())
        );
        manager.wait_for_shutdown().await;
    }

    struct FlagCleanup {
        called: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for FlagCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flag"
        }
    }

    struct FailingCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for FailingCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("nope")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_coordinator_runs_every_task() {
        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(FailingCleanup);
        coordinator.register(FlagCleanup {
            called: called.clone(),
        });

        let report = coordinator.run_cleanup().await;
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_memory_snapshot_cleanup_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let store = Arc::new(MemoryStore::new(Arc::new(HashEmbedder::new(16)), 16));
        store.store("remember the milk").await.unwrap();

        let mut coordinator =
            ShutdownCoordinator::new(Arc::new(ShutdownManager::new())).with_timeout(2);
        coordinator.register(MemorySnapshotCleanup::new(
            store.clone(),
            MemorySnapshot::new(&path),
        ));
        assert_eq!(coordinator.run_cleanup().await.succeeded, 1);

        let restored = MemoryStore::new(Arc::new(HashEmbedder::new(16)), 16);
        assert_eq!(MemorySnapshot::new(&path).load_into(&restored).unwrap(), 1);
        assert_eq!(restored.records()[0].text(), "remember the milk");
    }
}
