//! 优雅关闭
//!
//! 统一的关闭信号监听与清理，确保退出时：
//! - 联系人存储快照落盘（待处理状态可在重启后经超时回收恢复）
//! - 调度/回收循环经 CancellationToken 退出
//! - 计数汇总日志输出

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 致命错误
    FatalError(String),
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 取消 token，分发给引擎循环
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理器
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
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
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
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

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 任务名（日志用）
    fn name(&self) -> &'static str;
}

/// 联系人快照落盘
pub struct SnapshotCleanup {
    store: Arc<crate::store::InMemoryContactStore>,
    persistence: crate::store::ContactPersistence,
}

impl SnapshotCleanup {
    pub fn new(
        store: Arc<crate::store::InMemoryContactStore>,
        persistence: crate::store::ContactPersistence,
    ) -> Self {
        Self { store, persistence }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let contacts = crate::store::ContactStore::snapshot(self.store.as_ref()).await;
        self.persistence.save(&contacts)?;
        tracing::info!(rows = contacts.len(), "Contact snapshot saved");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ContactSnapshot"
    }
}

/// 依次执行清理任务，各自限时
pub async fn run_cleanup(tasks: &[Arc<dyn ShutdownCleanup>], timeout_secs: u64) {
    let timeout = tokio::time::Duration::from_secs(timeout_secs);
    for task in tasks {
        let name = task.name();
        match tokio::time::timeout(timeout, task.cleanup()).await {
            Ok(Ok(())) => tracing::info!("Cleanup '{}' completed", name),
            Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", name, e),
            Err(_) => tracing::warn!("Cleanup '{}' timed out after {}s", name, timeout_secs),
        }
    }
}
