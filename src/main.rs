//! Prospector - 销售线索联系方式补全系统
//!
//! 入口：初始化日志、加载配置与存储快照、装配引擎，运行调度/回收守护循环，
//! 收到关闭信号后保存快照退出。

use std::sync::Arc;

use prospector::config::load_config;
use prospector::core::shutdown::{run_cleanup, ShutdownCleanup, SnapshotCleanup};
use prospector::core::{RevealEngine, ShutdownManager};
use prospector::provider::create_provider_from_config;
use prospector::store::{ContactPersistence, ContactStore, InMemoryContactStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prospector::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        prospector::config::AppConfig::default()
    });

    // 存储：装载上次快照（若有）
    let store = Arc::new(InMemoryContactStore::new());
    let persistence = ContactPersistence::new(&cfg.store.snapshot_path);
    match persistence.load() {
        Ok(contacts) if !contacts.is_empty() => {
            tracing::info!(rows = contacts.len(), "Loaded contact snapshot");
            store.load_snapshot(contacts).await;
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Snapshot load failed ({}), starting empty", e),
    }

    let provider = create_provider_from_config(&cfg);
    let engine = RevealEngine::new(cfg.clone(), store.clone() as Arc<dyn ContactStore>, provider);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    tracing::info!(
        dispatch_interval = cfg.engine.dispatch_interval_secs,
        sweep_interval = cfg.engine.sweep_interval_secs,
        pending_timeout = cfg.engine.pending_timeout_secs,
        "Prospector engine starting"
    );

    engine.run(shutdown.token()).await;

    // 退出前保存快照
    let cleanups: Vec<Arc<dyn ShutdownCleanup>> = vec![Arc::new(SnapshotCleanup::new(
        store,
        ContactPersistence::new(&cfg.store.snapshot_path),
    ))];
    run_cleanup(&cleanups, 5).await;

    tracing::info!("Prospector stopped");
    Ok(())
}
