//! 可观测性：日志初始化与调度/回调计数器

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();
}

/// 引擎计数器（累计值），供运维观察提交/延后/回收
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub submitted: AtomicU64,
    pub deferred: AtomicU64,
    pub skipped: AtomicU64,
    pub submit_failed: AtomicU64,
    pub callbacks_accepted: AtomicU64,
    pub callbacks_rejected: AtomicU64,
    pub unknown_request_ids: AtomicU64,
    pub reconciled: AtomicU64,
    pub reclaimed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// 输出一条结构化汇总日志（每轮调度后调用）
    pub fn log_summary(&self) {
        let summary = serde_json::json!({
            "event": "engine_metrics",
            "submitted": Self::get(&self.submitted),
            "deferred": Self::get(&self.deferred),
            "skipped": Self::get(&self.skipped),
            "submit_failed": Self::get(&self.submit_failed),
            "callbacks_accepted": Self::get(&self.callbacks_accepted),
            "callbacks_rejected": Self::get(&self.callbacks_rejected),
            "unknown_request_ids": Self::get(&self.unknown_request_ids),
            "reconciled": Self::get(&self.reconciled),
            "reclaimed": Self::get(&self.reclaimed),
        });
        tracing::info!(metrics = %summary.to_string(), "engine");
    }
}
