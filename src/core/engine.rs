//! Reveal 编排引擎：组装各组件并暴露三个入口
//!
//! dispatch_batch（周期或按需）、ingest_callback（并发回调路径）、
//! sweep_expired（超时回收）。调度与回调只通过关联表和联系人存储协作，
//! 彼此不直接调用。run 为可取消的守护循环。

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{
    BatchDispatcher, CallbackIngestor, DispatchReport, IngestOutcome, QuotaLimits, QuotaTracker,
    RequestCorrelator, StatusReconciler,
};
use crate::model::{CallbackDelivery, ContactStatus, ProviderId};
use crate::observability::EngineMetrics;
use crate::provider::ProviderClient;
use crate::store::ContactStore;

/// Reveal 编排引擎
pub struct RevealEngine {
    store: Arc<dyn ContactStore>,
    quota: Arc<QuotaTracker>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: BatchDispatcher,
    ingestor: CallbackIngestor,
    metrics: Arc<EngineMetrics>,
    cfg: AppConfig,
}

impl RevealEngine {
    pub fn new(
        cfg: AppConfig,
        store: Arc<dyn ContactStore>,
        provider: Arc<dyn ProviderClient>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let quota = Arc::new(QuotaTracker::new(QuotaLimits {
            daily_reveal: cfg.quota.daily_reveal_limit,
            daily_profile_view: cfg.quota.daily_profile_view_limit,
            per_minute: cfg.quota.per_minute_limit,
        }));
        let correlator = Arc::new(RequestCorrelator::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));

        let dispatcher = BatchDispatcher::new(
            quota.clone(),
            correlator.clone(),
            store.clone(),
            provider,
            metrics.clone(),
            cfg.provider.max_retries,
            cfg.provider.retry_backoff_ms,
        );
        let ingestor = CallbackIngestor::new(
            correlator.clone(),
            reconciler,
            metrics.clone(),
            cfg.callback.verify_token.clone(),
        );

        Self {
            store,
            quota,
            correlator,
            dispatcher,
            ingestor,
            metrics,
            cfg,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn quota(&self) -> Arc<QuotaTracker> {
        Arc::clone(&self.quota)
    }

    pub fn correlator(&self) -> Arc<RequestCorrelator> {
        Arc::clone(&self.correlator)
    }

    /// 调度一轮：取出全部 New 候选（含超时回收回来的），按配额提交
    pub async fn dispatch_batch(&self, batch_size: usize, rate: usize) -> DispatchReport {
        let candidates = self.store.query_by_status(ContactStatus::New).await;
        if candidates.is_empty() {
            return DispatchReport::default();
        }
        let report = self.dispatcher.dispatch(candidates, batch_size, rate).await;
        tracing::info!(
            submitted = report.submitted.len(),
            deferred = report.deferred,
            skipped = report.skipped,
            failed = report.failed,
            "Dispatch run complete"
        );
        report
    }

    /// 摄入一条回调投递（可多路并发调用）
    pub async fn ingest_callback(
        &self,
        delivery: CallbackDelivery,
        presented_token: Option<&str>,
    ) -> IngestOutcome {
        self.ingestor.ingest(delivery, presented_token).await
    }

    /// 超时回收：逐出过期关联条目，并把对应 Contact 退回 New。
    /// 同时扫描存储里滞留超时却无在途条目的 RevealRequested 行
    /// （进程重启丢失关联状态的情形），一并回收。返回回收条数。
    pub async fn sweep_expired(&self, timeout_secs: u64) -> usize {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        let mut reclaim: Vec<ProviderId> = self.correlator.sweep_expired(now, timeout);

        let still_pending = self.correlator.pending_provider_ids();
        for c in self.store.query_by_status(ContactStatus::RevealRequested).await {
            if now - c.last_updated > timeout
                && !still_pending.contains(&c.provider_id)
                && !reclaim.contains(&c.provider_id)
            {
                reclaim.push(c.provider_id);
            }
        }

        let mut reclaimed = 0usize;
        for provider_id in reclaim {
            if self.return_to_new(&provider_id).await {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            EngineMetrics::add(&self.metrics.reclaimed, reclaimed as u64);
            tracing::info!(reclaimed, "Timed-out contacts returned to New, will retry");
        }
        reclaimed
    }

    /// RevealRequested → New；回调抢先写入终态时保留终态
    async fn return_to_new(&self, provider_id: &ProviderId) -> bool {
        for _ in 0..3 {
            let Some(mut c) = self.store.find_by_provider_id(provider_id).await else {
                return false;
            };
            if c.status != ContactStatus::RevealRequested {
                return false;
            }
            c.status = ContactStatus::New;
            c.last_updated = Utc::now();
            match self.store.upsert(c).await {
                Ok(()) => return true,
                Err(crate::core::RevealError::StoreWriteConflict(_)) => continue,
                Err(e) => {
                    tracing::error!(provider_id = %provider_id, error = %e, "Reclaim write failed");
                    return false;
                }
            }
        }
        false
    }

    /// 守护循环：周期调度 + 周期回收，token 取消后退出并输出计数汇总
    pub async fn run(&self, token: CancellationToken) {
        let mut dispatch_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.cfg.engine.dispatch_interval_secs.max(1),
        ));
        let mut sweep_tick = tokio::time::interval(std::time::Duration::from_secs(
            self.cfg.engine.sweep_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                _ = dispatch_tick.tick() => {
                    self.dispatch_batch(self.cfg.engine.batch_size, self.cfg.engine.rate_per_run).await;
                }
                _ = sweep_tick.tick() => {
                    self.sweep_expired(self.cfg.engine.pending_timeout_secs).await;
                }
                _ = token.cancelled() => {
                    tracing::info!("Engine loop cancelled");
                    break;
                }
            }
        }
        self.metrics.log_summary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contact;
    use crate::provider::MockProviderClient;
    use crate::store::InMemoryContactStore;

    async fn engine_with(
        cfg_mut: impl FnOnce(&mut AppConfig),
    ) -> (RevealEngine, Arc<InMemoryContactStore>, Arc<MockProviderClient>) {
        let mut cfg = AppConfig::default();
        cfg_mut(&mut cfg);
        let store = Arc::new(InMemoryContactStore::new());
        let provider = Arc::new(MockProviderClient::new());
        let engine = RevealEngine::new(cfg, store.clone(), provider.clone());
        (engine, store, provider)
    }

    #[tokio::test]
    async fn test_dispatch_then_sweep_reclaims() {
        let (engine, store, _) = engine_with(|_| {}).await;
        store
            .upsert(Contact::new(ProviderId::new("p-1"), "Alice"))
            .await
            .unwrap();

        let report = engine.dispatch_batch(100, 0).await;
        assert_eq!(report.submitted.len(), 1);

        // 未超时不回收
        assert_eq!(engine.sweep_expired(3600).await, 0);
        // 0 秒超时立即回收（防御等待确保时间戳早于 now）
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(engine.sweep_expired(0).await, 1);

        let c = store
            .find_by_provider_id(&ProviderId::new("p-1"))
            .await
            .unwrap();
        assert_eq!(c.status, ContactStatus::New);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_orphaned_requested_rows() {
        // 重启丢失关联状态：RevealRequested 行无在途条目，扫描兜底回收
        let (engine, store, _) = engine_with(|_| {}).await;
        let mut c = Contact::new(ProviderId::new("p-lost"), "Lost");
        c.status = ContactStatus::RevealRequested;
        c.last_updated = Utc::now() - chrono::Duration::hours(2);
        store.upsert(c).await.unwrap();

        assert_eq!(engine.sweep_expired(3600).await, 1);
        let c = store
            .find_by_provider_id(&ProviderId::new("p-lost"))
            .await
            .unwrap();
        assert_eq!(c.status, ContactStatus::New);
    }

    #[tokio::test]
    async fn test_empty_store_dispatch_is_noop() {
        let (engine, _, provider) = engine_with(|_| {}).await;
        let report = engine.dispatch_batch(100, 0).await;
        assert!(report.submitted.is_empty());
        assert!(provider.submissions().is_empty());
    }
}
