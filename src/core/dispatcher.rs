//! 批量调度：选择、去重、配额门控与提交
//!
//! 每个条目依次过 daily_reveal 与 per_minute 两道配额，任一失败立即停止
//! 本轮后续调度（保持输入顺序，先排队的下一轮优先）；被接受的条目
//! 提交 → 注册关联 → 置 RevealRequested，注册先于完成标记落地，
//! 快速到达的回调不会遇到未注册的 requestId。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::core::{QuotaScope, QuotaTracker, RequestCorrelator, RevealError};
use crate::model::{Contact, ContactStatus, ProviderId, RequestId};
use crate::observability::EngineMetrics;
use crate::provider::ProviderClient;
use crate::store::ContactStore;

/// 供应商的单批上限，硬性约束
pub const PROVIDER_BATCH_CEILING: usize = 100;

/// 一轮调度的结果汇总
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// 实际提交成功的 (providerId, requestId)
    pub submitted: Vec<(ProviderId, RequestId)>,
    /// 因配额耗尽（或 rate 上限）延后的条目数
    pub deferred: usize,
    /// 去重掉的条目数（存储中已是终态或在途）
    pub skipped: usize,
    /// 提交重试耗尽的条目数（保持 New，下轮可重试）
    pub failed: usize,
}

/// 批量调度器：依赖全部注入，自身无全局状态
pub struct BatchDispatcher {
    quota: Arc<QuotaTracker>,
    correlator: Arc<RequestCorrelator>,
    store: Arc<dyn ContactStore>,
    provider: Arc<dyn ProviderClient>,
    metrics: Arc<EngineMetrics>,
    max_submit_retries: u32,
    retry_backoff_ms: u64,
}

impl BatchDispatcher {
    pub fn new(
        quota: Arc<QuotaTracker>,
        correlator: Arc<RequestCorrelator>,
        store: Arc<dyn ContactStore>,
        provider: Arc<dyn ProviderClient>,
        metrics: Arc<EngineMetrics>,
        max_submit_retries: u32,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            quota,
            correlator,
            store,
            provider,
            metrics,
            max_submit_retries,
            retry_backoff_ms,
        }
    }

    /// 调度一批候选（应为 New 状态，含超时回收回来的）。
    /// batch_size 会被钳到供应商上限 100；rate > 0 时作为本轮提交条数上限。
    pub async fn dispatch(
        &self,
        candidates: Vec<Contact>,
        batch_size: usize,
        rate: usize,
    ) -> DispatchReport {
        let batch_size = batch_size.clamp(1, PROVIDER_BATCH_CEILING);
        let mut report = DispatchReport::default();

        // 1. 去重：存储中已是终态（或在途）的不再浪费配额；批内同键只留首个
        let mut seen: std::collections::HashSet<ProviderId> = std::collections::HashSet::new();
        let mut eligible: Vec<Contact> = Vec::new();
        for c in candidates {
            if !seen.insert(c.provider_id.clone()) {
                report.skipped += 1;
                continue;
            }
            match self.store.find_by_provider_id(&c.provider_id).await {
                Some(stored)
                    if matches!(
                        stored.status,
                        ContactStatus::Revealed
                            | ContactStatus::NoContactsFound
                            | ContactStatus::RevealRequested
                    ) =>
                {
                    report.skipped += 1;
                }
                _ => eligible.push(c),
            }
        }

        // 2. rate 上限（0 = 不限，配额 scope 仍是硬门）
        if rate > 0 && eligible.len() > rate {
            report.deferred += eligible.len() - rate;
            eligible.truncate(rate);
        }

        // 3. 分块 + 逐条配额门控，首个失败即停，保持输入顺序
        let mut remaining = eligible.len();
        'outer: for chunk in eligible.chunks(batch_size) {
            for contact in chunk {
                if !self.quota.try_consume(QuotaScope::DailyReveal, 1) {
                    tracing::info!(scope = "daily_reveal", deferred = remaining, "Quota exhausted, deferring rest of run");
                    report.deferred += remaining;
                    break 'outer;
                }
                if !self.quota.try_consume(QuotaScope::PerMinute, 1) {
                    tracing::info!(scope = "per_minute", deferred = remaining, "Quota exhausted, deferring rest of run");
                    report.deferred += remaining;
                    break 'outer;
                }
                remaining -= 1;

                match self.submit_one(contact).await {
                    Ok(request_id) => {
                        report.submitted.push((contact.provider_id.clone(), request_id));
                    }
                    Err(e) => {
                        tracing::warn!(provider_id = %contact.provider_id, error = %e, "Submission failed, contact stays New");
                        report.failed += 1;
                    }
                }
            }
        }

        EngineMetrics::add(&self.metrics.submitted, report.submitted.len() as u64);
        EngineMetrics::add(&self.metrics.deferred, report.deferred as u64);
        EngineMetrics::add(&self.metrics.skipped, report.skipped as u64);
        EngineMetrics::add(&self.metrics.submit_failed, report.failed as u64);

        let audit = serde_json::json!({
            "event": "dispatch_audit",
            "submitted": report.submitted.len(),
            "deferred": report.deferred,
            "skipped": report.skipped,
            "failed": report.failed,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");

        report
    }

    /// 单条提交：有界重试 → 注册关联 → 置 RevealRequested
    async fn submit_one(&self, contact: &Contact) -> Result<RequestId, RevealError> {
        let mut last_err = String::new();
        let mut request_id = None;
        for attempt in 0..=self.max_submit_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(
                    self.retry_backoff_ms * attempt as u64,
                ))
                .await;
            }
            match self.provider.submit_reveal(&contact.provider_id).await {
                Ok(id) => {
                    request_id = Some(id);
                    break;
                }
                Err(e) => {
                    tracing::debug!(provider_id = %contact.provider_id, attempt, error = %e, "Submit attempt failed");
                    last_err = e;
                }
            }
        }
        let request_id =
            request_id.ok_or(RevealError::ProviderSubmissionFailed(last_err))?;

        // 注册先行：提交在注册落地前不算完成
        self.correlator
            .register(request_id.clone(), contact.provider_id.clone(), Utc::now());

        if let Err(e) = self.mark_requested(&contact.provider_id).await {
            // 状态写入失败则撤销注册，不留下「已注册但仍为 New」的条目，
            // 否则下轮调度会用新 requestId 重复提交同一记录
            self.correlator.resolve(&request_id);
            return Err(e);
        }
        Ok(request_id)
    }

    /// 将记录置为 RevealRequested；版本冲突时重读。若重读发现回调已先行
    /// 到达并写入终态，则保留终态不回退。
    async fn mark_requested(&self, provider_id: &ProviderId) -> Result<(), RevealError> {
        for _ in 0..3 {
            let Some(mut current) = self.store.find_by_provider_id(provider_id).await else {
                return Err(RevealError::StoreError(format!(
                    "contact {provider_id} vanished during dispatch"
                )));
            };
            if matches!(
                current.status,
                ContactStatus::Revealed | ContactStatus::NoContactsFound
            ) {
                return Ok(());
            }
            current.status = ContactStatus::RevealRequested;
            current.last_updated = Utc::now();
            match self.store.upsert(current).await {
                Ok(()) => return Ok(()),
                Err(RevealError::StoreWriteConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RevealError::StoreWriteConflict(provider_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QuotaLimits;
    use crate::provider::MockProviderClient;
    use crate::store::InMemoryContactStore;

    struct Fixture {
        dispatcher: BatchDispatcher,
        store: Arc<InMemoryContactStore>,
        correlator: Arc<RequestCorrelator>,
        provider: Arc<MockProviderClient>,
        quota: Arc<QuotaTracker>,
    }

    fn fixture(limits: QuotaLimits) -> Fixture {
        let store = Arc::new(InMemoryContactStore::new());
        let correlator = Arc::new(RequestCorrelator::new());
        let provider = Arc::new(MockProviderClient::new());
        let quota = Arc::new(QuotaTracker::new(limits));
        let dispatcher = BatchDispatcher::new(
            quota.clone(),
            correlator.clone(),
            store.clone(),
            provider.clone(),
            Arc::new(EngineMetrics::new()),
            2,
            1,
        );
        Fixture {
            dispatcher,
            store,
            correlator,
            provider,
            quota,
        }
    }

    async fn seed(store: &InMemoryContactStore, ids: &[&str]) -> Vec<Contact> {
        let mut out = Vec::new();
        for id in ids {
            let c = Contact::new(ProviderId::new(*id), format!("Name {id}"));
            store.upsert(c).await.unwrap();
            out.push(
                store
                    .find_by_provider_id(&ProviderId::new(*id))
                    .await
                    .unwrap(),
            );
        }
        out
    }

    fn limits(daily: u64, minute: u64) -> QuotaLimits {
        QuotaLimits {
            daily_reveal: daily,
            daily_profile_view: 5000,
            per_minute: minute,
        }
    }

    #[tokio::test]
    async fn test_dispatch_submits_and_marks_requested() {
        let f = fixture(limits(100, 100));
        let candidates = seed(&f.store, &["p-a", "p-b"]).await;

        let report = f.dispatcher.dispatch(candidates, 100, 0).await;
        assert_eq!(report.submitted.len(), 2);
        assert_eq!(report.deferred, 0);

        for id in ["p-a", "p-b"] {
            let c = f
                .store
                .find_by_provider_id(&ProviderId::new(id))
                .await
                .unwrap();
            assert_eq!(c.status, ContactStatus::RevealRequested);
        }
        assert_eq!(f.correlator.pending_count(), 2);
        assert_eq!(f.provider.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_per_minute_quota_stops_in_order() {
        // Scenario A：per_minute 剩 2，{A,B,C} → 提交 A、B，C 延后
        let f = fixture(limits(100, 2));
        let candidates = seed(&f.store, &["p-a", "p-b", "p-c"]).await;

        let report = f.dispatcher.dispatch(candidates, 100, 0).await;
        assert_eq!(report.submitted.len(), 2);
        assert_eq!(report.deferred, 1);
        assert_eq!(
            report.submitted[0].0,
            ProviderId::new("p-a"),
            "input order preserved"
        );

        let c = f
            .store
            .find_by_provider_id(&ProviderId::new("p-c"))
            .await
            .unwrap();
        assert_eq!(c.status, ContactStatus::New);
    }

    #[tokio::test]
    async fn test_daily_quota_near_limit() {
        // Scenario D：daily 4999/5000 → 5 个候选只提交 1 个，延后 4，≥90% 告警
        let f = fixture(limits(5000, 5000));
        let mut warn_rx = f.quota.subscribe();
        assert!(f.quota.try_consume(QuotaScope::DailyReveal, 4999));
        // 预热期的阈值事件先清空
        while warn_rx.try_recv().is_ok() {}

        let candidates = seed(&f.store, &["p-1", "p-2", "p-3", "p-4", "p-5"]).await;
        let report = f.dispatcher.dispatch(candidates, 100, 0).await;

        assert_eq!(report.submitted.len(), 1);
        assert_eq!(report.deferred, 4);
        assert_eq!(f.quota.remaining(QuotaScope::DailyReveal), 0);
    }

    #[tokio::test]
    async fn test_dedup_skips_terminal_and_inflight() {
        let f = fixture(limits(100, 100));
        let mut candidates = seed(&f.store, &["p-new", "p-done", "p-flight"]).await;

        // p-done 置终态，p-flight 置在途
        for (id, status) in [
            ("p-done", ContactStatus::Revealed),
            ("p-flight", ContactStatus::RevealRequested),
        ] {
            let mut c = f
                .store
                .find_by_provider_id(&ProviderId::new(id))
                .await
                .unwrap();
            c.status = status;
            f.store.upsert(c).await.unwrap();
        }
        // 候选列表还混入一个批内重复
        candidates.push(candidates[0].clone());

        let report = f.dispatcher.dispatch(candidates, 100, 0).await;
        assert_eq!(report.submitted.len(), 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(f.provider.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_retry_exhaustion_keeps_new() {
        let f = fixture(limits(100, 100));
        let candidates = seed(&f.store, &["p-a", "p-b"]).await;
        // 前 3 次提交都失败：p-a 重试耗尽（1 + 2 重试），p-b 正常
        f.provider.fail_next(3);

        let report = f.dispatcher.dispatch(candidates, 100, 0).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.submitted.len(), 1);

        let a = f
            .store
            .find_by_provider_id(&ProviderId::new("p-a"))
            .await
            .unwrap();
        assert_eq!(a.status, ContactStatus::New);
    }

    /// 行在调度中途消失的存储：find 永远 None，其余委托内层实现
    struct VanishingStore {
        inner: InMemoryContactStore,
    }

    #[async_trait::async_trait]
    impl crate::store::ContactStore for VanishingStore {
        async fn find_by_provider_id(&self, _id: &ProviderId) -> Option<Contact> {
            None
        }

        async fn upsert(&self, contact: Contact) -> Result<(), RevealError> {
            self.inner.upsert(contact).await
        }

        async fn query_by_status(&self, status: ContactStatus) -> Vec<Contact> {
            self.inner.query_by_status(status).await
        }

        async fn snapshot(&self) -> Vec<Contact> {
            self.inner.snapshot().await
        }
    }

    #[tokio::test]
    async fn test_mark_failure_evicts_registration() {
        // 状态写入失败的条目不得留下在途注册，否则下轮会重复提交
        let correlator = Arc::new(RequestCorrelator::new());
        let provider = Arc::new(MockProviderClient::new());
        let dispatcher = BatchDispatcher::new(
            Arc::new(QuotaTracker::new(limits(100, 100))),
            correlator.clone(),
            Arc::new(VanishingStore {
                inner: InMemoryContactStore::new(),
            }),
            provider.clone(),
            Arc::new(EngineMetrics::new()),
            0,
            1,
        );

        let candidates = vec![Contact::new(ProviderId::new("p-gone"), "Gone")];
        let report = dispatcher.dispatch(candidates, 100, 0).await;

        assert_eq!(report.failed, 1);
        assert!(report.submitted.is_empty());
        // 提交已到供应商，但注册条目已撤销
        assert_eq!(provider.submissions().len(), 1);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_cap_defers_excess() {
        let f = fixture(limits(100, 100));
        let candidates = seed(&f.store, &["p-1", "p-2", "p-3"]).await;

        let report = f.dispatcher.dispatch(candidates, 100, 2).await;
        assert_eq!(report.submitted.len(), 2);
        assert_eq!(report.deferred, 1);
    }
}
