//! 回调摄入：接收供应商的异步投递
//!
//! 流程：校验形态与来源 → Correlator 解析 requestId → 转交 Reconciler。
//! 未知/重复 requestId 确认收货但不做任何变更（重复与迟到投递安全）；
//! 对账失败转入后台重试，永不以失败响应供应商，避免重试风暴。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{RequestCorrelator, RevealError, StatusReconciler};
use crate::model::{CallbackDelivery, RequestId, RevealResult};
use crate::observability::EngineMetrics;

/// 投递处理结论：无论哪种都已向供应商即时确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 已解析并转交对账（或已转入后台重试）
    Reconciled,
    /// 未知/重复/过期 requestId，幂等空操作
    IgnoredUnknown,
    /// 形态或来源非法，拒收且无存储变更
    Rejected,
}

const RECONCILE_RETRY_ATTEMPTS: u32 = 5;
const RECONCILE_RETRY_BACKOFF_MS: u64 = 200;

/// 回调摄入器
pub struct CallbackIngestor {
    correlator: Arc<RequestCorrelator>,
    reconciler: Arc<StatusReconciler>,
    metrics: Arc<EngineMetrics>,
    /// 来源校验令牌；None 表示不校验（内网部署）
    verify_token: Option<String>,
}

impl CallbackIngestor {
    pub fn new(
        correlator: Arc<RequestCorrelator>,
        reconciler: Arc<StatusReconciler>,
        metrics: Arc<EngineMetrics>,
        verify_token: Option<String>,
    ) -> Self {
        Self {
            correlator,
            reconciler,
            metrics,
            verify_token,
        }
    }

    /// 处理一条投递。presented_token 为投递方携带的来源令牌。
    pub async fn ingest(
        &self,
        delivery: CallbackDelivery,
        presented_token: Option<&str>,
    ) -> IngestOutcome {
        let result = match self.validate(&delivery, presented_token) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Callback rejected");
                EngineMetrics::incr(&self.metrics.callbacks_rejected);
                return IngestOutcome::Rejected;
            }
        };

        let request_id = RequestId::new(delivery.request_id.clone());
        let Some(provider_id) = self.correlator.resolve(&request_id) else {
            // 已解析过、已过期或从未注册：确认收货，不做变更
            tracing::info!(request_id = %request_id, "Unknown request id, ignoring delivery");
            EngineMetrics::incr(&self.metrics.unknown_request_ids);
            return IngestOutcome::IgnoredUnknown;
        };

        EngineMetrics::incr(&self.metrics.callbacks_accepted);

        match self.reconciler.apply(&provider_id, &result).await {
            Ok(()) => {
                EngineMetrics::incr(&self.metrics.reconciled);
            }
            Err(e) => {
                // 确认已给出，失败只在内部重试
                tracing::error!(provider_id = %provider_id, error = %e, "Reconcile failed, retrying in background");
                self.spawn_retry(provider_id, result);
            }
        }
        IngestOutcome::Reconciled
    }

    /// 形态与来源校验；失败不产生任何存储变更
    fn validate(
        &self,
        delivery: &CallbackDelivery,
        presented_token: Option<&str>,
    ) -> Result<RevealResult, RevealError> {
        if let Some(expected) = &self.verify_token {
            if presented_token != Some(expected.as_str()) {
                return Err(RevealError::CallbackValidationError(
                    "invalid or missing verify token".into(),
                ));
            }
        }
        if delivery.request_id.trim().is_empty() {
            return Err(RevealError::CallbackValidationError(
                "empty request_id".into(),
            ));
        }
        match delivery.status.as_str() {
            "revealed" => Ok(RevealResult::ContactFound {
                emails: delivery.emails.clone(),
                phones: delivery.phones.clone(),
                profile_url: delivery.profile_url.clone(),
            }),
            "not_found" => Ok(RevealResult::NoContactsFound),
            other => Err(RevealError::CallbackValidationError(format!(
                "unknown status '{other}'"
            ))),
        }
    }

    fn spawn_retry(&self, provider_id: crate::model::ProviderId, result: RevealResult) {
        let reconciler = Arc::clone(&self.reconciler);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            for attempt in 1..=RECONCILE_RETRY_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(
                    RECONCILE_RETRY_BACKOFF_MS * attempt as u64,
                ))
                .await;
                match reconciler.apply(&provider_id, &result).await {
                    Ok(()) => {
                        EngineMetrics::incr(&metrics.reconciled);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(provider_id = %provider_id, attempt, error = %e, "Background reconcile retry failed");
                    }
                }
            }
            tracing::error!(provider_id = %provider_id, "Background reconcile retries exhausted");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, ContactStatus, ProviderId};
    use crate::store::{ContactStore, InMemoryContactStore};
    use chrono::Utc;

    fn delivery(request_id: &str, status: &str, email: Option<&str>) -> CallbackDelivery {
        CallbackDelivery {
            request_id: request_id.to_string(),
            status: status.to_string(),
            emails: email.map(|e| vec![e.to_string()]).unwrap_or_default(),
            phones: vec![],
            profile_url: None,
        }
    }

    async fn setup(verify_token: Option<String>) -> (CallbackIngestor, Arc<InMemoryContactStore>, Arc<RequestCorrelator>) {
        let store = Arc::new(InMemoryContactStore::new());
        let correlator = Arc::new(RequestCorrelator::new());
        let reconciler = Arc::new(StatusReconciler::new(store.clone()));
        let ingestor = CallbackIngestor::new(
            correlator.clone(),
            reconciler,
            Arc::new(EngineMetrics::new()),
            verify_token,
        );
        (ingestor, store, correlator)
    }

    #[tokio::test]
    async fn test_resolved_delivery_reconciles() {
        let (ingestor, store, correlator) = setup(None).await;
        let pid = ProviderId::new("p-1");
        store.upsert(Contact::new(pid.clone(), "Alice")).await.unwrap();
        correlator.register(RequestId::new("r-1"), pid.clone(), Utc::now());

        let outcome = ingestor
            .ingest(delivery("r-1", "revealed", Some("a@x.com")), None)
            .await;
        assert_eq!(outcome, IngestOutcome::Reconciled);

        let c = store.find_by_provider_id(&pid).await.unwrap();
        assert_eq!(c.status, ContactStatus::Revealed);
        assert_eq!(c.emails, vec!["a@x.com".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let (ingestor, store, correlator) = setup(None).await;
        let pid = ProviderId::new("p-1");
        store.upsert(Contact::new(pid.clone(), "Alice")).await.unwrap();
        correlator.register(RequestId::new("r-1"), pid.clone(), Utc::now());

        ingestor
            .ingest(delivery("r-1", "revealed", Some("a@x.com")), None)
            .await;
        let first = store.find_by_provider_id(&pid).await.unwrap();

        // 同一 requestId 的重复投递：第二次解析不到，存储不变
        let outcome = ingestor
            .ingest(delivery("r-1", "revealed", Some("a@x.com")), None)
            .await;
        assert_eq!(outcome, IngestOutcome::IgnoredUnknown);

        let second = store.find_by_provider_id(&pid).await.unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_request_id_ignored() {
        let (ingestor, store, _) = setup(None).await;
        let outcome = ingestor
            .ingest(delivery("never-seen", "not_found", None), None)
            .await;
        assert_eq!(outcome, IngestOutcome::IgnoredUnknown);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_delivery_rejected_without_mutation() {
        let (ingestor, store, correlator) = setup(None).await;
        let pid = ProviderId::new("p-1");
        correlator.register(RequestId::new("r-1"), pid, Utc::now());

        let outcome = ingestor
            .ingest(delivery("r-1", "banana", None), None)
            .await;
        assert_eq!(outcome, IngestOutcome::Rejected);
        assert!(store.is_empty().await);
        // 拒收不消耗关联条目，合法重投仍可解析
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_verify_token_rejected() {
        let (ingestor, store, correlator) = setup(Some("secret".into())).await;
        correlator.register(RequestId::new("r-1"), ProviderId::new("p-1"), Utc::now());

        let outcome = ingestor
            .ingest(delivery("r-1", "not_found", None), Some("wrong"))
            .await;
        assert_eq!(outcome, IngestOutcome::Rejected);
        assert!(store.is_empty().await);

        let outcome = ingestor
            .ingest(delivery("r-1", "not_found", None), Some("secret"))
            .await;
        assert_eq!(outcome, IngestOutcome::Reconciled);
    }
}
