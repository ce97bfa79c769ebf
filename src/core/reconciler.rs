//! 状态对账：把异步送达的 Reveal 结果合并进联系人存储
//!
//! 按字段替换式合并：供应商给出的值覆盖空字段，绝不用空值覆盖已有值；
//! 状态采用「最近一次投递获胜」。合并无实际变化时跳过写入，
//! 因此对同一 (providerId, result) 重复 apply 是纯空操作。
//! 行版本冲突（StoreWriteConflict）携带最新读按键重试，有界次数。

use std::sync::Arc;

use chrono::Utc;

use crate::core::RevealError;
use crate::model::{Contact, ContactStatus, ProviderId, RevealResult};
use crate::store::ContactStore;

const MAX_CONFLICT_RETRIES: usize = 5;

/// 状态对账器
pub struct StatusReconciler {
    store: Arc<dyn ContactStore>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    /// 将一条已关联的结果合并进存储。
    /// 记录不存在时（如重启丢失关联状态后收到迟到结果）创建最小行。
    pub async fn apply(
        &self,
        provider_id: &ProviderId,
        result: &RevealResult,
    ) -> Result<(), RevealError> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let current = self.store.find_by_provider_id(provider_id).await;

            let merged = match &current {
                Some(existing) => {
                    let merged = merge(existing, result);
                    if !differs(existing, &merged) {
                        tracing::debug!(provider_id = %provider_id, "Reconcile no-op (already applied)");
                        return Ok(());
                    }
                    merged
                }
                None => {
                    tracing::info!(
                        provider_id = %provider_id,
                        "Contact missing at reconcile, creating minimal record"
                    );
                    let placeholder = Contact::new(provider_id.clone(), provider_id.as_str());
                    merge(&placeholder, result)
                }
            };

            match self.store.upsert(merged).await {
                Ok(()) => {
                    tracing::info!(provider_id = %provider_id, "Reconciled reveal result");
                    return Ok(());
                }
                Err(RevealError::StoreWriteConflict(_)) => {
                    tracing::debug!(
                        provider_id = %provider_id,
                        attempt,
                        "Write conflict at reconcile, re-reading"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(RevealError::StoreWriteConflict(provider_id.to_string()))
    }
}

/// 字段级合并：返回合并后的新行（版本号沿用读到的值，交由 upsert CAS）
fn merge(existing: &Contact, result: &RevealResult) -> Contact {
    let mut next = existing.clone();
    match result {
        RevealResult::ContactFound {
            emails,
            phones,
            profile_url,
        } => {
            next.status = ContactStatus::Revealed;
            if !emails.is_empty() {
                next.emails = emails.clone();
            }
            if !phones.is_empty() {
                next.phones = phones.clone();
            }
            if profile_url.is_some() {
                next.profile_url = profile_url.clone();
            }
        }
        RevealResult::NoContactsFound => {
            // 最近一次投递获胜：状态替换，已有字段保留
            next.status = ContactStatus::NoContactsFound;
        }
    }
    next.last_updated = Utc::now();
    next
}

/// 合并是否产生实际变化（忽略 last_updated 与 version）
fn differs(a: &Contact, b: &Contact) -> bool {
    a.status != b.status
        || a.emails != b.emails
        || a.phones != b.phones
        || a.profile_url != b.profile_url
}
