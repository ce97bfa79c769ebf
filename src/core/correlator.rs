//! 请求关联器：requestId → providerId 的在途映射
//!
//! register 在提交成功后立即写入；resolve 采用「取出即解析」语义，
//! 同一 requestId 至多解析一次（第二次返回 None）；sweep_expired 按提交
//! 时刻批量逐出超时条目，逐出与解析在同一把锁下互斥，不会同时发生。

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::model::{ProviderId, RequestId};

/// 在途请求条目（短生命周期，不持久化）
#[derive(Debug, Clone)]
struct PendingEntry {
    provider_id: ProviderId,
    submitted_at: DateTime<Utc>,
}

/// 请求关联器
pub struct RequestCorrelator {
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// 注册一条在途请求；同一 requestId 重复注册视为编程错误，保留首条
    pub fn register(
        &self,
        request_id: RequestId,
        provider_id: ProviderId,
        submitted_at: DateTime<Utc>,
    ) {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        if pending.contains_key(&request_id) {
            tracing::warn!(request_id = %request_id, "Duplicate register ignored");
            return;
        }
        pending.insert(
            request_id,
            PendingEntry {
                provider_id,
                submitted_at,
            },
        );
    }

    /// 解析一条回调：命中则移除并返回对应 providerId，未命中返回 None。
    /// 移除即解析，保证每个 requestId 在系统生命周期内至多解析一次。
    pub fn resolve(&self, request_id: &RequestId) -> Option<ProviderId> {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        pending.remove(request_id).map(|e| e.provider_id)
    }

    /// 逐出所有提交时刻早于 now - timeout 的条目，返回其 providerId，
    /// 供 Dispatcher 把对应 Contact 退回 New。
    pub fn sweep_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ProviderId> {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        let cutoff = now - timeout;
        let expired: Vec<RequestId> = pending
            .iter()
            .filter(|(_, e)| e.submitted_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                pending.remove(&id).map(|e| {
                    tracing::info!(request_id = %id, provider_id = %e.provider_id, "Pending request expired");
                    e.provider_id
                })
            })
            .collect()
    }

    /// 当前在途条目数
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }

    /// 当前在途的 providerId 集合（超时回收扫描用）
    pub fn pending_provider_ids(&self) -> std::collections::HashSet<ProviderId> {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .values()
            .map(|e| e.provider_id.clone())
            .collect()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
