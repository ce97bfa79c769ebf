//! Mock 供应商客户端（用于测试与无密钥本地运行）
//!
//! 提交即返回 uuid 请求标识并记录提交历史；可预设接下来 N 次提交失败，
//! 便于测试有界重试路径。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{ProviderId, RequestId};
use crate::provider::ProviderClient;

/// Mock 客户端：记录每次提交的 providerId
#[derive(Debug, Default)]
pub struct MockProviderClient {
    submissions: Mutex<Vec<(ProviderId, RequestId)>>,
    fail_next: AtomicUsize,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预设接下来 n 次提交返回失败
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// 已提交的 (providerId, requestId) 列表
    pub fn submissions(&self) -> Vec<(ProviderId, RequestId)> {
        self.submissions.lock().expect("mock lock poisoned").clone()
    }

    /// 查找某 providerId 最近一次分配的 requestId
    pub fn request_id_for(&self, provider_id: &ProviderId) -> Option<RequestId> {
        self.submissions
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .rev()
            .find(|(p, _)| p == provider_id)
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn submit_reveal(&self, provider_id: &ProviderId) -> Result<RequestId, String> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err("simulated submission failure".to_string());
        }

        let request_id = RequestId::new(format!("req-{}", uuid::Uuid::new_v4()));
        self.submissions
            .lock()
            .expect("mock lock poisoned")
            .push((provider_id.clone(), request_id.clone()));
        Ok(request_id)
    }
}
