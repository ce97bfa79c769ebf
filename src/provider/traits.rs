//! 供应商客户端抽象
//!
//! 所有后端（HTTP / Mock）实现 ProviderClient：submit_reveal 为
//! 单向异步提交，只返回 requestId，真正的结果经回调另行送达。

use async_trait::async_trait;

use crate::model::{ProviderId, RequestId};

/// 供应商客户端 trait：提交 Reveal 请求
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// 提交一条 Reveal；成功返回供应商分配的 requestId
    async fn submit_reveal(&self, provider_id: &ProviderId) -> Result<RequestId, String>;
}
