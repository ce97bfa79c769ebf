//! 联系人持久存储：按 ProviderId 去重的单行存储
//!
//! ContactStore 为存储抽象；当前实现为 InMemoryContactStore（行级乐观锁），
//! 配合 ContactPersistence 做 JSON 快照，可跨进程恢复。

mod memory;
mod persistence;

pub use memory::InMemoryContactStore;
pub use persistence::ContactPersistence;

use async_trait::async_trait;

use crate::core::RevealError;
use crate::model::{Contact, ContactStatus, ProviderId};

/// 联系人存储 trait：不变式是每个 ProviderId 至多一行
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// 按去重键查找
    async fn find_by_provider_id(&self, id: &ProviderId) -> Option<Contact>;

    /// 写入或更新一行。携带的 version 必须等于存储中当前版本
    /// （新行为 0），否则返回 StoreWriteConflict，调用方重读后重试。
    async fn upsert(&self, contact: Contact) -> Result<(), RevealError>;

    /// 按状态查询（返回按 last_updated 升序，便于先到先调度）
    async fn query_by_status(&self, status: ContactStatus) -> Vec<Contact>;

    /// 全量导出（快照持久化用）
    async fn snapshot(&self) -> Vec<Contact>;
}
